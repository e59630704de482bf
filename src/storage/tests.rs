//! Storage Module Tests
//!
//! Validates the TTL map, the write-once result store and lease semantics.
//!
//! ## Test Scopes
//! - **TtlMap**: Expiry, conditional insert and in-place updates.
//! - **ResultStore**: Status transitions and write-once results.
//! - **LockManager**: Exclusivity, expiry takeover, owner-checked release, guards and renewal.

#[cfg(test)]
mod tests {
    use crate::executor::types::{Task, TaskId, TaskResult, TaskStatus, TaskType};
    use crate::storage::lease::{LockManager, dataset_lease_key, task_lease_key};
    use crate::storage::memory::TtlMap;
    use crate::storage::results::ResultStore;
    use std::time::Duration;

    const LONG: Duration = Duration::from_secs(60);
    const SHORT: Duration = Duration::from_millis(30);

    fn sample_task() -> Task {
        Task::new(
            TaskType::FeatureExtraction,
            serde_json::json!({"image_data": "AAAA"}),
            5,
        )
    }

    // ============================================================
    // TTL MAP TESTS
    // ============================================================

    #[test]
    fn test_ttl_map_set_and_get() {
        let map: TtlMap<String> = TtlMap::new();
        map.set("a", "alpha".to_string(), LONG);

        assert_eq!(map.get("a"), Some("alpha".to_string()));
        assert!(map.get("missing").is_none());
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_map_entries_expire() {
        let map: TtlMap<u32> = TtlMap::new();
        map.set("short", 1, SHORT);
        map.set("long", 2, LONG);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(map.get("short").is_none(), "Expired entry must be invisible");
        assert_eq!(map.get("long"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_map_purge_expired() {
        let map: TtlMap<u32> = TtlMap::new();
        for i in 0..5 {
            map.set(&format!("k{}", i), i, SHORT);
        }
        map.set("keep", 99, LONG);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(map.purge_expired(), 5);
        assert_eq!(map.values(), vec![99]);
    }

    #[tokio::test]
    async fn test_ttl_map_set_if_absent_respects_live_entries() {
        let map: TtlMap<&'static str> = TtlMap::new();

        assert!(map.set_if_absent("k", "first", SHORT));
        assert!(!map.set_if_absent("k", "second", SHORT));
        assert_eq!(map.get("k"), Some("first"));

        // After expiry the slot is free again
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(map.set_if_absent("k", "third", LONG));
        assert_eq!(map.get("k"), Some("third"));
    }

    #[test]
    fn test_ttl_map_update_in_place() {
        let map: TtlMap<Vec<i32>> = TtlMap::new();
        map.set("list", vec![1], LONG);

        assert!(map.update("list", |v| v.push(2)));
        assert!(!map.update("missing", |v| v.push(3)));
        assert_eq!(map.get("list"), Some(vec![1, 2]));
    }

    // ============================================================
    // RESULT STORE TESTS
    // ============================================================

    #[test]
    fn test_result_store_pending_to_processing() {
        let store = ResultStore::new(LONG);
        let task = sample_task();

        store.put_pending(&task);
        assert_eq!(store.status(&task.task_id), Some(TaskStatus::Pending));

        assert!(store.set_status(&task.task_id, TaskStatus::Processing, Some("worker-1")));

        let record = store.task(&task.task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.assigned_to.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_result_store_result_is_write_once() {
        let store = ResultStore::new(LONG);
        let task = sample_task();
        store.put_pending(&task);

        let first = TaskResult::completed(task.task_id.clone(), serde_json::json!([1.0, 2.0]));
        let second = TaskResult::failed(task.task_id.clone(), "late writer");

        assert!(store.put_result(first.clone()));
        assert!(!store.put_result(second));

        assert_eq!(store.result(&task.task_id), Some(first));
        assert_eq!(store.status(&task.task_id), Some(TaskStatus::Completed));
    }

    #[test]
    fn test_result_store_terminal_status_is_sticky() {
        let store = ResultStore::new(LONG);
        let task = sample_task();
        store.put_pending(&task);
        store.put_result(TaskResult::failed(task.task_id.clone(), "boom"));

        assert!(!store.set_status(&task.task_id, TaskStatus::Processing, None));
        assert_eq!(store.status(&task.task_id), Some(TaskStatus::Failed));
    }

    #[test]
    fn test_result_store_status_counts() {
        let store = ResultStore::new(LONG);
        let tasks: Vec<Task> = (0..4).map(|_| sample_task()).collect();
        for task in &tasks {
            store.put_pending(task);
        }

        store.set_status(&tasks[1].task_id, TaskStatus::Processing, None);
        store.put_result(TaskResult::completed(tasks[2].task_id.clone(), serde_json::json!(null)));
        store.put_result(TaskResult::failed(tasks[3].task_id.clone(), "x"));

        assert_eq!(store.status_counts(), (1, 1, 1, 1));
    }

    #[test]
    fn test_result_store_cancellation_flag() {
        let store = ResultStore::new(LONG);
        let id = TaskId::new();

        assert!(!store.is_cancelled(&id));
        store.mark_cancelled(&id);
        assert!(store.is_cancelled(&id));
    }

    // ============================================================
    // LOCK MANAGER TESTS
    // ============================================================

    #[test]
    fn test_lease_is_exclusive() {
        let locks = LockManager::new();
        let key = task_lease_key(&TaskId("t-1".to_string()));

        assert!(locks.acquire(&key, "worker-a", LONG).is_some());
        assert!(locks.acquire(&key, "worker-b", LONG).is_none());
        // Not re-entrant either
        assert!(locks.acquire(&key, "worker-a", LONG).is_none());

        assert_eq!(locks.holder(&key).unwrap().owner, "worker-a");
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let locks = LockManager::new();
        let key = task_lease_key(&TaskId("t-2".to_string()));

        locks.acquire(&key, "crashed-worker", SHORT).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let lease = locks.acquire(&key, "worker-b", LONG);
        assert_eq!(lease.unwrap().owner, "worker-b");
    }

    #[test]
    fn test_release_checks_owner() {
        let locks = LockManager::new();
        let key = dataset_lease_key("7");

        locks.acquire(&key, "writer-1", LONG).unwrap();

        assert!(!locks.release(&key, "writer-2"));
        assert!(locks.is_held(&key));
        assert!(locks.release(&key, "writer-1"));
        assert!(!locks.is_held(&key));
    }

    #[test]
    fn test_renew_requires_ownership() {
        let locks = LockManager::new();
        let key = dataset_lease_key("9");

        locks.acquire(&key, "writer-1", LONG).unwrap();

        assert!(locks.renew(&key, "writer-1", LONG).is_ok());
        assert!(locks.renew(&key, "writer-2", LONG).is_err());
        assert!(locks.renew("dataset:none", "writer-1", LONG).is_err());
    }

    #[test]
    fn test_task_and_dataset_namespaces_do_not_collide() {
        let locks = LockManager::new();

        assert!(locks.acquire(&task_lease_key(&TaskId("1".into())), "w", LONG).is_some());
        assert!(locks.acquire(&dataset_lease_key("1"), "w", LONG).is_some());
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let locks = LockManager::new();
        let key = dataset_lease_key("3");

        {
            let guard = locks
                .acquire_with_wait(&key, "writer", LONG, Duration::from_millis(50))
                .await
                .unwrap();
            assert_eq!(guard.key(), key);
            assert!(locks.is_held(&key));
        }

        assert!(!locks.is_held(&key));
    }

    #[tokio::test]
    async fn test_acquire_with_wait_times_out_with_lease_busy() {
        let locks = LockManager::new();
        let key = dataset_lease_key("4");
        locks.acquire(&key, "holder", LONG).unwrap();

        let result = locks
            .acquire_with_wait(&key, "waiter", LONG, Duration::from_millis(60))
            .await;

        assert!(matches!(
            result,
            Err(crate::error::ServiceError::LeaseBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_with_wait_succeeds_after_release() {
        let locks = LockManager::new();
        let key = dataset_lease_key("5");
        locks.acquire(&key, "holder", LONG).unwrap();

        let releaser = locks.clone();
        let release_key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            releaser.release(&release_key, "holder");
        });

        let guard = locks
            .acquire_with_wait(&key, "waiter", LONG, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(guard.owner(), "waiter");
    }

    #[tokio::test]
    async fn test_renewing_guard_outlives_ttl() {
        // ARRANGE
        let locks = LockManager::new();
        let key = dataset_lease_key("6");

        {
            let _guard = locks
                .acquire_with_wait(&key, "writer", SHORT, Duration::from_millis(50))
                .await
                .unwrap()
                .renewing(SHORT, Duration::from_millis(10));

            // ACT: wait several TTLs
            tokio::time::sleep(SHORT * 5).await;

            // ASSERT: still ours, nobody else can take it
            assert_eq!(locks.holder(&key).unwrap().owner, "writer");
            assert!(locks.acquire(&key, "intruder", LONG).is_none());
        }

        // Dropping the guard stops renewal and releases the lease
        assert!(!locks.is_held(&key));
        tokio::time::sleep(SHORT).await;
        assert!(locks.acquire(&key, "next", LONG).is_some());
    }
}

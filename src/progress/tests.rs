//! Progress Module Tests
//!
//! ## Test Scopes
//! - **Notifier**: Fan-out and percent clamping.
//! - **File Observer**: On-disk format and parsing of every terminal state.
//! - **Tracker**: In-memory state transitions.

#[cfg(test)]
mod tests {
    use crate::progress::file::{FileProgressObserver, parse_progress, read_progress_file};
    use crate::progress::{
        ProgressNotifier, ProgressObserver, ProgressState, ProgressStatus, ProgressTracker,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, f32)>>,
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, subject: &str, percent: f32, _message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((subject.to_string(), percent));
        }

        fn on_complete(&self, subject: &str, success: bool, _message: &str) {
            let marker = if success { -1.0 } else { -2.0 };
            self.events
                .lock()
                .unwrap()
                .push((subject.to_string(), marker));
        }
    }

    // ============================================================
    // NOTIFIER TESTS
    // ============================================================

    #[test]
    fn test_notifier_fans_out_and_clamps() {
        // ARRANGE
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let notifier = ProgressNotifier::new()
            .with_observer(first.clone())
            .with_observer(second.clone());

        // ACT
        notifier.notify("build", -5.0, "start");
        notifier.notify("build", 150.0, "overshoot");
        notifier.complete("build", true, "ok");

        // ASSERT
        for recorder in [&first, &second] {
            let events = recorder.events.lock().unwrap();
            assert_eq!(
                *events,
                vec![
                    ("build".to_string(), 0.0),
                    ("build".to_string(), 100.0),
                    ("build".to_string(), -1.0),
                ]
            );
        }
    }

    #[test]
    fn test_empty_notifier_is_noop() {
        let notifier = ProgressNotifier::default();
        notifier.notify("x", 50.0, "half");
        notifier.complete("x", false, "boom");
        assert_eq!(notifier.observer_count(), 0);
    }

    // ============================================================
    // FILE OBSERVER TESTS
    // ============================================================

    #[test]
    fn test_file_observer_overwrites_then_appends_marker() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let observer = FileProgressObserver::new(dir.path());

        // ACT
        observer.on_progress("7", 10.0, "extracting");
        observer.on_progress("7", 55.5, "extracting");
        observer.on_complete("7", true, "indexed 12 images");

        // ASSERT: Only the latest percent line survives, the marker is appended
        let contents = std::fs::read_to_string(observer.path_for("7")).unwrap();
        assert_eq!(contents, "55.50% - extracting\nDONE - indexed 12 images\n");

        let state = read_progress_file("7", &observer.path_for("7")).unwrap();
        assert_eq!(state.status, ProgressStatus::Completed);
        assert_eq!(state.percent, 100.0);
        assert_eq!(state.message, "indexed 12 images");
    }

    #[test]
    fn test_file_observer_readers_never_see_partial_file() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(FileProgressObserver::new(dir.path()));
        observer.on_progress("5", 1.0, "started");
        let path = observer.path_for("5");

        // ACT: a writer keeps replacing the file while the reader polls it
        let writer = {
            let observer = observer.clone();
            std::thread::spawn(move || {
                for step in 0..200 {
                    observer.on_progress("5", step as f32 * 0.4, "scanning");
                }
                observer.on_complete("5", true, "finished");
            })
        };
        loop {
            let state = read_progress_file("5", &path).unwrap();
            assert_ne!(state.status, ProgressStatus::Pending);
            if writer.is_finished() {
                break;
            }
        }
        writer.join().unwrap();

        // ASSERT
        let state = read_progress_file("5", &path).unwrap();
        assert_eq!(state.status, ProgressStatus::Completed);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_file_observer_error_marker() {
        let dir = tempfile::tempdir().unwrap();
        let observer = FileProgressObserver::new(dir.path());

        observer.on_progress("9", 40.0, "building");
        observer.on_complete("9", false, "dimension mismatch");

        let state = read_progress_file("9", &observer.path_for("9")).unwrap();
        assert_eq!(state.status, ProgressStatus::Failed);
        assert_eq!(state.percent, 40.0);
        assert_eq!(state.message, "dimension mismatch");
    }

    #[test]
    fn test_missing_file_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let state = read_progress_file("nope", &dir.path().join("nope_progress.txt")).unwrap();
        assert_eq!(state, ProgressState::pending("nope"));
    }

    #[test]
    fn test_parse_progress_rules() {
        assert_eq!(parse_progress("s", "").status, ProgressStatus::Pending);
        assert_eq!(parse_progress("s", "\n\n").status, ProgressStatus::Pending);

        let running = parse_progress("s", "42.00% - extracting features\n");
        assert_eq!(running.status, ProgressStatus::Processing);
        assert_eq!(running.percent, 42.0);
        assert_eq!(running.message, "extracting features");

        let finished = parse_progress("s", "100.00% - saved\n");
        assert_eq!(finished.status, ProgressStatus::Completed);

        let failed = parse_progress("s", "ERROR - extractor unreachable");
        assert_eq!(failed.status, ProgressStatus::Failed);
        assert_eq!(failed.percent, 0.0);
    }

    // ============================================================
    // TRACKER TESTS
    // ============================================================

    #[test]
    fn test_tracker_follows_progress() {
        let tracker = ProgressTracker::new();
        assert!(tracker.get("ds").is_none());

        tracker.on_progress("ds", 30.0, "batch 1");
        let state = tracker.get("ds").unwrap();
        assert_eq!(state.status, ProgressStatus::Processing);
        assert_eq!(state.percent, 30.0);

        tracker.on_complete("ds", false, "cancelled");
        let state = tracker.get("ds").unwrap();
        assert_eq!(state.status, ProgressStatus::Failed);
        assert_eq!(state.percent, 30.0);
        assert_eq!(state.message, "cancelled");
    }
}

//! Dataset metadata boundary.
//!
//! The relational store behind datasets and images is external. The index layer
//! only needs four things from it, captured by `DatasetStore`.

use crate::error::{Result, ServiceError};

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait DatasetStore: Send + Sync {
    /// Id of the dataset called `name`, creating it if needed.
    fn get_or_create(&self, name: &str) -> Result<i64>;

    /// Registers an image file under a dataset and returns its image id.
    fn add_image(&self, dataset_id: i64, filename: &str) -> Result<i64>;

    /// Image ids of a dataset in insertion order.
    fn image_ids_in_order(&self, dataset_id: i64) -> Result<Vec<i64>>;

    /// Drops images from a dataset. Returns how many were registered.
    fn remove_images(&self, dataset_id: i64, image_ids: &[i64]) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub image_id: i64,
    pub filename: String,
}

/// Process-local `DatasetStore`.
pub struct InMemoryDatasetStore {
    by_name: DashMap<String, i64>,
    images: DashMap<i64, Vec<ImageRecord>>,
    next_dataset_id: AtomicI64,
    next_image_id: AtomicI64,
}

impl InMemoryDatasetStore {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            images: DashMap::new(),
            next_dataset_id: AtomicI64::new(1),
            next_image_id: AtomicI64::new(1),
        }
    }

    pub fn images(&self, dataset_id: i64) -> Vec<ImageRecord> {
        self.images
            .get(&dataset_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryDatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetStore for InMemoryDatasetStore {
    fn get_or_create(&self, name: &str) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(ServiceError::EmptyInput("dataset name".to_string()));
        }

        let id = *self.by_name.entry(name.to_string()).or_insert_with(|| {
            let id = self.next_dataset_id.fetch_add(1, Ordering::SeqCst);
            self.images.insert(id, Vec::new());
            tracing::info!("Created dataset '{}' with id {}", name, id);
            id
        });
        Ok(id)
    }

    fn add_image(&self, dataset_id: i64, filename: &str) -> Result<i64> {
        let mut list = self
            .images
            .get_mut(&dataset_id)
            .ok_or_else(|| ServiceError::NotFound(format!("dataset {}", dataset_id)))?;

        let image_id = self.next_image_id.fetch_add(1, Ordering::SeqCst);
        list.push(ImageRecord {
            image_id,
            filename: filename.to_string(),
        });
        Ok(image_id)
    }

    fn image_ids_in_order(&self, dataset_id: i64) -> Result<Vec<i64>> {
        self.images
            .get(&dataset_id)
            .map(|list| list.iter().map(|img| img.image_id).collect())
            .ok_or_else(|| ServiceError::NotFound(format!("dataset {}", dataset_id)))
    }

    fn remove_images(&self, dataset_id: i64, image_ids: &[i64]) -> Result<usize> {
        let mut list = self
            .images
            .get_mut(&dataset_id)
            .ok_or_else(|| ServiceError::NotFound(format!("dataset {}", dataset_id)))?;

        let before = list.len();
        list.retain(|img| !image_ids.contains(&img.image_id));
        Ok(before - list.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_stable() {
        let store = InMemoryDatasetStore::new();
        let a = store.get_or_create("cats").unwrap();
        let b = store.get_or_create("dogs").unwrap();

        assert_ne!(a, b);
        assert_eq!(store.get_or_create("cats").unwrap(), a);
    }

    #[test]
    fn test_images_keep_insertion_order() {
        let store = InMemoryDatasetStore::new();
        let ds = store.get_or_create("set").unwrap();

        let first = store.add_image(ds, "b.png").unwrap();
        let second = store.add_image(ds, "a.png").unwrap();

        assert_eq!(store.image_ids_in_order(ds).unwrap(), vec![first, second]);
        assert_eq!(store.images(ds)[1].filename, "a.png");
    }

    #[test]
    fn test_remove_images_keeps_the_rest_in_order() {
        let store = InMemoryDatasetStore::new();
        let ds = store.get_or_create("set").unwrap();
        let a = store.add_image(ds, "a.png").unwrap();
        let b = store.add_image(ds, "b.png").unwrap();
        let c = store.add_image(ds, "c.png").unwrap();

        assert_eq!(store.remove_images(ds, &[b, 999]).unwrap(), 1);
        assert_eq!(store.image_ids_in_order(ds).unwrap(), vec![a, c]);
        assert!(matches!(
            store.remove_images(42, &[a]),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_dataset_is_not_found() {
        let store = InMemoryDatasetStore::new();
        assert!(matches!(
            store.add_image(42, "x.png"),
            Err(ServiceError::NotFound(_))
        ));
        assert!(store.get_or_create("  ").is_err());
    }
}

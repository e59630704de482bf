//! Ingestion Module
//!
//! Turns a named batch of images into a searchable dataset index.
//!
//! ## Workflow
//! 1. **Register**: Resolves the dataset in the `DatasetStore`.
//! 2. **Extract**: Submits one extraction task per image to the `TaskDispatcher`.
//! 3. **Collect**: Waits for each vector with a bounded timeout.
//! 4. **Index**: Builds the dataset index through the `IndexService`.

pub mod handlers;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod tests;

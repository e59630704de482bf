//! Progress Reporting Module
//!
//! Long-running operations (index builds, duplicate scans, dataset ingestion)
//! report through a `ProgressNotifier`. Observers decide where progress goes:
//!
//! - **`tracker`**: Latest state per subject in memory, served over HTTP.
//! - **`file`**: `{subject}_progress.txt` files that survive restarts and can be
//!   read back with `read_progress_file`.

pub mod file;
pub mod observer;
pub mod tracker;
pub mod types;

pub use observer::{ProgressNotifier, ProgressObserver};
pub use tracker::ProgressTracker;
pub use types::{MAX_RUNNING_PERCENT, ProgressState, ProgressStatus};

#[cfg(test)]
mod tests;

//! Duplicate Detection Module
//!
//! - **`detector`**: Threshold-based grouping of near-identical vectors and
//!   optional pruning of every group down to its smallest id.
//! - **`cluster`**: Union-find used by the connected-components grouping mode.

pub mod cluster;
pub mod detector;

pub use detector::{DetectorConfig, DuplicateDetector, GroupingMode};

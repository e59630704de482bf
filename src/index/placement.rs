//! Accelerator placement.
//!
//! An index may be mirrored onto an accelerator for faster queries. Placement is
//! best effort: any failure leaves the index on the CPU and is reported once.

use super::ivf::IvfIndex;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Cpu,
    Accelerator { max_query_k: usize },
}

impl Placement {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Placement::Accelerator { .. })
    }

    /// Largest `k` a single query may ask for here.
    pub fn cap_k(&self, k: usize) -> usize {
        match self {
            Placement::Cpu => k,
            Placement::Accelerator { max_query_k } => k.min(*max_query_k),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no accelerator device available")]
    NoDevice,
    #[error("accelerator rejected index: {0}")]
    Rejected(String),
}

pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    fn max_query_k(&self) -> usize;

    /// Copies the index onto the device.
    fn upload(&self, index: &IvfIndex) -> Result<(), PlacementError>;
}

/// The default when the host has no device.
pub struct NoAccelerator;

impl Accelerator for NoAccelerator {
    fn name(&self) -> &str {
        "none"
    }

    fn max_query_k(&self) -> usize {
        0
    }

    fn upload(&self, _index: &IvfIndex) -> Result<(), PlacementError> {
        Err(PlacementError::NoDevice)
    }
}

pub fn try_place(accelerator: &dyn Accelerator, index: &IvfIndex) -> Result<Placement, PlacementError> {
    accelerator.upload(index)?;
    Ok(Placement::Accelerator {
        max_query_k: accelerator.max_query_k(),
    })
}

/// Places indexes, falling back to the CPU. Never fails.
pub struct Placer {
    accelerator: Arc<dyn Accelerator>,
    fallback_logged: AtomicBool,
}

impl Placer {
    pub fn new(accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            accelerator,
            fallback_logged: AtomicBool::new(false),
        }
    }

    pub fn place(&self, index: &IvfIndex) -> Placement {
        match try_place(self.accelerator.as_ref(), index) {
            Ok(placement) => {
                tracing::debug!("Index placed on accelerator {}", self.accelerator.name());
                placement
            }
            Err(e) => {
                if !self.fallback_logged.swap(true, Ordering::SeqCst) {
                    tracing::warn!("Accelerator unavailable, using CPU index: {}", e);
                } else {
                    tracing::debug!("Accelerator placement skipped: {}", e);
                }
                Placement::Cpu
            }
        }
    }
}

use serde::{Deserialize, Serialize};

/// Ceiling for progress reported while work is still running. Only completion reports 100.
pub const MAX_RUNNING_PERCENT: f32 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Last known progress of one long-running operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub subject_id: String,
    /// Always within `[0, 100]`.
    pub percent: f32,
    pub status: ProgressStatus,
    pub message: String,
}

impl ProgressState {
    pub fn pending(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            percent: 0.0,
            status: ProgressStatus::Pending,
            message: String::new(),
        }
    }
}

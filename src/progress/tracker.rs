use super::observer::ProgressObserver;
use super::types::{ProgressState, ProgressStatus};

use dashmap::DashMap;

/// In-memory registry of the latest progress per subject.
#[derive(Default)]
pub struct ProgressTracker {
    states: DashMap<String, ProgressState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &str) -> Option<ProgressState> {
        self.states.get(subject).map(|state| state.clone())
    }

    pub fn subjects(&self) -> Vec<String> {
        self.states.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl ProgressObserver for ProgressTracker {
    fn on_progress(&self, subject: &str, percent: f32, message: &str) {
        let status = if percent >= 100.0 {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Processing
        };
        self.states.insert(
            subject.to_string(),
            ProgressState {
                subject_id: subject.to_string(),
                percent,
                status,
                message: message.to_string(),
            },
        );
    }

    fn on_complete(&self, subject: &str, success: bool, message: &str) {
        let mut entry = self
            .states
            .entry(subject.to_string())
            .or_insert_with(|| ProgressState::pending(subject));

        if success {
            entry.percent = 100.0;
            entry.status = ProgressStatus::Completed;
        } else {
            entry.status = ProgressStatus::Failed;
        }
        entry.message = message.to_string();
    }
}

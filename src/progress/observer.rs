use std::sync::Arc;

/// Receives progress of long-running operations (index builds, duplicate scans).
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, subject: &str, percent: f32, message: &str);

    fn on_complete(&self, subject: &str, success: bool, message: &str);
}

/// Fans progress out to every registered observer.
#[derive(Clone, Default)]
pub struct ProgressNotifier {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Reports `percent`, clamped to `[0, 100]`.
    pub fn notify(&self, subject: &str, percent: f32, message: &str) {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        tracing::trace!("Progress {}: {:.2}% {}", subject, percent, message);
        for observer in &self.observers {
            observer.on_progress(subject, percent, message);
        }
    }

    pub fn complete(&self, subject: &str, success: bool, message: &str) {
        for observer in &self.observers {
            observer.on_complete(subject, success, message);
        }
    }
}

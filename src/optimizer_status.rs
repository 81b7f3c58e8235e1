use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Progress shared between a running search and whoever watches it. Clones
/// share state, so a caller can keep one handle to cancel the search.
#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total: usize,
    completed: usize,
    skipped: usize,
    best_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub best_score: Option<f64>,
    pub cancelled: bool,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(&self, total: usize, completed: usize, skipped: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total = total;
            data.completed = completed;
            data.skipped = skipped;
        }
    }

    /// Keeps the highest score reported so far.
    pub fn offer_score(&self, score: f64) {
        if !score.is_finite() {
            return;
        }
        if let Ok(mut data) = self.inner.lock() {
            if data.best_score.map_or(true, |best| score > best) {
                data.best_score = Some(score);
            }
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        let cancelled = self.is_cancelled();
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total: data.total,
                completed: data.completed,
                skipped: data.skipped,
                best_score: data.best_score,
                cancelled,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total: 0,
                completed: 0,
                skipped: 0,
                best_score: None,
                cancelled,
            }
        }
    }
}

//! Polled event log.
//!
//! Components push [`EngineEvent`]s; callers drain them at their own pace.
//! The log is bounded and drops the oldest entries when full.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::calibration::Progress;
use crate::quality::{AnomalyReport, QualityStatus};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    CalibrationStarted { id: String, kind: String },
    CalibrationProgress { id: String, progress: Progress },
    CalibrationCompleted { id: String, health_score: f64 },
    CalibrationFailed { id: String, reason: String },
    QualityReport { score: f64, status: QualityStatus },
    QualityAlert { anomaly: AnomalyReport },
    TestsStarted { bit_count: usize },
    TestsCompleted { score: f64, passed: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Shared, bounded FIFO of engine events. Clones share the same log.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<Mutex<VecDeque<TimedEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: EngineEvent) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(TimedEvent {
            timestamp_ms: crate::now_ms(),
            event,
        });
    }

    /// Remove and return every queued event, oldest first.
    pub fn drain(&self) -> Vec<TimedEvent> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.drain(..).collect()
    }

    /// Copy of the queued events without removing them.
    pub fn snapshot(&self) -> Vec<TimedEvent> {
        let queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

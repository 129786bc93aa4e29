use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    #[default]
    Idle,
    Downloading,
    Transcoding,
    Merging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: ProgressPhase,
    /// What is being worked on (file name or title).
    pub label: String,
    pub updated_at: DateTime<Utc>,
    pub bytes_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    /// Completed fraction in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
    /// Bytes per second while downloading, fraction per second otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            phase: ProgressPhase::Idle,
            label: String::new(),
            updated_at: Utc::now(),
            bytes_completed: 0,
            bytes_total: None,
            fraction: None,
            throughput: None,
            eta_secs: None,
        }
    }
}

/// Observable progress of the current transfer or pipeline operation.
///
/// Values are monotonic between two calls to [`ProgressHandle::begin`]: a
/// report that would move bytes or fraction backwards is ignored.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
    started: Arc<Mutex<Instant>>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            tx: Arc::new(tx),
            started: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// Reset for a new operation.
    pub fn begin(&self, phase: ProgressPhase, label: impl Into<String>, bytes_total: Option<u64>) {
        *self.started.lock() = Instant::now();
        self.tx.send_replace(ProgressSnapshot {
            phase,
            label: label.into(),
            bytes_total,
            ..Default::default()
        });
    }

    pub fn set_total(&self, bytes_total: u64) {
        self.tx.send_modify(|p| {
            if p.bytes_total.is_none() {
                p.bytes_total = Some(bytes_total);
            }
        });
    }

    /// Record `bytes_completed` bytes written so far.
    pub fn advance_to(&self, bytes_completed: u64) {
        let elapsed = self.started.lock().elapsed();
        self.tx.send_if_modified(|p| {
            if bytes_completed < p.bytes_completed {
                return false;
            }
            p.bytes_completed = bytes_completed;
            p.updated_at = Utc::now();

            if let Some(total) = p.bytes_total.filter(|t| *t > 0) {
                p.fraction = Some((bytes_completed as f64 / total as f64).min(1.0));
            }

            let throughput = bytes_completed as f64 / elapsed.as_secs_f64();
            if throughput.is_finite() && throughput > 0.0 {
                p.throughput = Some(throughput);
                if let Some(total) = p.bytes_total {
                    p.eta_secs = Some(total.saturating_sub(bytes_completed) as f64 / throughput);
                }
            }
            true
        });
    }

    /// Record an estimated completed fraction after `elapsed`.
    ///
    /// Throughput is `fraction / elapsed` and ETA is `(1 - fraction) / throughput`;
    /// both are left untouched when the throughput is not a finite positive number.
    pub fn report_fraction(&self, fraction: f64, elapsed: Duration) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        self.tx.send_if_modified(|p| {
            if p.fraction.is_some_and(|f| fraction < f) {
                return false;
            }
            p.fraction = Some(fraction);
            p.updated_at = Utc::now();

            let throughput = fraction / elapsed.as_secs_f64();
            if throughput.is_finite() && throughput > 0.0 {
                p.throughput = Some(throughput);
                p.eta_secs = Some((1.0 - fraction) / throughput);
            }
            true
        });
    }

    /// Mark the operation as finished.
    pub fn finish(&self) {
        self.tx.send_modify(|p| {
            p.phase = ProgressPhase::Idle;
            p.eta_secs = None;
            p.updated_at = Utc::now();
        });
    }
}

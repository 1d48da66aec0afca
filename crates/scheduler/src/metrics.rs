use std::sync::atomic::{AtomicU64, Ordering};

use formpilot_core_types::JobStatus;
use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    started: AtomicU64,
    applied: AtomicU64,
    manual: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn record_submitted(&self) {
        increment(&self.submitted);
    }

    pub fn record_started(&self) {
        increment(&self.started);
    }

    pub fn record_cancelled(&self) {
        increment(&self.cancelled);
    }

    pub fn record_finished(&self, status: JobStatus) {
        match status {
            JobStatus::Applied => increment(&self.applied),
            JobStatus::ManualRequired => increment(&self.manual),
            _ => increment(&self.failed),
        }
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            manual_required: self.manual.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub applied: u64,
    pub manual_required: u64,
    pub failed: u64,
    /// Stopped while still queued
    pub cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_bucket() {
        let counters = Counters::default();
        counters.record_submitted();
        counters.record_started();
        counters.record_finished(JobStatus::ManualRequired);
        counters.record_finished(JobStatus::Failed);
        let snap = counters.snapshot();
        assert_eq!(snap.submitted, 1);
        assert_eq!(snap.manual_required, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.applied, 0);
    }
}

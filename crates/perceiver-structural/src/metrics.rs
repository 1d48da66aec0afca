//! Process-wide build and diff counters, reported by `formpilot snapshot`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static SNAPSHOT_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_ELEMENTS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_NS: AtomicU64 = AtomicU64::new(0);

static DIFF_TOTAL: AtomicU64 = AtomicU64::new(0);
static DIFF_LAT_NS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub snapshot: MetricCounter,
    pub avg_elements: f64,
    pub diff: MetricCounter,
}

pub fn record_snapshot(elements: usize, duration: Duration) {
    SNAPSHOT_TOTAL.fetch_add(1, Ordering::Relaxed);
    SNAPSHOT_ELEMENTS.fetch_add(elements as u64, Ordering::Relaxed);
    SNAPSHOT_LAT_NS.fetch_add(duration_to_nanos(duration), Ordering::Relaxed);
}

pub fn record_diff(duration: Duration) {
    DIFF_TOTAL.fetch_add(1, Ordering::Relaxed);
    DIFF_LAT_NS.fetch_add(duration_to_nanos(duration), Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    let total = SNAPSHOT_TOTAL.load(Ordering::Relaxed);
    let avg_elements = if total == 0 {
        0.0
    } else {
        SNAPSHOT_ELEMENTS.load(Ordering::Relaxed) as f64 / total as f64
    };
    MetricSnapshot {
        snapshot: make_counter(total, SNAPSHOT_LAT_NS.load(Ordering::Relaxed)),
        avg_elements,
        diff: make_counter(
            DIFF_TOTAL.load(Ordering::Relaxed),
            DIFF_LAT_NS.load(Ordering::Relaxed),
        ),
    }
}

fn make_counter(total: u64, nanos: u64) -> MetricCounter {
    let avg_ms = if total == 0 {
        0.0
    } else {
        (nanos as f64 / total as f64) / 1_000_000.0
    };
    MetricCounter { total, avg_ms }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

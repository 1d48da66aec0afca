use std::time::Duration;

use tracing::debug;

use crate::metrics;
use crate::model::SemanticSnapshot;

pub fn emit_snapshot(snapshot: &SemanticSnapshot, duration: Duration) {
    metrics::record_snapshot(snapshot.elements.len(), duration);
    debug!(
        target: "perceiver.events",
        epoch = snapshot.epoch.0,
        page_version = snapshot.page_version,
        domain = %snapshot.domain,
        path = %snapshot.normalized_path,
        elements = snapshot.elements.len(),
        errors = snapshot.errors.len(),
        required_unfilled = snapshot.required_unfilled.len(),
        submit_candidates = snapshot.submit_candidates.len(),
        "structural.snapshot.built"
    );
}

pub fn emit_diff(change_count: usize, duration: Duration) {
    metrics::record_diff(duration);
    debug!(
        target: "perceiver.events",
        change_count,
        "structural.diff.generated"
    );
}

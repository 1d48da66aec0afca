use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use formpilot_core_types::{EventKind, JobId, WorkflowEvent};

use crate::EventBus;

/// Ordered event stream of one job.
///
/// Sequence numbers are assigned here so every component emitting on behalf
/// of the job shares one monotonic counter. Events are kept in memory for the
/// job record and forwarded to an optional bus for live subscribers.
pub struct JobJournal {
    job_id: JobId,
    seq: AtomicU64,
    step: AtomicU32,
    events: Mutex<Vec<WorkflowEvent>>,
    bus: Option<Arc<dyn EventBus<WorkflowEvent>>>,
}

impl JobJournal {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            seq: AtomicU64::new(0),
            step: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus<WorkflowEvent>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn set_step(&self, step: u32) {
        self.step.store(step, Ordering::SeqCst);
    }

    pub fn step(&self) -> u32 {
        self.step.load(Ordering::SeqCst)
    }

    pub async fn emit(&self, kind: EventKind, payload: Value) -> WorkflowEvent {
        let event = {
            // Assign seq under the lock so stored order matches seq order.
            let mut events = self.events.lock();
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let event = WorkflowEvent::new(self.job_id.clone(), seq, self.step(), kind, payload);
            events.push(event.clone());
            event
        };
        debug!(
            target: "workflow.events",
            job = %event.job_id,
            seq = event.seq,
            step = event.step,
            kind = %event.kind,
            payload = %event.payload,
            "event"
        );
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(event.clone()).await {
                warn!(target: "workflow.events", error = %err, "event publish failed");
            }
        }
        event
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|ev| ev.kind == kind).count()
    }

    pub fn last(&self, kind: EventKind) -> Option<WorkflowEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|ev| ev.kind == kind)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBus;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_is_monotonic_and_step_is_stamped() {
        let journal = JobJournal::new(JobId::from("job-1"));
        journal.set_step(1);
        journal.emit(EventKind::SnapshotGenerated, json!({})).await;
        journal.set_step(2);
        journal.emit(EventKind::PlanProposed, json!({"action": "submit"})).await;

        let events = journal.events();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(events[1].step, 2);
        assert_eq!(journal.count(EventKind::PlanProposed), 1);
    }

    #[tokio::test]
    async fn events_are_forwarded_to_the_bus() {
        let bus = InMemoryBus::<WorkflowEvent>::new(8);
        let mut rx = bus.subscribe();
        let journal = JobJournal::new(JobId::from("job-2")).with_bus(bus.clone());
        journal.emit(EventKind::Finalized, json!({"status": "applied"})).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::Finalized);
        assert_eq!(received.seq, 1);
    }
}

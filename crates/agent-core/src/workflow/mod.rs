//! Job workflow: configuration, run state, screenshot policy and the
//! phase machine that drives one job to a terminal state.

mod config;
mod controller;
mod state;
mod visual;

pub use config::{WorkflowConfig, MAX_CHAIN_LEN};
pub use controller::{WorkflowOrchestrator, WorkflowReport};
pub use state::{structured_reason, RunControl, RunSignal, Termination};
pub use visual::{
    visual_trigger, VisualBudget, VisualContext, VisualTrigger, BOOTSTRAP_STEPS,
    SPARSE_ELEMENT_THRESHOLD,
};

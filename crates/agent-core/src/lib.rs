//! Governance core of the FormPilot agent.
//!
//! The decision service proposes actions; everything here decides whether
//! they run, whether they worked and when a job has to stop:
//!
//! - [`intent`] and [`loop_guard`]: semantic identity of actions and the
//!   per-job circuit breaker keyed by it
//! - [`decision`]: oracle trait, OpenAI-compatible model adapter with
//!   fallback, and decision parsing
//! - [`workflow`]: the phase machine, its configuration and operator controls
//! - [`store`]: job records and the checkpoint store contract

pub mod decision;
pub mod errors;
pub mod intent;
pub mod loop_guard;
pub mod prompt;
pub mod session;
pub mod store;
pub mod terminal_guard;
pub mod workflow;

pub use decision::{
    Decision, DecisionAdapter, DecisionConfig, DecisionOracle, DecisionRequest, DecisionStatus,
    ScriptedChatModel,
};
pub use errors::{AgentError, DecisionError};
pub use intent::{ActionSemantics, Intent, IntentEngine};
pub use loop_guard::{Escalation, LoopGuard, LoopGuardState, SemanticKey};
pub use session::{JobSession, JobSpec};
pub use store::{JobRecord, JobStore};
pub use terminal_guard::raw_response_implies_completion;
pub use workflow::{
    RunControl, RunSignal, Termination, WorkflowConfig, WorkflowOrchestrator, WorkflowReport,
};

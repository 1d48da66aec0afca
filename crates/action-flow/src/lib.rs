//! Action execution layer
//!
//! Runs one [`action_primitives::ActionPlan`] against the snapshot it was
//! derived from, re-observes the page and hands the before/after pair to the
//! gate verifier. Also holds the pacing tactics used between submit retries.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod types;

pub use errors::FlowError;
pub use executor::{resolve_target, ActionExecutor, DefaultActionExecutor};
pub use strategies::{DefaultRetryHandler, RetryHandler, RetryPacing, RetryTactic};
pub use types::{ActionResult, ExecutorConfig, ResolvedTarget};

//! Action layer primitives.
//!
//! - [`ActionPlan`]: the closed set of actions the decision service may propose
//! - [`ActionPrimitives`]: browser-side operations addressed by node key
//! - [`ScriptedPage`]: deterministic in-memory page implementing both browser ports

pub mod errors;
pub mod plan;
mod primitives;
pub mod scripted;
pub mod types;

pub use errors::*;
pub use plan::*;
pub use primitives::*;
pub use scripted::{ClickRule, PageScript, PageTransition, ScriptedPage};
pub use types::*;

//! Post-action gate.
//!
//! - Verifier: checks an action's success criteria against the re-observed page
//! - Outcome classifier: assigns one outcome class after every submit
//! - Completion assessment: weighted multi-signal "are we really done" score

pub mod completion;
pub mod errors;
pub mod outcome;
pub mod types;
pub mod validator;

pub use completion::*;
pub use errors::*;
pub use outcome::*;
pub use types::*;
pub use validator::*;

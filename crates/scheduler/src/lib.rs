//! Runs independent FormPilot jobs side by side.
//!
//! Every job gets its own browser session from a [`SessionFactory`], its own
//! decision oracle from an [`OracleFactory`] and its own orchestrator task; a semaphore caps how many run at once. Operators steer
//! jobs through [`Scheduler::pause`], [`Scheduler::resume`] and
//! [`Scheduler::stop`], which are honoured at the job's next phase boundary.

pub mod error;
pub mod metrics;
pub mod model;
pub mod runtime;
pub mod store;

pub use error::SchedulerError;
pub use metrics::SchedulerMetricsSnapshot;
pub use model::{JobHandle, OracleFactory, SchedulerConfig, SessionFactory};
pub use runtime::Scheduler;
pub use store::InMemoryJobStore;

//! FormPilot library
//!
//! Exposes the CLI building blocks for integration testing

pub mod cli;
pub mod config;
pub mod fixture;

pub use config::{AppConfig, LoadedConfig};
pub use fixture::{Fixture, ScriptedModel, ScriptedReply};

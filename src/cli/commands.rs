use clap::Subcommand;

use super::batch::BatchArgs;
use super::classify::ClassifyArgs;
use super::config::ConfigArgs;
use super::run::RunArgs;
use super::snapshot::SnapshotArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run a scripted application scenario through the full workflow
    Run(RunArgs),

    /// Run several scenarios through the worker pool, streaming their events
    Batch(BatchArgs),

    /// Build a semantic snapshot and form graph from a raw page file
    Snapshot(SnapshotArgs),

    /// Classify post-submit page text and assess completion
    Classify(ClassifyArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

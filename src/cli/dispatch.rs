use super::batch::cmd_batch;
use super::classify::cmd_classify;
use super::config::cmd_config;
use super::env::CliArgs;
use super::run::cmd_run;
use super::snapshot::cmd_snapshot;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Batch(args) => cmd_batch(args, ctx).await,
        Commands::Snapshot(args) => cmd_snapshot(args, ctx).await,
        Commands::Classify(args) => cmd_classify(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx),
    }
}

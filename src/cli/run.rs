use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{WorkflowOrchestrator, WorkflowReport};
use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::context::CliContext;
use super::output::{print_json, OutputFormat};
use crate::fixture::Fixture;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Scenario file: page script plus scripted model replies (YAML)
    #[arg(long, value_name = "FILE")]
    pub fixture: PathBuf,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let fixture = Fixture::load(&args.fixture).await?;
    let config = ctx.config();
    let workflow = fixture
        .workflow
        .clone()
        .unwrap_or_else(|| config.workflow.clone());
    let (page, session) = fixture.session();
    let adapter = Arc::new(fixture.adapter()?);
    info!(
        job = %fixture.job_id,
        models = ?adapter.model_names(),
        "running fixture"
    );

    let report = WorkflowOrchestrator::new(fixture.spec(), session, adapter, workflow)
        .context("Invalid workflow configuration")?
        .with_snapshot_config(config.snapshot.clone())
        .with_intent_overrides(config.intents.clone())
        .run()
        .await
        .context("Workflow aborted")?;

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report, &page.actions()),
    }
    Ok(())
}

fn print_report(report: &WorkflowReport, actions: &[String]) {
    let record = &report.record;
    println!("job:      {}", record.job_id);
    println!("status:   {}", record.status.as_str());
    println!("reason:   {}", report.termination.reason());
    if let Some(class) = &record.failure_class {
        println!("failure:  {} ({})", class, record.failure_code.as_deref().unwrap_or("-"));
    }
    println!(
        "steps: {}  decisions: {}  actions: {}  screenshots: {}  retries: {}",
        record.steps, report.decisions, report.actions, report.screenshots, record.retry_count
    );
    if !actions.is_empty() {
        println!("browser:  {}", actions.join(", "));
    }
    println!("events:");
    for event in &report.events {
        println!(
            "  #{:<3} step {:<2} {:<30} {}",
            event.seq,
            event.step,
            event.kind.as_str(),
            event.payload
        );
    }
}

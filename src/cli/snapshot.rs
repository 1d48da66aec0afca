use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use perceiver_structural::{metrics, FormGraph, RawPage, SnapshotBuilder};
use serde_json::json;

use super::context::CliContext;
use super::output::{print_json, OutputFormat};

const FORM_FIELD_LIMIT: usize = 60;

#[derive(Args, Clone, Debug)]
pub struct SnapshotArgs {
    /// Raw page (JSON): url, title, visible_text, version, nodes
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

pub async fn cmd_snapshot(args: SnapshotArgs, ctx: &CliContext) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.page)
        .await
        .with_context(|| format!("Failed to read page {}", args.page.display()))?;
    let page: RawPage = serde_json::from_str(&content)
        .with_context(|| format!("Invalid page JSON in {}", args.page.display()))?;

    let snapshot = SnapshotBuilder::new(ctx.config().snapshot.clone()).build(&page);
    let form = FormGraph::from_snapshot(&snapshot).render(FORM_FIELD_LIMIT);

    match args.output {
        OutputFormat::Json => print_json(&json!({
            "snapshot": snapshot,
            "form": form,
            "metrics": metrics::snapshot(),
        }))?,
        OutputFormat::Text => {
            println!("url:       {}", snapshot.url);
            println!("scope:     {}{}", snapshot.domain, snapshot.normalized_path);
            println!("title:     {}", snapshot.title);
            println!(
                "elements:  {} ({} actionable)",
                snapshot.elements.len(),
                snapshot.actionable_count()
            );
            for error in &snapshot.errors {
                println!("error:     {error}");
            }
            for field in &snapshot.required_unfilled {
                println!("unfilled:  {field}");
            }
            println!();
            println!("{form}");
        }
    }
    Ok(())
}

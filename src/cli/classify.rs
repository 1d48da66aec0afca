use std::path::PathBuf;

use action_gate::{assess_completion, CompletionInput, OutcomeClassifier, PostSubmitEvidence};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::context::CliContext;
use super::output::{print_json, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ClassifyArgs {
    /// Visible page text after the submit
    #[arg(long, value_name = "FILE")]
    pub text: PathBuf,

    /// Page URL after the submit
    #[arg(long, default_value = "")]
    pub url: String,

    /// A submit button is still on the page
    #[arg(long)]
    pub submit_visible: bool,

    /// The page shows a form error
    #[arg(long)]
    pub has_error: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

pub async fn cmd_classify(args: ClassifyArgs, ctx: &CliContext) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.text)
        .await
        .with_context(|| format!("Failed to read {}", args.text.display()))?;

    let evidence = PostSubmitEvidence {
        visible_text: text.clone(),
        url_after: args.url.clone(),
        errors: if args.has_error {
            vec![first_line(&text)]
        } else {
            Vec::new()
        },
        submit_visible: args.submit_visible,
        ..PostSubmitEvidence::default()
    };
    let outcome = OutcomeClassifier::new().classify(&evidence);
    let completion = assess_completion(
        CompletionInput {
            body_text: &text,
            current_url: &args.url,
            has_submit_button: args.submit_visible,
            has_error: args.has_error,
        },
        ctx.config().workflow.completion_threshold,
    );

    match args.output {
        OutputFormat::Json => print_json(&json!({ "outcome": outcome, "completion": completion }))?,
        OutputFormat::Text => {
            println!("outcome:    {}", outcome.outcome_class);
            println!("code:       {}", outcome.failure_code);
            println!("confidence: {:.2}", outcome.confidence);
            println!("retryable:  {}", outcome.retryable);
            println!("evidence:   {}", outcome.evidence_snippet);
            println!(
                "completion: {} (score {:.2}, {})",
                if completion.confirmed { "confirmed" } else { "not confirmed" },
                completion.score,
                completion.reason
            );
        }
    }
    Ok(())
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

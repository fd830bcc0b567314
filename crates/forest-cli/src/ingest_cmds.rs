//! `forest ingest` and `forest generate` commands.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use forest_core::ingest::{IngestReport, IngestRequest, IngestionPipeline};
use forest_core::intelligence::CommandProvider;
use forest_store::DocumentStore;

/// Target and inputs shared by both commands.
#[derive(Debug)]
pub struct IngestArgs {
    pub project_id: String,
    pub path: String,
    pub goal: Option<String>,
    pub context: Option<String>,
}

/// Fill goal and context from the project config when not given.
async fn build_request(store: &DocumentStore, args: &IngestArgs) -> Result<IngestRequest> {
    let project = store.load_project(&args.project_id).await?;

    let goal = match (&args.goal, &project) {
        (Some(goal), _) => goal.clone(),
        (None, Some(project)) => project.goal.clone(),
        (None, None) => bail!(
            "no goal for {}: pass --goal or create the project first",
            args.project_id
        ),
    };
    let context = args
        .context
        .clone()
        .or_else(|| project.map(|p| p.context))
        .unwrap_or_default();

    Ok(IngestRequest::new(&args.project_id, &args.path, goal, context))
}

fn print_report(report: &IngestReport) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("failed to serialize report")?
    );
    Ok(())
}

/// Ingest a stored response. Input that is not JSON is treated as a plain
/// text response.
pub async fn run_ingest(
    store: &DocumentStore,
    args: &IngestArgs,
    file: Option<&Path>,
) -> Result<()> {
    let request = build_request(store, args).await?;
    let raw = crate::read_input(file).await?;
    let response = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));

    let report = IngestionPipeline::new(store.clone())
        .ingest(&request, &response)
        .await
        .with_context(|| format!("failed to ingest into {}/{}", args.project_id, args.path))?;
    print_report(&report)
}

pub async fn run_generate(
    store: &DocumentStore,
    args: &IngestArgs,
    provider_command: &str,
    timeout: Duration,
) -> Result<()> {
    let request = build_request(store, args).await?;
    let provider = CommandProvider::from_command_line(provider_command)
        .context("provider command is empty")?;

    // Ctrl+C abandons the provider call; the fallback tree is still written.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        eprintln!("\nCancelling provider request...");
        cancel_clone.cancel();
    });

    let report = IngestionPipeline::new(store.clone())
        .ingest_from_provider(&provider, &request, timeout, &cancel)
        .await
        .with_context(|| format!("failed to ingest into {}/{}", args.project_id, args.path))?;
    print_report(&report)
}

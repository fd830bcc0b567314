//! The ingestion pipeline: response in, merged HTA tree on disk.
//!
//! ```text
//! Requested -> Parsing -> Parsed   -> Validating -> Persisted
//!                      \-> Fallback -/
//! ```
//!
//! Collaborator problems (provider errors, unrecognized or empty responses)
//! all route to `Fallback`, which cannot fail. The only errors that reach
//! the caller come from the store: I/O, lock timeouts, bad identifiers.
//!
//! A persisted tree always has at least one open task. When a merge adds
//! nothing and the frontier is empty (every incoming task was already
//! completed), fallback tasks are merged again against the frontier alone.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use forest_store::{DocumentStore, Resource, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fallback;
use super::groups::{BranchPlan, normalize_groups};
use super::merge::{DedupScope, MergeStats, merge_plans, open_task_count};
use super::parser::{ParseStrategy, parse_response};
use crate::intelligence::{
    IntelligenceProvider, IntelligenceRequest, RequestKind, build_decomposition_prompt,
    request_with_deadline,
};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where an ingestion run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Requested,
    Parsing,
    Parsed,
    Fallback,
    Validating,
    Persisted,
}

impl IngestState {
    /// Check whether `from -> to` is an edge of the pipeline graph.
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Requested, Self::Parsing)
                | (Self::Parsing, Self::Parsed)
                | (Self::Parsing, Self::Fallback)
                | (Self::Parsed, Self::Validating)
                | (Self::Fallback, Self::Validating)
                | (Self::Validating, Self::Persisted)
        )
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Parsing => "parsing",
            Self::Parsed => "parsed",
            Self::Fallback => "fallback",
            Self::Validating => "validating",
            Self::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

/// States visited by one run, in order.
#[derive(Debug)]
struct StateTrail(Vec<IngestState>);

impl StateTrail {
    fn new() -> Self {
        Self(vec![IngestState::Requested])
    }

    fn current(&self) -> IngestState {
        self.0.last().copied().unwrap_or(IngestState::Requested)
    }

    fn advance(&mut self, to: IngestState) {
        let from = self.current();
        debug_assert!(
            IngestState::is_valid_transition(from, to),
            "invalid ingest transition: {from} -> {to}"
        );
        debug!(%from, %to, "ingest transition");
        self.0.push(to);
    }
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Where the persisted groups came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    Parsed,
    Fallback,
}

impl fmt::Display for IngestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Fallback => "fallback",
        })
    }
}

/// Which tree to ingest into, and what it is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub project_id: String,
    pub path_name: String,
    pub goal: String,
    pub context: String,
}

impl IngestRequest {
    pub fn new(
        project_id: impl Into<String>,
        path_name: impl Into<String>,
        goal: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            path_name: path_name.into(),
            goal: goal.into(),
            context: context.into(),
        }
    }
}

/// Outcome of one ingestion run.
///
/// `branch_count` and `task_count` describe the persisted tree
/// (`strategicBranches` and `frontierNodes`), not just what this run added.
/// `frontier_refilled` is set when fallback tasks were added because the
/// frontier would otherwise have been left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub source: IngestSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ParseStrategy>,
    pub branch_count: usize,
    pub task_count: usize,
    pub added_branches: usize,
    pub reused_branches: usize,
    pub added_tasks: usize,
    pub skipped_tasks: usize,
    pub frontier_refilled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub states: Vec<IngestState>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives responses through parse/fallback, merge and persist.
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    store: DocumentStore,
}

/// Plans chosen by the parse stage, or the reason they could not be.
type Parsed = Result<(ParseStrategy, Vec<BranchPlan>), String>;

impl IngestionPipeline {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Ingest an already-received provider response.
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        response: &Value,
    ) -> Result<IngestReport, StoreError> {
        let mut trail = StateTrail::new();
        trail.advance(IngestState::Parsing);
        let parsed = parse_plans(response);
        self.finish(request, trail, parsed).await
    }

    /// Ask `provider` for a decomposition of the request's goal, then ingest
    /// the answer.
    ///
    /// Provider errors, the `timeout` elapsing and `cancel` firing all
    /// continue on the fallback path; the tree is still written.
    pub async fn ingest_from_provider(
        &self,
        provider: &dyn IntelligenceProvider,
        request: &IngestRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, StoreError> {
        let prompt = build_decomposition_prompt(&request.goal, &request.context);
        debug!(
            provider = provider.name(),
            project_id = %request.project_id,
            "requesting decomposition"
        );
        let response = request_with_deadline(
            provider,
            RequestKind::HtaDecomposition,
            &IntelligenceRequest::new(prompt),
            timeout,
            cancel,
        )
        .await;

        let mut trail = StateTrail::new();
        trail.advance(IngestState::Parsing);
        let parsed = match response {
            Ok(response) => parse_plans(&response),
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "provider request failed");
                Err(e.to_string())
            }
        };
        self.finish(request, trail, parsed).await
    }

    async fn finish(
        &self,
        request: &IngestRequest,
        mut trail: StateTrail,
        parsed: Parsed,
    ) -> Result<IngestReport, StoreError> {
        let (source, strategy, plans, fallback_reason) = match parsed {
            Ok((strategy, plans)) => {
                trail.advance(IngestState::Parsed);
                (IngestSource::Parsed, Some(strategy), plans, None)
            }
            Err(reason) => {
                trail.advance(IngestState::Fallback);
                let plans = fallback::synthesize(&request.goal, &request.context);
                (IngestSource::Fallback, None, plans, Some(reason))
            }
        };

        trail.advance(IngestState::Validating);
        let mut stats = MergeStats::default();
        let mut frontier_refilled = false;
        let written = self
            .store
            .update(
                &request.project_id,
                &Resource::tree(request.path_name.as_str()),
                |existing| {
                    let now = Utc::now();
                    let new_id = || Uuid::new_v4().to_string();
                    let (mut document, mut merged) = merge_plans(
                        existing,
                        &request.goal,
                        &plans,
                        DedupScope::AllTasks,
                        now,
                        new_id,
                    )?;
                    if open_task_count(&document) == 0 {
                        let refill = fallback::synthesize(&request.goal, &request.context);
                        let (refilled, added) = merge_plans(
                            Some(document),
                            &request.goal,
                            &refill,
                            DedupScope::Frontier,
                            now,
                            new_id,
                        )?;
                        document = refilled;
                        merged += added;
                        frontier_refilled = true;
                    }
                    stats = merged;
                    Ok(document)
                },
            )
            .await?;
        trail.advance(IngestState::Persisted);

        let count = |field: &str| written.get(field).and_then(Value::as_array).map_or(0, Vec::len);
        let report = IngestReport {
            source,
            strategy,
            branch_count: count("strategicBranches"),
            task_count: count("frontierNodes"),
            added_branches: stats.added_branches,
            reused_branches: stats.reused_branches,
            added_tasks: stats.added_tasks,
            skipped_tasks: stats.skipped_tasks,
            frontier_refilled,
            fallback_reason,
            states: trail.0,
        };

        info!(
            project_id = %request.project_id,
            path = %request.path_name,
            source = %report.source,
            branches = report.branch_count,
            tasks = report.task_count,
            added_tasks = report.added_tasks,
            skipped_tasks = report.skipped_tasks,
            refilled = report.frontier_refilled,
            "ingestion complete"
        );
        Ok(report)
    }
}

/// Parse and normalize a response. An unrecognized response, or one whose
/// groups hold no usable task, is a miss.
fn parse_plans(response: &Value) -> Parsed {
    let outcome = parse_response(response);
    let Some(strategy) = outcome.strategy() else {
        return Err("response not recognized".to_owned());
    };
    let plans = outcome
        .into_groups()
        .map(|groups| normalize_groups(&groups))
        .unwrap_or_default();
    if plans.is_empty() {
        return Err(format!("{strategy} groups held no usable tasks"));
    }
    Ok((strategy, plans))
}

//! Merging new branch plans into a persisted HTA tree document.
//!
//! The merge works on the raw JSON document rather than a typed
//! [`HtaTree`](forest_store::HtaTree): existing branches and tasks are never
//! decoded and re-encoded, so whatever other producers stored in them
//! survives byte-for-byte. Only new nodes are built from typed values.

use std::collections::HashSet;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use forest_store::models::lenient;
use forest_store::{Branch, Task, validate_tree};
use serde::Serialize;
use serde_json::{Map, Value};

use super::groups::{BranchPlan, slugify};

/// Task keys that belong to the typed fields, never to `extra`.
const RESERVED_TASK_KEYS: [&str; 2] = ["branch", "completed"];

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub added_branches: usize,
    pub reused_branches: usize,
    pub added_tasks: usize,
    pub skipped_tasks: usize,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.added_branches += other.added_branches;
        self.reused_branches += other.reused_branches;
        self.added_tasks += other.added_tasks;
        self.skipped_tasks += other.skipped_tasks;
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    value
        .cloned()
        .and_then(lenient::scalar_to_string)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn text_field(node: &Value, key: &str) -> Option<String> {
    text_of(node.get(key))
}

/// Move a collection out of the root. Writing it back with `insert` keeps
/// the key's original position.
fn take_array(root: &mut Map<String, Value>, field: &str) -> Vec<Value> {
    match root.get_mut(field) {
        Some(Value::Array(items)) => std::mem::take(items),
        _ => Vec::new(),
    }
}

/// Which existing tasks make an incoming task a duplicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupScope {
    /// Skip tasks already open in the frontier or in the completed history.
    #[default]
    AllTasks,
    /// Skip only tasks already open in the frontier. An incoming id that is
    /// taken anywhere in the tree is replaced by a fresh one.
    Frontier,
}

/// Identity of tasks already in the tree, by id and by `(branch, title)`.
#[derive(Default)]
struct KnownTasks {
    ids: HashSet<String>,
    placements: HashSet<(String, String)>,
}

impl KnownTasks {
    fn placement(branch: &str, title: &str) -> (String, String) {
        (branch.to_lowercase(), title.to_lowercase())
    }

    fn record(&mut self, id: Option<&str>, branch: &str, title: &str) {
        if let Some(id) = id {
            self.ids.insert(id.to_owned());
        }
        self.placements.insert(Self::placement(branch, title));
    }

    fn observe(&mut self, task: &Value) {
        let id = text_field(task, "id");
        let branch = text_field(task, "branch").unwrap_or_default();
        let title = text_field(task, "title").unwrap_or_default();
        self.record(id.as_deref(), &branch, &title);
    }

    fn has_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// The title already sits under the branch, referenced by id or title.
    fn has_placement(&self, branch: &ExistingBranch, title: &str) -> bool {
        self.placements.contains(&Self::placement(&branch.id, title))
            || self.placements.contains(&Self::placement(&branch.title, title))
    }
}

struct ExistingBranch {
    id: String,
    title: String,
}

/// Merge `plans` into `document` and stamp it with `now`.
///
/// - Existing branches keep their position; a plan whose title matches one
///   (ignoring case) reuses it, otherwise a new branch is appended.
/// - A task is skipped when its id, or its title under the same branch,
///   already exists among the tasks `scope` names.
/// - Tasks without a usable id get one from `next_id`.
/// - `goal` and `created` are only set when missing; `lastUpdated` is
///   always refreshed. Everything else in the document is left alone.
pub fn merge_plans(
    document: Option<Value>,
    goal: &str,
    plans: &[BranchPlan],
    scope: DedupScope,
    now: DateTime<Utc>,
    mut next_id: impl FnMut() -> String,
) -> Result<(Value, MergeStats), serde_json::Error> {
    let document = document.unwrap_or_else(|| Value::Object(Map::new()));
    let mut root = match validate_tree(document).document {
        Value::Object(root) => root,
        _ => Map::new(),
    };

    let mut stats = MergeStats::default();

    let mut open = KnownTasks::default();
    let mut done = KnownTasks::default();
    for (field, known) in [("frontierNodes", &mut open), ("completedNodes", &mut done)] {
        for task in root.get(field).and_then(Value::as_array).into_iter().flatten() {
            known.observe(task);
        }
    }

    let mut branch_values = take_array(&mut root, "strategicBranches");
    let mut frontier = take_array(&mut root, "frontierNodes");

    let mut branches: Vec<ExistingBranch> = branch_values
        .iter()
        .map(|b| {
            let title = text_field(b, "title").unwrap_or_default();
            ExistingBranch {
                id: text_field(b, "id").unwrap_or_else(|| title.clone()),
                title,
            }
        })
        .collect();
    let mut branch_ids: HashSet<String> = branches.iter().map(|b| b.id.clone()).collect();
    let mut next_order = branch_values
        .iter()
        .filter_map(|b| b.get("order").and_then(Value::as_u64))
        .filter_map(|order| u32::try_from(order).ok())
        .map(|order| order.saturating_add(1))
        .max()
        .unwrap_or(1)
        .max(u32::try_from(branch_values.len() + 1).unwrap_or(u32::MAX));

    for plan in plans {
        let title = plan.title.trim();
        let index = match branches.iter().position(|b| b.title.eq_ignore_ascii_case(title)) {
            Some(index) => {
                stats.reused_branches += 1;
                index
            }
            None => {
                let id = unique_branch_id(title, &mut branch_ids);
                let branch = Branch {
                    id: id.clone(),
                    title: title.to_owned(),
                    description: plan.description.clone(),
                    order: next_order,
                    extra: Map::new(),
                };
                next_order = next_order.saturating_add(1);
                branch_values.push(serde_json::to_value(&branch)?);
                branches.push(ExistingBranch {
                    id,
                    title: title.to_owned(),
                });
                stats.added_branches += 1;
                branches.len() - 1
            }
        };
        let branch = &branches[index];

        for planned in &plan.tasks {
            let taken = |id: &str| open.has_id(id) || done.has_id(id);
            let duplicate = match scope {
                DedupScope::AllTasks => {
                    planned.id.as_deref().is_some_and(taken)
                        || open.has_placement(branch, &planned.title)
                        || done.has_placement(branch, &planned.title)
                }
                DedupScope::Frontier => open.has_placement(branch, &planned.title),
            };
            if duplicate {
                stats.skipped_tasks += 1;
                continue;
            }
            let id = planned
                .id
                .clone()
                .filter(|id| !taken(id.as_str()))
                .unwrap_or_else(&mut next_id);
            let mut extra = planned.extra.clone();
            for key in RESERVED_TASK_KEYS {
                extra.remove(key);
            }
            let task = Task {
                id: id.clone(),
                title: planned.title.clone(),
                description: planned.description.clone(),
                branch: branch.id.clone(),
                duration: planned.duration.clone(),
                difficulty: planned.difficulty,
                prerequisites: planned.prerequisites.clone(),
                completed: false,
                extra,
            };
            open.record(Some(&id), &branch.id, &planned.title);
            frontier.push(serde_json::to_value(&task)?);
            stats.added_tasks += 1;
        }
    }

    root.insert("strategicBranches".into(), Value::Array(branch_values));
    root.insert("frontierNodes".into(), Value::Array(frontier));

    let goal = goal.trim();
    if text_of(root.get("goal")).is_none() && !goal.is_empty() {
        root.insert("goal".into(), Value::String(goal.to_owned()));
    }
    let stamp = serde_json::to_value(now)?;
    if !root.contains_key("created") {
        root.insert("created".into(), stamp.clone());
    }
    root.insert("lastUpdated".into(), stamp);

    Ok((Value::Object(root), stats))
}

/// Frontier entries that are still to do.
pub fn open_task_count(document: &Value) -> usize {
    document
        .get("frontierNodes")
        .and_then(Value::as_array)
        .map_or(0, |tasks| {
            tasks
                .iter()
                .filter(|task| task.is_object())
                .filter(|task| !matches!(task.get("completed"), Some(Value::Bool(true))))
                .count()
        })
}

fn unique_branch_id(title: &str, taken: &mut HashSet<String>) -> String {
    let base = format!("branch-{}", slugify(title));
    let mut candidate = base.clone();
    let mut suffix = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}-{suffix}");
        suffix += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

//! Normalizing raw branch/task groups into [`BranchPlan`]s.
//!
//! Parsed responses are loosely shaped: groups may carry `title`, `name`,
//! `branch_name` or `branchName`; tasks may be objects or bare strings; some
//! responses skip the grouping entirely and list tasks directly. Everything
//! is folded into one canonical shape here, and entries that carry nothing
//! usable (no title) are dropped.

use forest_store::models::lenient;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Branch that collects tasks listed without a group.
pub const LOOSE_TASKS_BRANCH: &str = "Core Tasks";

/// Keys accepted as a group's title, in priority order.
const GROUP_TITLE_KEYS: [&str; 5] = ["title", "name", "branch_name", "branchName", "branch"];

/// One strategic branch and the tasks to add under it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchPlan {
    pub title: String,
    pub description: Option<String>,
    pub tasks: Vec<TaskSpec>,
}

/// A task as proposed by a response or the fallback synthesizer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskSpec {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_position")]
    pub difficulty: Option<u32>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub prerequisites: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskSpec {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Decode a task from an object or a bare string. Returns `None` when
    /// no non-blank title can be found.
    fn from_value(value: &Value) -> Option<Self> {
        let mut planned = match value {
            Value::String(title) => Self::titled(title.as_str()),
            Value::Object(object) => {
                let mut planned: Self = serde_json::from_value(value.clone()).ok()?;
                if planned.title.trim().is_empty() {
                    planned.title = object
                        .get("name")
                        .cloned()
                        .and_then(lenient::scalar_to_string)
                        .unwrap_or_default();
                    planned.extra.remove("name");
                }
                planned
            }
            _ => return None,
        };
        planned.title = planned.title.trim().to_owned();
        if planned.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            planned.id = None;
        }
        (!planned.title.is_empty()).then_some(planned)
    }
}

fn group_title(object: &Map<String, Value>) -> Option<String> {
    GROUP_TITLE_KEYS
        .iter()
        .filter_map(|key| object.get(*key).cloned().and_then(lenient::scalar_to_string))
        .map(|title| title.trim().to_owned())
        .find(|title| !title.is_empty())
}

/// Push `tasks` under `title`, reusing an existing plan with the same title.
fn append_to(
    plans: &mut Vec<BranchPlan>,
    title: &str,
    description: Option<String>,
    tasks: Vec<TaskSpec>,
) {
    match plans.iter_mut().find(|p| p.title.eq_ignore_ascii_case(title)) {
        Some(plan) => {
            plan.tasks.extend(tasks);
            if plan.description.is_none() {
                plan.description = description;
            }
        }
        None => plans.push(BranchPlan {
            title: title.to_owned(),
            description,
            tasks,
        }),
    }
}

/// Fold raw groups into plans, keeping first-appearance order.
///
/// An entry with a `tasks` (or `subtasks`) list is a branch group. Any other
/// titled entry is a single task, filed under the branch it names or under
/// [`LOOSE_TASKS_BRANCH`]. Plans that end up with no tasks are dropped.
pub fn normalize_groups(raw: &[Value]) -> Vec<BranchPlan> {
    let mut plans: Vec<BranchPlan> = Vec::new();

    for entry in raw {
        let group_tasks = entry
            .as_object()
            .and_then(|o| o.get("tasks").or_else(|| o.get("subtasks")))
            .and_then(Value::as_array);

        match (entry.as_object(), group_tasks) {
            (Some(object), Some(tasks)) => {
                let title = group_title(object).unwrap_or_else(|| LOOSE_TASKS_BRANCH.to_owned());
                let description = object
                    .get("description")
                    .cloned()
                    .and_then(lenient::scalar_to_string);
                let tasks = tasks.iter().filter_map(TaskSpec::from_value).collect();
                append_to(&mut plans, &title, description, tasks);
            }
            _ => {
                let Some(mut task) = TaskSpec::from_value(entry) else {
                    continue;
                };
                let branch = task
                    .extra
                    .remove("branch")
                    .and_then(lenient::scalar_to_string)
                    .map(|b| b.trim().to_owned())
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| LOOSE_TASKS_BRANCH.to_owned());
                append_to(&mut plans, &branch, None, vec![task]);
            }
        }
    }

    plans.retain(|plan| !plan.tasks.is_empty());
    plans
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("item");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_groups_keep_order_and_fields() {
        let raw = vec![
            json!({
                "title": "Basics",
                "description": "start here",
                "tasks": [
                    {"title": "Install toolchain", "duration": "20 minutes", "difficulty": 1},
                    {"title": "Hello world", "prerequisites": ["Install toolchain"], "tags": ["x"]}
                ]
            }),
            json!({"branch_name": "Projects", "tasks": ["Build a CLI"]}),
        ];

        let plans = normalize_groups(&raw);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].title, "Basics");
        assert_eq!(plans[0].description.as_deref(), Some("start here"));
        assert_eq!(plans[0].tasks[0].duration.as_deref(), Some("20 minutes"));
        assert_eq!(plans[0].tasks[0].difficulty, Some(1));
        assert_eq!(plans[0].tasks[1].prerequisites, vec!["Install toolchain"]);
        assert_eq!(plans[0].tasks[1].extra["tags"], json!(["x"]));
        assert_eq!(plans[1].title, "Projects");
        assert_eq!(plans[1].tasks[0].title, "Build a CLI");
    }

    #[test]
    fn bare_tasks_collect_under_loose_branch() {
        let raw = vec![json!({"title": "Task A"}), json!("Task B")];
        let plans = normalize_groups(&raw);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].title, LOOSE_TASKS_BRANCH);
        let titles: Vec<&str> = plans[0].tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Task A", "Task B"]);
    }

    #[test]
    fn bare_task_naming_a_branch_joins_that_group() {
        let raw = vec![
            json!({"title": "Basics", "tasks": [{"title": "one"}]}),
            json!({"title": "two", "branch": "basics"}),
        ];
        let plans = normalize_groups(&raw);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].tasks.len(), 2);
        assert!(!plans[0].tasks[1].extra.contains_key("branch"));
    }

    #[test]
    fn untitled_entries_and_empty_groups_are_dropped() {
        let raw = vec![
            json!({"tasks": [{"description": "no title"}, {"title": "  "}]}),
            json!({"title": "Empty", "tasks": []}),
            json!(42),
            json!(null),
        ];
        assert!(normalize_groups(&raw).is_empty());
    }

    #[test]
    fn name_is_accepted_as_task_title() {
        let raw = vec![json!({"title": "G", "tasks": [{"name": "Read docs", "id": ""}]})];
        let plans = normalize_groups(&raw);
        let task = &plans[0].tasks[0];
        assert_eq!(task.title, "Read docs");
        assert_eq!(task.id, None);
        assert!(!task.extra.contains_key("name"));
    }

    #[test]
    fn numeric_ids_are_kept_as_strings() {
        let raw = vec![json!({"title": "G", "tasks": [{"id": 7, "title": "x"}]})];
        assert_eq!(normalize_groups(&raw)[0].tasks[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Hands-on Practice"), "hands-on-practice");
        assert_eq!(slugify("  Reflection & Next Steps!"), "reflection-next-steps");
        assert_eq!(slugify("???"), "item");
    }
}

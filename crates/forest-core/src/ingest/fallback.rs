//! Deterministic plan used when a response yields nothing usable.
//!
//! The output depends only on the goal and context strings: no clock, no
//! randomness, no I/O. Task ids are derived from the branch slug and
//! position, so re-running the fallback against the same tree adds nothing.

use super::groups::{BranchPlan, TaskSpec, slugify};

struct Template {
    branch: &'static str,
    summary: &'static str,
    tasks: &'static [(&'static str, &'static str)],
}

/// `(title prefix, duration)` per task; the goal is appended to the prefix.
const TEMPLATES: [Template; 3] = [
    Template {
        branch: "Foundations",
        summary: "Core concepts and vocabulary",
        tasks: &[
            ("Survey the fundamentals of", "30 minutes"),
            ("Collect three trusted resources for", "20 minutes"),
        ],
    },
    Template {
        branch: "Hands-on Practice",
        summary: "Small, concrete exercises",
        tasks: &[
            ("Complete a first small exercise in", "45 minutes"),
            ("Build a tiny end-to-end project for", "60 minutes"),
        ],
    },
    Template {
        branch: "Reflection & Next Steps",
        summary: "Review progress and pick the next focus",
        tasks: &[("Write down what worked and what to try next in", "15 minutes")],
    },
];

/// Produce a small, non-empty plan for `goal`.
///
/// Every branch has at least one titled task and no task has prerequisites.
/// `context`, when present, is only appended to branch descriptions.
pub fn synthesize(goal: &str, context: &str) -> Vec<BranchPlan> {
    let goal = match goal.trim() {
        "" => "your goal",
        trimmed => trimmed,
    };
    let context = context.trim();

    TEMPLATES
        .iter()
        .map(|template| {
            let slug = slugify(template.branch);
            let description = if context.is_empty() {
                template.summary.to_owned()
            } else {
                format!("{} (context: {context})", template.summary)
            };
            let tasks = template
                .tasks
                .iter()
                .enumerate()
                .map(|(index, (prefix, duration))| TaskSpec {
                    id: Some(format!("{slug}-{}", index + 1)),
                    title: format!("{prefix} {goal}"),
                    duration: Some((*duration).to_owned()),
                    ..TaskSpec::default()
                })
                .collect();
            BranchPlan {
                title: template.branch.to_owned(),
                description: Some(description),
                tasks,
            }
        })
        .collect()
}

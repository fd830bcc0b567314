//! Prompt construction for goal decomposition. Pure string assembly.

/// Response contract included in every decomposition prompt.
const RESPONSE_SCHEMA: &str = r#"## Response Format

Reply with a single JSON object inside a ```json fenced block:

```json
{
  "branch_tasks": [
    {
      "title": "string",          // REQUIRED. Strategic branch name.
      "description": "string",    // Optional. What this branch covers.
      "tasks": [
        {
          "title": "string",        // REQUIRED. One concrete action.
          "description": "string",  // Optional.
          "duration": "30 minutes", // Optional. Rough time estimate.
          "difficulty": 2,          // Optional. 1 (easy) to 5 (hard).
          "prerequisites": []       // Optional. Titles of earlier tasks.
        }
      ]
    }
  ]
}
```
"#;

const DECOMPOSITION_GUIDELINES: &str = r#"## Decomposition Guidelines

1. **Three to six branches.** Each branch is a distinct strategic area, ordered from foundational to advanced.
2. **Small tasks.** A task should fit in one sitting (15-90 minutes).
3. **Concrete verbs.** Start every task title with an action ("Read", "Build", "Practice").
4. **Prerequisites only when real.** Leave the list empty unless a task genuinely needs another one first.
"#;

/// Build the prompt asking a provider to decompose `goal` into an HTA tree.
pub fn build_decomposition_prompt(goal: &str, context: &str) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("# Hierarchical Task Analysis\n\n");
    prompt.push_str(
        "You are a learning strategist. Decompose the goal below into strategic \
         branches, each holding a short ordered list of actionable tasks.\n\n",
    );

    prompt.push_str("## Goal\n\n");
    prompt.push_str(goal.trim());
    prompt.push_str("\n\n");

    let context = context.trim();
    if !context.is_empty() {
        prompt.push_str("## Context\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    prompt.push_str(RESPONSE_SCHEMA);
    prompt.push('\n');
    prompt.push_str(DECOMPOSITION_GUIDELINES);

    prompt
}

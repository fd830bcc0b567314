//! Extracting branch/task groups from an untrusted provider response.
//!
//! Strategies run in a fixed priority order and the first one that yields a
//! usable list wins. A list is usable when [`normalize_groups`] finds at
//! least one titled task in it; anything less counts as that strategy
//! missing, so a later strategy still gets its turn.
//!
//! 1. [`ParseStrategy::DirectField`]: the response already holds the list in
//!    a known field (or is the list).
//! 2. [`ParseStrategy::FencedBlock`]: the response text contains a fenced
//!    code block whose body deserializes to the list, or to an object
//!    holding it in a known field.
//! 3. [`ParseStrategy::TopLevelList`]: the first balanced `[...]` span in
//!    the response text deserializes to a list.
//!
//! When all three miss, the outcome is [`ParseOutcome::Unrecognized`]. That
//! is a normal result, not an error: the pipeline recovers with the
//! fallback synthesizer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::groups::normalize_groups;

/// Fields that may hold the group list directly, in priority order.
pub const GROUP_FIELDS: [&str; 3] = ["branch_tasks", "branchTasks", "strategicBranches"];

/// Fields that may hold the response text.
const TEXT_FIELDS: [&str; 4] = ["text", "completion", "result", "content"];

const FENCE: &str = "```";

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Which strategy produced a successful parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    DirectField,
    FencedBlock,
    TopLevelList,
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DirectField => "direct_field",
            Self::FencedBlock => "fenced_block",
            Self::TopLevelList => "top_level_list",
        };
        f.write_str(s)
    }
}

/// Result of [`parse_response`]. Successful variants carry the raw group
/// entries exactly as found in the response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    DirectField(Vec<Value>),
    FencedBlock(Vec<Value>),
    TopLevelList(Vec<Value>),
    Unrecognized,
}

impl ParseOutcome {
    fn new(strategy: ParseStrategy, groups: Vec<Value>) -> Self {
        match strategy {
            ParseStrategy::DirectField => Self::DirectField(groups),
            ParseStrategy::FencedBlock => Self::FencedBlock(groups),
            ParseStrategy::TopLevelList => Self::TopLevelList(groups),
        }
    }

    pub fn strategy(&self) -> Option<ParseStrategy> {
        match self {
            Self::DirectField(_) => Some(ParseStrategy::DirectField),
            Self::FencedBlock(_) => Some(ParseStrategy::FencedBlock),
            Self::TopLevelList(_) => Some(ParseStrategy::TopLevelList),
            Self::Unrecognized => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }

    /// The raw groups, or `None` for [`ParseOutcome::Unrecognized`].
    pub fn into_groups(self) -> Option<Vec<Value>> {
        match self {
            Self::DirectField(groups) | Self::FencedBlock(groups) | Self::TopLevelList(groups) => {
                Some(groups)
            }
            Self::Unrecognized => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Why a strategy did not apply. Only logged.
type Miss = &'static str;

type Strategy = fn(&Value) -> Result<Vec<Value>, Miss>;

const STRATEGIES: [(ParseStrategy, Strategy); 3] = [
    (ParseStrategy::DirectField, direct_field),
    (ParseStrategy::FencedBlock, fenced_block),
    (ParseStrategy::TopLevelList, top_level_list),
];

/// Run the strategies in order and return the first success.
pub fn parse_response(response: &Value) -> ParseOutcome {
    for (strategy, run) in STRATEGIES {
        match run(response) {
            Ok(groups) => {
                debug!(%strategy, groups = groups.len(), "response parsed");
                return ParseOutcome::new(strategy, groups);
            }
            Err(reason) => debug!(%strategy, reason, "parse strategy missed"),
        }
    }
    ParseOutcome::Unrecognized
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn is_usable(list: &[Value]) -> bool {
    !normalize_groups(list).is_empty()
}

fn usable(list: &[Value]) -> Result<Vec<Value>, Miss> {
    if list.is_empty() {
        Err("list is empty")
    } else if !is_usable(list) {
        Err("list holds no titled task")
    } else {
        Ok(list.to_vec())
    }
}

/// The first known field holding a usable list.
fn group_field(value: &Value) -> Result<Vec<Value>, Miss> {
    let object = value.as_object().ok_or("not an object")?;
    GROUP_FIELDS
        .iter()
        .filter_map(|field| object.get(*field).and_then(Value::as_array))
        .find(|list| is_usable(list))
        .map(|list| list.to_vec())
        .ok_or("no group field holds a usable list")
}

fn direct_field(response: &Value) -> Result<Vec<Value>, Miss> {
    match response {
        Value::Array(list) => usable(list),
        Value::Object(_) => group_field(response),
        _ => Err("response is neither an object nor a list"),
    }
}

fn fenced_block(response: &Value) -> Result<Vec<Value>, Miss> {
    let text = response_text(response).ok_or("response carries no text")?;
    let mut saw_block = false;
    for body in fenced_bodies(&text) {
        saw_block = true;
        let groups = match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Array(list)) => usable(&list),
            Ok(value @ Value::Object(_)) => group_field(&value),
            Ok(_) => Err("fenced value is a scalar"),
            Err(_) => Err("fenced body is not JSON"),
        };
        if let Ok(groups) = groups {
            return Ok(groups);
        }
    }
    Err(if saw_block {
        "no fenced block holds a group list"
    } else {
        "no fenced block"
    })
}

fn top_level_list(response: &Value) -> Result<Vec<Value>, Miss> {
    let text = response_text(response).ok_or("response carries no text")?;
    let spans = list_spans(&text);
    if spans.is_empty() {
        return Err("no balanced list literal");
    }
    spans
        .into_iter()
        .find_map(|span| match serde_json::from_str::<Value>(span) {
            Ok(Value::Array(list)) => usable(&list).ok(),
            _ => None,
        })
        .ok_or("no list literal holds a usable list")
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Join the text of a content value: a string, or a list of blocks where
/// text blocks look like `{"type": "text", "text": "..."}`.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str).is_none_or(|t| t == "text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

/// Free text carried by a response, from the first field that has any.
pub fn response_text(response: &Value) -> Option<String> {
    if let Value::String(s) = response {
        return Some(s.clone());
    }
    let object = response.as_object()?;
    TEXT_FIELDS
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(content_text)
        .or_else(|| response.pointer("/message/content").and_then(content_text))
        .or_else(|| {
            response
                .pointer("/choices/0/message/content")
                .and_then(content_text)
        })
}

/// Bodies of every closed ``` fence in `text`, language tag stripped.
fn fenced_bodies(text: &str) -> Vec<&str> {
    let mut bodies = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        // The info string (e.g. `json`) runs to the end of the opening line.
        let body_start = after_open.find('\n').map_or(after_open.len(), |i| i + 1);
        let after_tag = &after_open[body_start..];
        let Some(close) = after_tag.find(FENCE) else {
            break;
        };
        bodies.push(&after_tag[..close]);
        rest = &after_tag[close + FENCE.len()..];
    }
    bodies
}

/// Balanced top-level `[...]` spans in order of appearance.
fn list_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while let Some((start, end)) = first_list_span(&text[offset..]) {
        spans.push(&text[offset + start..offset + end]);
        offset += end;
    }
    spans
}

/// Byte range of the first balanced `[...]` span, ignoring brackets inside
/// JSON strings.
fn first_list_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

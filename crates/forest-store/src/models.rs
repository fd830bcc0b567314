//! Typed views of Forest documents.
//!
//! The on-disk format belongs to more producers than this crate, so every
//! type keeps unrecognized keys in a flattened `extra` map and writes them
//! back untouched. Scalar fields decode leniently (a numeric id is accepted
//! as a string) because trees are often assembled from model output.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Path name used when a project has not chosen another one.
pub const DEFAULT_PATH: &str = "main";

fn default_path_name() -> String {
    DEFAULT_PATH.to_owned()
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Project-level configuration, stored as `<project_id>/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub life_structure_preferences: LifeStructurePreferences,
    #[serde(default = "default_path_name")]
    pub active_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectConfig {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            context: String::new(),
            life_structure_preferences: LifeStructurePreferences::default(),
            active_path: default_path_name(),
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Daily rhythm the scheduler should respect. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifeStructurePreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meal_times: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// HTA trees
// ---------------------------------------------------------------------------

/// Hierarchical task tree for one path, stored as
/// `<project_id>/paths/<path>/hta.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtaTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "lenient::object_list")]
    pub strategic_branches: Vec<Branch>,
    #[serde(default, deserialize_with = "lenient::object_list")]
    pub frontier_nodes: Vec<Task>,
    #[serde(default, deserialize_with = "lenient::object_list")]
    pub completed_nodes: Vec<Task>,
    #[serde(default)]
    pub collaborative_sessions: Vec<Value>,
    #[serde(default)]
    pub hierarchy_metadata: HierarchyMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Derived counts. Never authoritative; see [`HtaTree::recompute_metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyMetadata {
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub total_branches: usize,
    #[serde(default)]
    pub completed_tasks: usize,
}

impl HierarchyMetadata {
    pub const FIELD: &'static str = "hierarchyMetadata";
}

impl HtaTree {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: Some(goal.into()),
            created: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Decode a tree from an already-validated document.
    ///
    /// The stored `hierarchyMetadata` is discarded and recomputed, so a
    /// stale or malformed metadata block never blocks decoding. Branch and
    /// task entries that are not objects are left out of the typed view;
    /// they stay on disk until a typed tree is saved over them.
    pub fn from_document(mut document: Value) -> Result<Self, serde_json::Error> {
        if let Some(object) = document.as_object_mut() {
            object.remove(HierarchyMetadata::FIELD);
        }
        let mut tree: Self = serde_json::from_value(document)?;
        tree.recompute_metadata();
        Ok(tree)
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuild `hierarchy_metadata` from the collections.
    ///
    /// `total_tasks` counts the frontier; `completed_tasks` counts the
    /// completion history.
    pub fn recompute_metadata(&mut self) {
        self.hierarchy_metadata = HierarchyMetadata {
            total_tasks: self.frontier_nodes.len(),
            total_branches: self.strategic_branches.len(),
            completed_tasks: self.completed_nodes.len(),
        };
    }

    /// Tasks whose branch reference matches no branch id or title.
    ///
    /// Purely a report: the store never rejects or repairs orphans.
    pub fn orphaned_tasks(&self) -> Vec<&Task> {
        let known: HashSet<&str> = self
            .strategic_branches
            .iter()
            .flat_map(|b| [b.id.as_str(), b.title.as_str()])
            .filter(|s| !s.is_empty())
            .collect();
        self.frontier_nodes
            .iter()
            .filter(|t| !known.contains(t.branch.as_str()))
            .collect()
    }
}

/// A strategic grouping of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::position")]
    pub order: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single actionable unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    /// Owning branch, by id or title.
    #[serde(default, deserialize_with = "lenient::string")]
    pub branch: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<String>,
    /// Rough 1-5 difficulty estimate.
    #[serde(
        default,
        deserialize_with = "lenient::opt_position",
        skip_serializing_if = "Option::is_none"
    )]
    pub difficulty: Option<u32>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub prerequisites: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub completed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Forgiving decoders for scalar fields.
pub mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Render a scalar as a string. Objects, arrays and null yield `None`.
    pub fn scalar_to_string(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(opt_string(de)?.unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(scalar_to_string(Value::deserialize(de)?))
    }

    /// A list of strings, or a single scalar promoted to a one-item list.
    pub fn string_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Array(items) => items.into_iter().filter_map(scalar_to_string).collect(),
            other => scalar_to_string(other).into_iter().collect(),
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
            _ => false,
        })
    }

    pub fn position<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
        Ok(opt_position(de)?.unwrap_or(0))
    }

    /// A list of objects decoded as `T`. Entries that are not objects, or
    /// that still fail to decode, are skipped.
    pub fn object_list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match Value::deserialize(de)? {
            Value::Array(items) => items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn opt_position<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

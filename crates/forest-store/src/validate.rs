//! Structural self-healing for HTA tree documents.
//!
//! [`validate_tree`] is total: it never fails and never rejects input. Each
//! of the four collection fields that is absent, null, or not an array is
//! replaced with an empty array. Valid arrays pass through untouched (no
//! element is dropped, reordered, or rewritten) and unknown keys are kept.
//! Repairs are reported back as [`Repair`] records so callers can log them.

use std::fmt;

use serde_json::{Map, Value};

use crate::models::HierarchyMetadata;

/// The collection fields every HTA tree must carry.
pub const COLLECTION_FIELDS: [&str; 4] = [
    "strategicBranches",
    "frontierNodes",
    "completedNodes",
    "collaborativeSessions",
];

/// Pseudo-field name used when the whole document had to be replaced.
pub const ROOT: &str = "$root";

/// What was wrong with a repaired field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    Missing,
    Null,
    /// Present but of the wrong JSON type; carries the type found.
    WrongType(&'static str),
}

/// One structural correction applied by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repair {
    pub field: &'static str,
    pub kind: RepairKind,
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RepairKind::Missing => write!(f, "{}: missing, set to []", self.field),
            RepairKind::Null => write!(f, "{}: null, set to []", self.field),
            RepairKind::WrongType(found) if self.field == ROOT => {
                write!(f, "document root was {found}, replaced with an object")
            }
            RepairKind::WrongType(found) => {
                write!(f, "{}: found {found}, set to []", self.field)
            }
        }
    }
}

/// A validated document plus the repairs that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub document: Value,
    pub repairs: Vec<Repair>,
}

impl Repaired {
    pub fn was_repaired(&self) -> bool {
        !self.repairs.is_empty()
    }
}

/// Repair the collection fields of an HTA tree document.
pub fn validate_tree(document: Value) -> Repaired {
    let mut repairs = Vec::new();

    let mut object = match document {
        Value::Object(object) => object,
        other => {
            let kind = match other {
                Value::Null => RepairKind::Null,
                ref v => RepairKind::WrongType(json_type(v)),
            };
            repairs.push(Repair { field: ROOT, kind });
            Map::new()
        }
    };

    for field in COLLECTION_FIELDS {
        let kind = match object.get(field) {
            Some(Value::Array(_)) => continue,
            None => RepairKind::Missing,
            Some(Value::Null) => RepairKind::Null,
            Some(other) => RepairKind::WrongType(json_type(other)),
        };
        object.insert(field.to_owned(), Value::Array(Vec::new()));
        repairs.push(Repair { field, kind });
    }

    Repaired {
        document: Value::Object(object),
        repairs,
    }
}

/// Overwrite the derived counts in `hierarchyMetadata` from the collections.
///
/// Other keys inside an existing metadata object are preserved. Expects a
/// document that has already been through [`validate_tree`]; anything else
/// is left alone.
pub fn recompute_metadata(document: &mut Value) {
    let Some(object) = document.as_object_mut() else {
        return;
    };
    let count = |field: &str| object.get(field).and_then(Value::as_array).map_or(0, Vec::len);
    let counts = [
        ("total_tasks", count("frontierNodes")),
        ("total_branches", count("strategicBranches")),
        ("completed_tasks", count("completedNodes")),
    ];

    let metadata = object
        .entry(HierarchyMetadata::FIELD)
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(metadata) = metadata.as_object_mut() {
        for (key, n) in counts {
            metadata.insert(key.to_owned(), Value::from(n));
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_tree_passes_unchanged() {
        let doc = json!({
            "strategicBranches": [{"id": "b1"}, {"id": "b2"}],
            "frontierNodes": [{"id": "t2"}, {"id": "t1"}],
            "completedNodes": [],
            "collaborativeSessions": [1, "two", null],
            "extra": {"kept": true}
        });
        let repaired = validate_tree(doc.clone());
        assert!(!repaired.was_repaired());
        assert_eq!(repaired.document, doc);
    }

    #[test]
    fn each_defect_kind_is_repaired() {
        let doc = json!({
            "strategicBranches": null,
            "frontierNodes": {"t1": {}},
            "collaborativeSessions": "nope",
            "goal": "kept"
        });
        let repaired = validate_tree(doc);

        for field in COLLECTION_FIELDS {
            assert_eq!(repaired.document[field], json!([]), "{field} should be []");
        }
        assert_eq!(repaired.document["goal"], json!("kept"));
        assert_eq!(
            repaired.repairs,
            vec![
                Repair { field: "strategicBranches", kind: RepairKind::Null },
                Repair { field: "frontierNodes", kind: RepairKind::WrongType("an object") },
                Repair { field: "completedNodes", kind: RepairKind::Missing },
                Repair { field: "collaborativeSessions", kind: RepairKind::WrongType("a string") },
            ]
        );
    }

    #[test]
    fn non_object_root_becomes_empty_tree() {
        let repaired = validate_tree(json!([1, 2, 3]));
        assert_eq!(
            repaired.repairs[0],
            Repair {
                field: ROOT,
                kind: RepairKind::WrongType("an array")
            }
        );
        assert_eq!(repaired.repairs.len(), 5);
        for field in COLLECTION_FIELDS {
            assert_eq!(repaired.document[field], json!([]));
        }

        let repaired = validate_tree(Value::Null);
        assert_eq!(repaired.repairs[0].kind, RepairKind::Null);
    }

    #[test]
    fn validation_is_idempotent() {
        let once = validate_tree(json!({"frontierNodes": 3}));
        let twice = validate_tree(once.document.clone());
        assert!(!twice.was_repaired());
        assert_eq!(once.document, twice.document);
    }

    #[test]
    fn metadata_counts_follow_collections() {
        let mut doc = validate_tree(json!({
            "strategicBranches": [{}, {}],
            "frontierNodes": [{}, {}, {}],
            "completedNodes": [{}],
            "hierarchyMetadata": {"total_tasks": 99, "depth": 3}
        }))
        .document;
        recompute_metadata(&mut doc);
        assert_eq!(
            doc["hierarchyMetadata"],
            json!({"total_tasks": 3, "depth": 3, "total_branches": 2, "completed_tasks": 1})
        );
    }

    #[test]
    fn metadata_replaces_non_object() {
        let mut doc = validate_tree(json!({"hierarchyMetadata": [1]})).document;
        recompute_metadata(&mut doc);
        assert_eq!(doc["hierarchyMetadata"]["total_tasks"], json!(0));
    }

    #[test]
    fn repair_messages() {
        let r = Repair { field: "frontierNodes", kind: RepairKind::Missing };
        assert_eq!(r.to_string(), "frontierNodes: missing, set to []");
        let r = Repair { field: ROOT, kind: RepairKind::WrongType("a string") };
        assert_eq!(r.to_string(), "document root was a string, replaced with an object");
    }
}

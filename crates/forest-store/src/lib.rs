//! On-disk document store for Forest projects and HTA trees.
//!
//! Documents are JSON files under a single data root:
//!
//! ```text
//! <data_dir>/<project_id>/config.json
//! <data_dir>/<project_id>/paths/<path_name>/hta.json
//! <data_dir>/<project_id>/<name>.json
//! ```
//!
//! Every save goes through the per-key [`lock::LockManager`] and the
//! temp-then-rename [`atomic`] writer. HTA trees are passed through the
//! [`validate`] self-healer on both load and save, so callers always see
//! well-formed collections.

pub mod atomic;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod store;
pub mod validate;

pub use config::StoreConfig;
pub use error::StoreError;
pub use lock::{LockError, LockKey, LockManager, ScopedLock};
pub use models::{
    Branch, DEFAULT_PATH, HierarchyMetadata, HtaTree, LifeStructurePreferences, ProjectConfig,
    Task,
};
pub use store::{DocumentStore, Resource};
pub use validate::{Repair, RepairKind, Repaired, validate_tree};

//! Load/save over project and path documents.
//!
//! `save` and `update` serialize per resource key through the shared
//! [`LockManager`], then write with [`atomic::write_atomic`] on a blocking
//! thread that owns the lock until the rename lands. Dropping the caller's
//! future therefore never releases the lock mid-write. `load` takes no lock;
//! atomic renames mean it can never observe a torn file.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::atomic;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::lock::{LockKey, LockManager, ScopedLock};
use crate::models::{HtaTree, ProjectConfig};
use crate::validate::{self, Repaired};

const CONFIG_FILE: &str = "config.json";
const TREE_FILE: &str = "hta.json";
const PATHS_DIR: &str = "paths";

/// A named document inside a project directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// `config.json`: the [`ProjectConfig`].
    ProjectConfig,
    /// `paths/<path>/hta.json`: the [`HtaTree`] for one path.
    Tree { path: String },
    /// `<name>.json`: any other project-scoped document.
    Named(String),
}

impl Resource {
    pub fn tree(path: impl Into<String>) -> Self {
        Self::Tree { path: path.into() }
    }

    /// Lock-table name for this resource.
    pub fn name(&self) -> String {
        match self {
            Self::ProjectConfig => "config".to_owned(),
            Self::Tree { path } => format!("{PATHS_DIR}/{path}/hta"),
            Self::Named(name) => name.clone(),
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree { .. })
    }

    fn relative_path(&self) -> Result<PathBuf, StoreError> {
        Ok(match self {
            Self::ProjectConfig => PathBuf::from(CONFIG_FILE),
            Self::Tree { path } => {
                check_identifier("path name", path)?;
                Path::new(PATHS_DIR).join(path).join(TREE_FILE)
            }
            Self::Named(name) => {
                check_identifier("resource name", name)?;
                PathBuf::from(format!("{name}.json"))
            }
        })
    }
}

/// Filesystem-backed document store.
///
/// Cheap to clone; clones share the lock table.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    config: StoreConfig,
    locks: Arc<LockManager>,
}

impl DocumentStore {
    pub fn new(config: StoreConfig, locks: Arc<LockManager>) -> Self {
        Self { config, locks }
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Absolute location of a resource on disk.
    pub fn resource_path(
        &self,
        project_id: &str,
        resource: &Resource,
    ) -> Result<PathBuf, StoreError> {
        Ok(self.project_dir(project_id)?.join(resource.relative_path()?))
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        check_identifier("project id", project_id)?;
        Ok(self.config.data_dir.join(project_id))
    }

    // -----------------------------------------------------------------------
    // Raw documents
    // -----------------------------------------------------------------------

    /// Load a document, or `None` if it has never been written.
    ///
    /// HTA trees come back repaired; repairs are logged, not persisted.
    pub async fn load(
        &self,
        project_id: &str,
        resource: &Resource,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .load_with_repairs(project_id, resource)
            .await?
            .map(|repaired| repaired.document))
    }

    /// Like [`Self::load`] but also returns the repairs that were applied.
    pub async fn load_with_repairs(
        &self,
        project_id: &str,
        resource: &Resource,
    ) -> Result<Option<Repaired>, StoreError> {
        let path = self.resource_path(project_id, resource)?;
        let Some(document) = read_document(&path).await? else {
            return Ok(None);
        };
        if !resource.is_tree() {
            return Ok(Some(Repaired {
                document,
                repairs: Vec::new(),
            }));
        }
        let repaired = validate::validate_tree(document);
        log_repairs(project_id, resource, &repaired);
        Ok(Some(repaired))
    }

    /// Replace a document.
    ///
    /// At most one save per `(project_id, resource)` is in flight; when
    /// several race, the one that acquires the lock last wins.
    pub async fn save(
        &self,
        project_id: &str,
        resource: &Resource,
        document: Value,
    ) -> Result<(), StoreError> {
        let path = self.resource_path(project_id, resource)?;
        let lock = self.acquire(project_id, resource).await?;
        let bytes = encode(project_id, resource, document)?.1;
        write_locked(lock, path, bytes).await?;
        debug!(project_id, resource = %resource.name(), "document saved");
        Ok(())
    }

    /// Read-modify-write under a single lock acquisition.
    ///
    /// `modify` receives the current (repaired) document, or `None` if the
    /// resource does not exist yet, and returns the document to persist. An
    /// error from `modify` aborts the update and leaves the file untouched.
    /// Returns what was written.
    pub async fn update<F>(
        &self,
        project_id: &str,
        resource: &Resource,
        modify: F,
    ) -> Result<Value, StoreError>
    where
        F: FnOnce(Option<Value>) -> Result<Value, StoreError>,
    {
        let path = self.resource_path(project_id, resource)?;
        let lock = self.acquire(project_id, resource).await?;

        let current = read_document(&path).await?.map(|document| {
            if resource.is_tree() {
                let repaired = validate::validate_tree(document);
                log_repairs(project_id, resource, &repaired);
                repaired.document
            } else {
                document
            }
        });

        let (written, bytes) = encode(project_id, resource, modify(current)?)?;
        write_locked(lock, path, bytes).await?;
        debug!(project_id, resource = %resource.name(), "document updated");
        Ok(written)
    }

    async fn acquire(
        &self,
        project_id: &str,
        resource: &Resource,
    ) -> Result<ScopedLock, StoreError> {
        let key = LockKey::new(project_id, resource.name());
        Ok(self.locks.acquire(key, self.config.lock_timeout).await?)
    }

    // -----------------------------------------------------------------------
    // Typed helpers
    // -----------------------------------------------------------------------

    /// Write a new project's config.
    ///
    /// The existence check and the write happen under one lock, so of
    /// several racing creates for the same id exactly one succeeds; the
    /// others get [`StoreError::AlreadyExists`].
    pub async fn create_project(&self, project: &ProjectConfig) -> Result<(), StoreError> {
        let resource = Resource::ProjectConfig;
        let path = self.resource_path(&project.id, &resource)?;
        let document = serde_json::to_value(project)?;
        self.update(&project.id, &resource, |current| match current {
            Some(_) => Err(StoreError::AlreadyExists { path }),
            None => Ok(document),
        })
        .await?;
        Ok(())
    }

    pub async fn load_project(
        &self,
        project_id: &str,
    ) -> Result<Option<ProjectConfig>, StoreError> {
        let resource = Resource::ProjectConfig;
        let path = self.resource_path(project_id, &resource)?;
        let Some(document) = self.load(project_id, &resource).await? else {
            return Ok(None);
        };
        serde_json::from_value(document)
            .map(Some)
            .map_err(|source| StoreError::Decode { path, source })
    }

    /// Ids of every project with a config file, sorted.
    pub async fn list_projects(&self) -> Result<Vec<String>, StoreError> {
        let data_dir = self.config.data_dir.clone();
        let mut entries = match tokio::fs::read_dir(&data_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: data_dir, source }),
        };

        let mut ids = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => return Err(StoreError::Io { path: data_dir, source }),
            };
            let has_config = tokio::fs::try_exists(entry.path().join(CONFIG_FILE))
                .await
                .unwrap_or(false);
            if has_config {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn load_tree(
        &self,
        project_id: &str,
        path_name: &str,
    ) -> Result<Option<HtaTree>, StoreError> {
        let resource = Resource::tree(path_name);
        let path = self.resource_path(project_id, &resource)?;
        let Some(document) = self.load(project_id, &resource).await? else {
            return Ok(None);
        };
        HtaTree::from_document(document)
            .map(Some)
            .map_err(|source| StoreError::Decode { path, source })
    }

    pub async fn save_tree(
        &self,
        project_id: &str,
        path_name: &str,
        tree: &HtaTree,
    ) -> Result<(), StoreError> {
        self.save(project_id, &Resource::tree(path_name), tree.to_document()?)
            .await
    }

    /// Move an unreadable document aside so the resource starts fresh.
    ///
    /// The file is renamed to `<name>.corrupt-<timestamp>` next to where it
    /// was, under the resource lock. Returns the new location, or `None` if
    /// there was nothing to move.
    pub async fn quarantine(
        &self,
        project_id: &str,
        resource: &Resource,
    ) -> Result<Option<PathBuf>, StoreError> {
        let path = self.resource_path(project_id, resource)?;
        let _lock = self.acquire(project_id, resource).await?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut target = path.clone().into_os_string();
        target.push(format!(".corrupt-{stamp}"));
        let target = PathBuf::from(target);

        match tokio::fs::rename(&path, &target).await {
            Ok(()) => {
                warn!(
                    project_id,
                    resource = %resource.name(),
                    moved_to = %target.display(),
                    "quarantined unreadable document"
                );
                Ok(Some(target))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Remove temp files a crashed writer left in the project's directories.
    pub async fn sweep_temp_files(&self, project_id: &str) -> Result<usize, StoreError> {
        let project_dir = self.project_dir(project_id)?;
        tokio::task::spawn_blocking(move || {
            let mut dirs = vec![project_dir.clone()];
            let paths_dir = project_dir.join(PATHS_DIR);
            if let Ok(entries) = std::fs::read_dir(&paths_dir) {
                dirs.extend(
                    entries
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| p.is_dir()),
                );
            }
            let mut removed = 0;
            for dir in dirs {
                removed += atomic::remove_temp_artifacts(&dir)
                    .map_err(|source| StoreError::Io { path: dir.clone(), source })?;
            }
            Ok::<_, StoreError>(removed)
        })
        .await?
    }
}

/// Reject identifiers that would escape the data root or nest directories.
fn check_identifier(kind: &'static str, value: &str) -> Result<(), StoreError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidIdentifier {
            kind,
            value: value.to_owned(),
        });
    }
    Ok(())
}

async fn read_document(path: &Path) -> Result<Option<Value>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Validate (for trees) and serialize. Returns the final document and its bytes.
fn encode(
    project_id: &str,
    resource: &Resource,
    document: Value,
) -> Result<(Value, Vec<u8>), StoreError> {
    let document = if resource.is_tree() {
        let repaired = validate::validate_tree(document);
        log_repairs(project_id, resource, &repaired);
        let mut document = repaired.document;
        validate::recompute_metadata(&mut document);
        document
    } else {
        document
    };
    let mut bytes = serde_json::to_vec_pretty(&document)?;
    bytes.push(b'\n');
    Ok((document, bytes))
}

/// Write on a blocking thread that holds `lock` until the rename completes.
async fn write_locked(lock: ScopedLock, path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || {
        let _lock = lock;
        let result = atomic::write_atomic(&path, &bytes);
        result.map_err(|source| StoreError::Io { path, source })
    })
    .await?
}

fn log_repairs(project_id: &str, resource: &Resource, repaired: &Repaired) {
    for repair in &repaired.repairs {
        warn!(project_id, resource = %resource.name(), %repair, "repaired malformed tree field");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_and_paths() {
        assert_eq!(Resource::ProjectConfig.name(), "config");
        assert_eq!(Resource::tree("main").name(), "paths/main/hta");
        assert_eq!(Resource::Named("learning_history".into()).name(), "learning_history");

        assert_eq!(
            Resource::tree("main").relative_path().unwrap(),
            Path::new("paths").join("main").join("hta.json")
        );
        assert_eq!(
            Resource::Named("notes".into()).relative_path().unwrap(),
            PathBuf::from("notes.json")
        );
    }

    #[test]
    fn identifiers_are_checked() {
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(
                matches!(
                    check_identifier("project id", bad),
                    Err(StoreError::InvalidIdentifier { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        for good in ["p1", "learn-rust", "My Project", "main.v2"] {
            assert!(check_identifier("project id", good).is_ok(), "{good:?} should be accepted");
        }
    }

    #[test]
    fn encode_repairs_trees_only() {
        let (tree, bytes) = encode("p1", &Resource::tree("main"), serde_json::json!({})).unwrap();
        assert_eq!(tree["frontierNodes"], serde_json::json!([]));
        assert_eq!(tree["hierarchyMetadata"]["total_branches"], serde_json::json!(0));
        assert!(bytes.ends_with(b"\n"));

        let (config, _) =
            encode("p1", &Resource::ProjectConfig, serde_json::json!({"id": "p1"})).unwrap();
        assert!(config.get("frontierNodes").is_none());
    }
}

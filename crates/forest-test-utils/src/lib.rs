//! Shared test utilities for Forest integration tests.
//!
//! Each test gets its own data root inside a [`TempDir`], removed when the
//! returned [`TestStore`] is dropped. Stores built here share nothing, so
//! tests can run in parallel without coordination.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use forest_store::atomic::is_temp_artifact;
use forest_store::{DocumentStore, LockManager, StoreConfig};

/// A [`DocumentStore`] rooted in a private temporary directory.
pub struct TestStore {
    pub store: DocumentStore,
    /// Held to keep the directory alive for the test's duration.
    dir: TempDir,
}

impl TestStore {
    /// Fresh store with no lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(None)
    }

    pub fn with_lock_timeout(lock_timeout: Option<Duration>) -> Self {
        let dir = TempDir::new().expect("failed to create temp data dir");
        let config = StoreConfig::new(dir.path()).with_lock_timeout(lock_timeout);
        let store = DocumentStore::new(config, Arc::new(LockManager::new()));
        Self { store, dir }
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// On-disk location of a path's tree document.
    pub fn tree_file(&self, project_id: &str, path_name: &str) -> PathBuf {
        self.dir
            .path()
            .join(project_id)
            .join("paths")
            .join(path_name)
            .join("hta.json")
    }

    /// Write raw bytes straight to disk, bypassing the store. Used to plant
    /// malformed documents.
    pub fn plant_raw(&self, file: &Path, contents: &str) {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        fs::write(file, contents).expect("failed to plant raw document");
    }

    /// Read and parse a file straight from disk, bypassing the store.
    pub fn read_raw(&self, file: &Path) -> Value {
        let bytes =
            fs::read(file).unwrap_or_else(|e| panic!("failed to read {}: {e}", file.display()));
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|e| panic!("{} is not valid JSON: {e}", file.display()))
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Every temp artifact under `root`, searched recursively.
pub fn temp_artifacts(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_temp_artifact(&entry.file_name().to_string_lossy()) {
                found.push(path);
            }
        }
    }
    found
}

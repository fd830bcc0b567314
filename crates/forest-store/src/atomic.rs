//! Crash-consistent file replacement.
//!
//! Content is written to a uniquely named temporary sibling of the target,
//! fsynced, and renamed over the target. Readers see either the old file or
//! the new one, never a mix. The temporary file is removed on every failure
//! path (it is owned by a [`tempfile::NamedTempFile`] until the rename).

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Suffix carried by every in-flight temporary file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Atomically replace `path` with `bytes`, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    sync_dir(dir);
    Ok(())
}

/// Returns `true` if `file_name` looks like one of our temporary files.
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX)
}

/// Remove temporary files left in `dir` by a crashed process.
///
/// Returns the number of files removed. A missing directory counts as clean.
pub fn remove_temp_artifacts(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_file() && is_temp_artifact(&name.to_string_lossy()) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Persist the rename itself. Best-effort: not every platform can open a
/// directory for syncing.
fn sync_dir(dir: &Path) {
    if !cfg!(unix) {
        return;
    }
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| is_temp_artifact(name))
            .collect()
    }

    #[test]
    fn writes_new_file_and_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("p1").join("paths").join("main").join("hta.json");

        write_atomic(&target, b"{\"a\":1}").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"{\"a\":1}");
        assert!(temp_files(target.parent().unwrap()).is_empty());
    }

    #[test]
    fn replaces_existing_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("config.json");
        fs::write(&target, "old content that is longer than the new one").unwrap();

        write_atomic(&target, b"new").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn failed_rename_keeps_original_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let target = tmp.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner.json"), "keep").unwrap();

        let err = write_atomic(&target, b"payload");
        assert!(err.is_err());
        assert_eq!(fs::read_to_string(target.join("inner.json")).unwrap(), "keep");
        assert!(temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn remove_temp_artifacts_only_touches_temp_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".hta.json.abc123.tmp"), "partial").unwrap();
        fs::write(tmp.path().join("hta.json"), "{}").unwrap();

        let removed = remove_temp_artifacts(tmp.path()).unwrap();

        assert_eq!(removed, 1);
        assert!(tmp.path().join("hta.json").exists());
        assert!(temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn remove_temp_artifacts_on_missing_dir() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(remove_temp_artifacts(&tmp.path().join("nope")).unwrap(), 0);
    }

    #[test]
    fn temp_artifact_detection() {
        assert!(is_temp_artifact(".hta.json.Xy12ab.tmp"));
        assert!(!is_temp_artifact("hta.json"));
        assert!(!is_temp_artifact(".hidden"));
    }
}

//! JSON state file on the operator's disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use syncbox_types::SyncState;

use crate::error::{Result, StateError};

/// A sync state file at a fixed path.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the prior state.
    ///
    /// Returns `Ok(None)` when the file does not exist. An empty file is
    /// treated as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the file cannot be read, is not JSON, or
    /// is not a JSON object.
    pub fn load(&self) -> Result<Option<SyncState>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&self.path, e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(SyncState::new()));
        }
        let value: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|source| StateError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let state = SyncState::from_value(value).map_err(|source| StateError::Shape {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Replace the state file with `state`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the temporary file cannot be written
    /// or renamed into place.
    pub fn persist(&self, state: &SyncState) -> Result<()> {
        let mut contents = state.to_pretty_json();
        contents.push('\n');
        atomic_write(&self.path, contents.as_bytes())?;
        tracing::debug!(path = %self.path.display(), "State file replaced");
        Ok(())
    }
}

/// Write `contents` to `path` via a sibling temp file and `rename`.
///
/// Readers observe either the old or the new contents, never a partial
/// write. Missing parent directories are created.
///
/// # Errors
///
/// Returns [`StateError::Io`] on any file-system failure; the temporary
/// file is removed on error.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StateError::io(&dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        if let Ok(parent_dir) = fs::File::open(&dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StateError::io(path, err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("absent.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn load_empty_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "  \n").unwrap();
        let state = StateFile::new(&path).load().unwrap().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "[1,2,3]").unwrap();
        let err = StateFile::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Shape { .. }), "got: {err}");
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let err = StateFile::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested/state.json"));
        let state = SyncState::from_value(serde_json::json!({"cursor": 1})).unwrap();
        file.persist(&state).unwrap();
        assert_eq!(file.load().unwrap(), Some(state));
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"old": true}"#).unwrap();
        let state = SyncState::from_value(serde_json::json!({"new": true})).unwrap();
        StateFile::new(&path).persist(&state).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n  \"new\": true\n}\n"
        );
    }
}

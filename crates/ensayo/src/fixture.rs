//! Suite-scoped artifacts.
//!
//! Files a suite needs on disk (upload payloads, data tables) are created
//! once before any case starts and removed once after every finalizer has
//! run. [`ArtifactStore`] is the filesystem capability; [`LocalArtifactStore`]
//! keeps them in a private temporary directory.

use crate::result::{EnsayoError, EnsayoResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Lifecycle of an artifact store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Accepting new artifacts
    Open,
    /// Artifacts deleted; further creation fails
    Removed,
}

/// Scoped creation and deletion of named files
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Write `bytes` under `name`, replacing earlier content, and return the path
    fn create(&self, name: &str, bytes: &[u8]) -> EnsayoResult<PathBuf>;

    /// Path of an existing artifact
    fn path(&self, name: &str) -> Option<PathBuf>;

    /// Delete every artifact. Returns how many were removed; later calls
    /// remove nothing.
    fn remove_all(&self) -> EnsayoResult<usize>;

    /// Current lifecycle state
    fn state(&self) -> ArtifactState;
}

struct LocalState {
    root: Option<TempDir>,
    files: BTreeMap<String, PathBuf>,
}

/// Artifacts in a private temporary directory
pub struct LocalArtifactStore {
    inner: Mutex<LocalState>,
}

impl std::fmt::Debug for LocalArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (root, count) = self
            .inner
            .lock()
            .map(|s| (s.root.as_ref().map(|d| d.path().to_path_buf()), s.files.len()))
            .unwrap_or_default();
        f.debug_struct("LocalArtifactStore")
            .field("root", &root)
            .field("artifact_count", &count)
            .finish()
    }
}

impl LocalArtifactStore {
    /// Store rooted in a fresh temporary directory
    pub fn new() -> EnsayoResult<Self> {
        let root = tempfile::Builder::new().prefix("ensayo-").tempdir()?;
        debug!(root = %root.path().display(), "artifact store created");
        Ok(Self {
            inner: Mutex::new(LocalState {
                root: Some(root),
                files: BTreeMap::new(),
            }),
        })
    }

    /// Root directory, until removal
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .ok()
            .and_then(|s| s.root.as_ref().map(|d| d.path().to_path_buf()))
    }

    /// Names of the current artifacts
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|s| s.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> EnsayoError {
        EnsayoError::Fixture {
            message: "artifact store lock poisoned".to_string(),
        }
    }
}

fn check_name(name: &str) -> EnsayoResult<()> {
    let plain = Path::new(name)
        .file_name()
        .is_some_and(|f| f == std::ffi::OsStr::new(name));
    if name.is_empty() || !plain {
        return Err(EnsayoError::Fixture {
            message: format!("artifact name '{name}' must be a plain file name"),
        });
    }
    Ok(())
}

impl ArtifactStore for LocalArtifactStore {
    fn create(&self, name: &str, bytes: &[u8]) -> EnsayoResult<PathBuf> {
        check_name(name)?;
        let mut state = self.inner.lock().map_err(|_| Self::poisoned())?;
        let Some(root) = state.root.as_ref() else {
            return Err(EnsayoError::Fixture {
                message: format!("cannot create '{name}': artifacts already removed"),
            });
        };
        let path = root.path().join(name);
        std::fs::write(&path, bytes)?;
        debug!(name, bytes = bytes.len(), "artifact written");
        state.files.insert(name.to_string(), path.clone());
        Ok(path)
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.inner.lock().ok().and_then(|s| s.files.get(name).cloned())
    }

    fn remove_all(&self) -> EnsayoResult<usize> {
        let (root, files) = {
            let mut state = self.inner.lock().map_err(|_| Self::poisoned())?;
            (state.root.take(), std::mem::take(&mut state.files))
        };
        let Some(root) = root else {
            debug!("artifacts already removed");
            return Ok(0);
        };
        let count = files.len();
        let location = root.path().to_path_buf();
        root.close().map_err(|e| {
            warn!(root = %location.display(), error = %e, "artifact removal failed");
            EnsayoError::Fixture {
                message: format!("removing {}: {e}", location.display()),
            }
        })?;
        debug!(count, "artifacts removed");
        Ok(count)
    }

    fn state(&self) -> ArtifactState {
        match self.inner.lock() {
            Ok(state) if state.root.is_some() => ArtifactState::Open,
            _ => ArtifactState::Removed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read_back() {
        let store = LocalArtifactStore::new().unwrap();
        let path = store.create("upload.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(store.path("upload.txt"), Some(path));
        assert_eq!(store.names(), vec!["upload.txt".to_string()]);
        assert_eq!(store.state(), ArtifactState::Open);
    }

    #[test]
    fn test_create_twice_replaces() {
        let store = LocalArtifactStore::new().unwrap();
        let first = store.create("a.txt", b"one").unwrap();
        let second = store.create("a.txt", b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert_eq!(store.names().len(), 1);
    }

    #[test]
    fn test_remove_exactly_once() {
        let store = LocalArtifactStore::new().unwrap();
        let path = store.create("a.txt", b"x").unwrap();
        let root = store.root().unwrap();
        assert_eq!(store.remove_all().unwrap(), 1);
        assert!(!path.exists());
        assert!(!root.exists());
        assert_eq!(store.remove_all().unwrap(), 0);
        assert_eq!(store.state(), ArtifactState::Removed);
        assert!(store.create("b.txt", b"y").is_err());
    }

    #[test]
    fn test_rejects_paths() {
        let store = LocalArtifactStore::new().unwrap();
        assert!(store.create("../escape.txt", b"x").is_err());
        assert!(store.create("dir/file.txt", b"x").is_err());
        assert!(store.create("", b"x").is_err());
    }
}

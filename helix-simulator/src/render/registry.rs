//! Loaded script handles
//!
//! Loading a script copies it to a snapshot next to the original, and the snapshot
//! is what gets executed. Edits to the script file therefore have no effect until
//! its handle is evicted, normally for the whole build directory after a rebuild.
//! Snapshots stay beside their script so relative imports keep resolving.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, SimulatorError};

/// A script file loaded by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    /// Absolute script path
    pub path: PathBuf,
    /// Copy of the script taken when it was loaded; this is what runs
    pub snapshot: PathBuf,
    /// Load counter value, distinct for every load
    pub generation: u64,
}

/// Arena of loaded scripts keyed by absolute path
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    handles: RwLock<HashMap<PathBuf, Arc<ScriptHandle>>>,
    loads: AtomicU64,
}

fn snapshot_path(path: &Path, generation: u64) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let name = match path.extension() {
        Some(ext) => format!(".{stem}-{generation}.{}", ext.to_string_lossy()),
        None => format!(".{stem}-{generation}"),
    };
    path.with_file_name(name)
}

fn discard(handle: &ScriptHandle) {
    if let Err(e) = std::fs::remove_file(&handle.snapshot) {
        warn!(path = %handle.snapshot.display(), error = %e, "unable to remove script snapshot");
    }
}

impl ScriptRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for `path`, loading it on first use
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a regular file or cannot be copied.
    pub async fn load(&self, path: &Path) -> Result<Arc<ScriptHandle>> {
        if let Some(handle) = self.handles.read().get(path) {
            return Ok(Arc::clone(handle));
        }

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(SimulatorError::internal(format!(
                "no regular file: {}",
                path.display()
            )));
        }
        let generation = self.loads.fetch_add(1, Ordering::Relaxed);
        let snapshot = snapshot_path(path, generation);
        tokio::fs::copy(path, &snapshot).await?;
        let handle = Arc::new(ScriptHandle {
            path: path.to_path_buf(),
            snapshot,
            generation,
        });
        debug!(path = %path.display(), generation, "script loaded");

        let winner = Arc::clone(
            self.handles
                .write()
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::clone(&handle)),
        );
        // a concurrent load won; drop our copy
        if !Arc::ptr_eq(&winner, &handle) {
            discard(&handle);
        }
        Ok(winner)
    }

    /// Drop every handle below `prefix`, returning how many were dropped
    pub fn evict_prefix(&self, prefix: &Path) -> usize {
        let evicted: Vec<Arc<ScriptHandle>> = {
            let mut handles = self.handles.write();
            let paths: Vec<PathBuf> = handles
                .keys()
                .filter(|path| path.starts_with(prefix))
                .cloned()
                .collect();
            paths.iter().filter_map(|path| handles.remove(path)).collect()
        };
        for handle in &evicted {
            discard(handle);
        }
        evicted.len()
    }

    /// Number of cached handles
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Whether no handle is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl Drop for ScriptRegistry {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().values() {
            discard(handle);
        }
    }
}

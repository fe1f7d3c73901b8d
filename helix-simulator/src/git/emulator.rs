//! Local repository emulation
//!
//! The [`LocalRepoEmulator`] maps local working copies to the git references they
//! stand in for. Resolving a mapped reference lazily starts the embedded
//! [`GitService`] and returns a reference that points at it, so content is fetched
//! from the developer's working copy exactly as it would be from the real host.
//!
//! Lifecycle: `Stopped → Starting → Running → Stopped`. Concurrent first resolves
//! share a single start; a failed start leaves the emulator `Stopped` so a later
//! resolve can retry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::reference::GitReference;
use super::service::{GitService, VirtualRepo, GIT_LOCAL_OWNER};
use crate::error::{Result, SimulatorError};

/// Host under which emulated references are published
pub const GIT_LOCAL_HOST: &str = "127.0.0.1";

/// Observable emulator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    /// Service not running
    Stopped,
    /// Service start in flight
    Starting,
    /// Service running
    Running,
}

/// A local directory registered for a git reference
#[derive(Debug, Clone)]
pub struct LocalRepoMapping {
    /// Repo-identity key of the emulated reference
    pub key: String,
    /// Working copy directory (absolute)
    pub local_path: PathBuf,
    /// Reference the directory stands in for
    pub reference: GitReference,
}

/// Emulated references captured when the service started
#[derive(Debug)]
struct RunningEmulator {
    port: u16,
    emulated: HashMap<String, GitReference>,
}

#[derive(Debug, Default)]
struct Mappings {
    by_path: HashMap<PathBuf, LocalRepoMapping>,
    by_key: HashMap<String, PathBuf>,
}

enum Lifecycle {
    Stopped,
    Starting,
    Running(Arc<RunningEmulator>),
}

/// Registry of local working copies served by an embedded git service
pub struct LocalRepoEmulator {
    cwd: PathBuf,
    service: Arc<dyn GitService>,
    mappings: RwLock<Mappings>,
    lifecycle: RwLock<Lifecycle>,
    start_guard: Mutex<()>,
}

impl LocalRepoEmulator {
    /// Create an emulator resolving relative directories against `cwd`
    pub fn new(cwd: impl Into<PathBuf>, service: Arc<dyn GitService>) -> Self {
        Self {
            cwd: cwd.into(),
            service,
            mappings: RwLock::new(Mappings::default()),
            lifecycle: RwLock::new(Lifecycle::Stopped),
            start_guard: Mutex::new(()),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EmulatorState {
        match &*self.lifecycle.read() {
            Lifecycle::Stopped => EmulatorState::Stopped,
            Lifecycle::Starting => EmulatorState::Starting,
            Lifecycle::Running(_) => EmulatorState::Running,
        }
    }

    /// Port of the running service, if any
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Some(running.port),
            _ => None,
        }
    }

    /// Registered mappings
    #[must_use]
    pub fn mappings(&self) -> Vec<LocalRepoMapping> {
        self.mappings.read().by_path.values().cloned().collect()
    }

    /// Register `local_dir` as the working copy for `reference`
    ///
    /// Registering the same pair again is a no-op. Mappings added while the service
    /// is running are picked up on its next start.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::RepoConflict`] if the directory is already mapped to a
    /// different repository, or the repository to a different directory.
    /// [`SimulatorError::Config`] for an empty directory.
    pub fn register(&self, local_dir: impl AsRef<Path>, reference: &GitReference) -> Result<()> {
        let local_dir = local_dir.as_ref();
        if local_dir.as_os_str().is_empty() {
            return Err(SimulatorError::Config(format!(
                "{} is no valid git repository.",
                local_dir.display()
            )));
        }
        let local_path = self.cwd.join(local_dir);
        let key = reference.repo_key();

        let mut mappings = self.mappings.write();
        if let Some(existing) = mappings.by_path.get(&local_path) {
            if existing.key != key {
                return Err(SimulatorError::RepoConflict {
                    key,
                    path: local_dir.display().to_string(),
                });
            }
            return Ok(());
        }
        if let Some(existing) = mappings.by_key.get(&key) {
            return Err(SimulatorError::RepoConflict {
                key,
                path: existing.display().to_string(),
            });
        }

        debug!(%key, path = %local_path.display(), "registering local repository");
        mappings.by_key.insert(key.clone(), local_path.clone());
        mappings.by_path.insert(
            local_path.clone(),
            LocalRepoMapping {
                key,
                local_path,
                reference: reference.clone(),
            },
        );
        Ok(())
    }

    /// Resolve `reference` to its emulated location
    ///
    /// Returns `None` when no working copy is registered for the reference's
    /// repository. Otherwise the service is started if needed and the emulated
    /// reference is returned with the caller's sub-path.
    ///
    /// # Errors
    ///
    /// Returns an error if the git service fails to start.
    pub async fn resolve(&self, reference: &GitReference) -> Result<Option<GitReference>> {
        let key = reference.repo_key();
        if !self.mappings.read().by_key.contains_key(&key) {
            return Ok(None);
        }

        let running = self.ensure_running().await?;
        Ok(running
            .emulated
            .get(&key)
            .map(|emulated| emulated.with_path(reference.path())))
    }

    fn running(&self) -> Option<Arc<RunningEmulator>> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Some(Arc::clone(running)),
            _ => None,
        }
    }

    async fn ensure_running(&self) -> Result<Arc<RunningEmulator>> {
        if let Some(running) = self.running() {
            return Ok(running);
        }

        let _guard = self.start_guard.lock().await;
        // another caller may have finished starting while we waited
        if let Some(running) = self.running() {
            return Ok(running);
        }

        *self.lifecycle.write() = Lifecycle::Starting;
        match self.start_service().await {
            Ok(running) => {
                let running = Arc::new(running);
                *self.lifecycle.write() = Lifecycle::Running(Arc::clone(&running));
                Ok(running)
            }
            Err(e) => {
                *self.lifecycle.write() = Lifecycle::Stopped;
                Err(e)
            }
        }
    }

    async fn start_service(&self) -> Result<RunningEmulator> {
        let mappings = self.mappings();
        let repos: Vec<VirtualRepo> = mappings
            .iter()
            .map(|m| VirtualRepo {
                name: m.key.clone(),
                path: m.local_path.clone(),
            })
            .collect();

        debug!("Launching local git server...");
        let port = self.service.start(repos.clone()).await?;

        let mut emulated = HashMap::with_capacity(mappings.len());
        for (mapping, repo) in mappings.iter().zip(&repos) {
            let branch = match self.service.current_branch(repo).await {
                Ok(branch) => branch,
                Err(e) => {
                    self.service.stop().await.ok();
                    return Err(e);
                }
            };
            let local = GitReference::emulated(
                GIT_LOCAL_HOST,
                port,
                GIT_LOCAL_OWNER,
                &mapping.key,
                &branch,
            );
            info!(
                "git emulating {} via {} from '{}'",
                mapping.reference,
                local,
                mapping.local_path.display()
            );
            emulated.insert(mapping.key.clone(), local);
        }

        Ok(RunningEmulator { port, emulated })
    }

    /// Stop the service; a later resolve starts it again
    ///
    /// # Errors
    ///
    /// Returns an error if the git service fails to stop.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.start_guard.lock().await;
        if self.running().is_none() {
            return Ok(());
        }
        debug!("Stopping local git server...");
        *self.lifecycle.write() = Lifecycle::Stopped;
        self.service.stop().await
    }
}

//! Embedded git hosting service
//!
//! The emulator talks to the hosting service through [`GitService`].
//! [`WorkingCopyService`] is the built-in implementation: a small axum server that
//! answers raw-content requests of the form
//! `/raw/helix/<repo-key>/<ref>/<path>` straight from the working tree of the mapped
//! directory, so uncommitted edits are visible immediately.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path as UrlPath, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use super::working_copy;
use crate::error::{Result, SimulatorError};

/// Owner under which every emulated repository is published
pub const GIT_LOCAL_OWNER: &str = "helix";

/// A local directory published by the hosting service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualRepo {
    /// Repository name on the service (the repo-identity key)
    pub name: String,
    /// Working copy root
    pub path: PathBuf,
}

/// Embedded git hosting service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitService: Send + Sync {
    /// Start serving `repos`, returning the bound port
    ///
    /// The branch checked out in each repository is captured here and stays
    /// published until the next start.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::PortInUse`] if the port is taken, or an error reading a
    /// repository's checked-out branch.
    async fn start(&self, repos: Vec<VirtualRepo>) -> Result<u16>;

    /// Branch published for `repo`
    ///
    /// # Errors
    ///
    /// Returns an error if the branch cannot be determined.
    async fn current_branch(&self, repo: &VirtualRepo) -> Result<String>;

    /// Stop serving
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be shut down.
    async fn stop(&self) -> Result<()>;
}

struct RunningServer {
    state: ServiceState,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Git service serving raw content from working copies
pub struct WorkingCopyService {
    host: String,
    port: u16,
    running: Mutex<Option<RunningServer>>,
}

impl WorkingCopyService {
    /// Create a service that will bind `host:port` (port 0 picks a free port)
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            running: Mutex::new(None),
        }
    }
}

impl Default for WorkingCopyService {
    fn default() -> Self {
        Self::new("127.0.0.1", 0)
    }
}

/// A repository as published, with the branch checked out at start
#[derive(Debug)]
struct PublishedRepo {
    repo: VirtualRepo,
    branch: String,
}

#[derive(Clone)]
struct ServiceState {
    repos: Arc<HashMap<String, PublishedRepo>>,
}

/// Map a bind error to the simulator's error taxonomy
pub(crate) fn bind_error(err: std::io::Error, port: u16) -> SimulatorError {
    if err.kind() == std::io::ErrorKind::AddrInUse {
        SimulatorError::PortInUse(port)
    } else {
        SimulatorError::Io(err)
    }
}

#[async_trait]
impl GitService for WorkingCopyService {
    async fn start(&self, repos: Vec<VirtualRepo>) -> Result<u16> {
        let mut published = HashMap::with_capacity(repos.len());
        for repo in repos {
            let branch = working_copy::current_branch(&repo.path).await?;
            published.insert(repo.name.clone(), PublishedRepo { repo, branch });
        }
        let state = ServiceState {
            repos: Arc::new(published),
        };

        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| bind_error(e, self.port))?;
        let port = listener.local_addr()?.port();

        let app = Router::new()
            .route("/raw/{owner}/{repo}/{*rest}", get(serve_raw))
            .with_state(state.clone());

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                signal.await.ok();
            });
            if let Err(e) = server.await {
                warn!(error = %e, "git service terminated with error");
            }
        });

        let previous = self.running.lock().replace(RunningServer {
            state,
            shutdown,
            task,
        });
        if let Some(previous) = previous {
            previous.shutdown.send(()).ok();
        }
        info!(port, "git service listening");
        Ok(port)
    }

    async fn current_branch(&self, repo: &VirtualRepo) -> Result<String> {
        let captured = self.running.lock().as_ref().and_then(|running| {
            running
                .state
                .repos
                .get(&repo.name)
                .filter(|published| published.repo.path == repo.path)
                .map(|published| published.branch.clone())
        });
        match captured {
            Some(branch) => Ok(branch),
            None => working_copy::current_branch(&repo.path).await,
        }
    }

    async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.shutdown.send(()).ok();
            if let Err(e) = running.task.await {
                warn!(error = %e, "git service task failed to join");
            }
            info!("git service stopped");
        }
        Ok(())
    }
}

/// Reject paths that would escape the working copy
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| relative.to_path_buf())
}

async fn serve_raw(
    State(state): State<ServiceState>,
    UrlPath((owner, repo, rest)): UrlPath<(String, String, String)>,
) -> Response {
    if owner != GIT_LOCAL_OWNER {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(published) = state.repos.get(&repo) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // branch names may contain slashes, so match the captured branch as a prefix
    let Some(path) = rest
        .strip_prefix(published.branch.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        debug!(%repo, %rest, branch = %published.branch, "ref is not the published branch");
        return StatusCode::NOT_FOUND.into_response();
    };
    match working_copy::current_branch(&published.repo.path).await {
        Ok(branch) if branch != published.branch => warn!(
            %repo,
            published = %published.branch,
            checked_out = %branch,
            "working copy switched branch since the git service started; restart to publish it"
        ),
        Ok(_) => {}
        Err(e) => debug!(%repo, error = %e, "unable to read checked out branch"),
    }
    let Some(relative) = safe_relative_path(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = published.repo.path.join(&relative);
    match tokio::fs::read(&file).await {
        Ok(data) => {
            let content_type = mime_guess::from_path(&file)
                .first_or_octet_stream()
                .to_string();
            ([(CONTENT_TYPE, content_type)], data).into_response()
        }
        Err(_) => {
            debug!(path = %file.display(), "no such file in working copy");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::working_copy::init_fake_repo;
    use crate::git::{GitReference, LocalRepoEmulator};
    use tempfile::TempDir;

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("/docs/index.md"),
            Some(PathBuf::from("docs/index.md"))
        );
        assert!(safe_relative_path("/../etc/passwd").is_none());
        assert!(safe_relative_path("docs/../../x").is_none());
    }

    #[tokio::test]
    async fn test_serves_working_tree_for_checked_out_branch() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "main");
        std::fs::write(temp.path().join("welcome.txt"), "Hello, welcome!").unwrap();

        let service = WorkingCopyService::default();
        let port = service
            .start(vec![VirtualRepo {
                name: "localhost--local--default".to_string(),
                path: temp.path().to_path_buf(),
            }])
            .await
            .unwrap();

        let base = format!("http://127.0.0.1:{port}/raw/helix/localhost--local--default");
        let ok = reqwest::get(format!("{base}/main/welcome.txt")).await.unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.text().await.unwrap(), "Hello, welcome!");

        let other_ref = reqwest::get(format!("{base}/other/welcome.txt")).await.unwrap();
        assert_eq!(other_ref.status(), 404);

        let missing = reqwest::get(format!("{base}/main/missing.txt")).await.unwrap();
        assert_eq!(missing.status(), 404);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_branch_with_slashes() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "feature/x");
        std::fs::write(temp.path().join("welcome.txt"), "Hello, feature!").unwrap();

        let emulator = LocalRepoEmulator::new("/", Arc::new(WorkingCopyService::default()));
        let blog = GitReference::parse("https://github.com/adobe/blog.git").unwrap();
        emulator.register(temp.path(), &blog).unwrap();
        let emulated = emulator.resolve(&blog).await.unwrap().unwrap();
        assert_eq!(emulated.git_ref(), "feature/x");

        let ok = reqwest::get(format!("{}/welcome.txt", emulated.raw()))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.text().await.unwrap(), "Hello, feature!");

        let port = emulator.port().unwrap();
        let base = format!("http://127.0.0.1:{port}/raw/helix/{}", blog.repo_key());
        let prefix_only = reqwest::get(format!("{base}/feature/welcome.txt"))
            .await
            .unwrap();
        assert_eq!(prefix_only.status(), 404);

        emulator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_branch_switch_keeps_published_branch() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "main");
        std::fs::write(temp.path().join("welcome.txt"), "Hello, welcome!").unwrap();

        let repo = VirtualRepo {
            name: "localhost--local--default".to_string(),
            path: temp.path().to_path_buf(),
        };
        let service = WorkingCopyService::default();
        let port = service.start(vec![repo.clone()]).await.unwrap();

        init_fake_repo(temp.path(), "other");
        assert_eq!(service.current_branch(&repo).await.unwrap(), "main");

        let base = format!("http://127.0.0.1:{port}/raw/helix/localhost--local--default");
        let published = reqwest::get(format!("{base}/main/welcome.txt")).await.unwrap();
        assert_eq!(published.status(), 200);
        let switched = reqwest::get(format!("{base}/other/welcome.txt")).await.unwrap();
        assert_eq!(switched.status(), 404);

        service.stop().await.unwrap();
        assert_eq!(service.current_branch(&repo).await.unwrap(), "other");
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let service = WorkingCopyService::new("127.0.0.1", port);
        let result = service.start(Vec::new()).await;
        assert!(matches!(result, Err(SimulatorError::PortInUse(p)) if p == port));
    }
}

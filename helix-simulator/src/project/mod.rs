//! Simulator project
//!
//! A [`Project`] validates the project directory against the configuration, wires
//! the routing core together and owns the HTTP server.
//!
//! # Example
//!
//! ```rust,no_run
//! use helix_simulator::{config::SimulatorConfig, project::Project};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SimulatorConfig::load()?;
//! let mut project = Project::builder(config).init().await?;
//! let port = project.start().await?;
//! println!("listening on {port}");
//! project.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::dispatch::{DeliveryDispatcher, DispatchSettings};
use crate::error::{Result, SimulatorError};
use crate::fetch::{HttpClient, ReqwestClient};
use crate::git::{find_working_copy, GitReference, GitService, LocalRepoEmulator, WorkingCopyService};
use crate::render::{CommandRenderEngine, RenderEngine};
use crate::server::SimulatorServer;
use crate::strain::{Strain, StrainRegistry};
use crate::template::TemplateResolver;

const INDEX_MD: &str = "index.md";
const README_MD: &str = "README.md";

/// Builder for a [`Project`]
///
/// Collaborators that are not set explicitly are created from the configuration.
pub struct ProjectBuilder {
    config: SimulatorConfig,
    cwd: Option<PathBuf>,
    git_service: Option<Arc<dyn GitService>>,
    engine: Option<Arc<dyn RenderEngine>>,
    client: Option<Arc<dyn HttpClient>>,
}

impl ProjectBuilder {
    /// Use `cwd` as project directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Use another git hosting service
    #[must_use]
    pub fn with_git_service(mut self, service: Arc<dyn GitService>) -> Self {
        self.git_service = Some(service);
        self
    }

    /// Use another render engine
    #[must_use]
    pub fn with_render_engine(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use another HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Validate the project and wire it up
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Config`] when the strains are invalid, when the project
    /// serves local content without an index document or outside a working copy, or
    /// when a configured local repository is not inside a working copy.
    /// [`SimulatorError::RepoConflict`] when two repositories claim one directory.
    pub async fn init(self) -> Result<Project> {
        let cwd = match self.cwd.or_else(|| self.config.project.cwd.clone()) {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(cwd) => std::env::current_dir()?.join(cwd),
            None => std::env::current_dir()?,
        };
        let build_dir = cwd.join(&self.config.project.build_dir);
        let index_file = find_index(&cwd).await;
        let working_copy = find_working_copy(&cwd);

        let registry = Arc::new(StrainRegistry::from_config(self.config.strain_configs())?);
        let strain = registry.get(&self.config.project.strain_name).ok_or_else(|| {
            SimulatorError::Config(format!(
                "unknown strain '{}'",
                self.config.project.strain_name
            ))
        })?;

        let git_service = self.git_service.unwrap_or_else(|| {
            Arc::new(WorkingCopyService::new(
                self.config.git.host.clone(),
                self.config.git.port,
            ))
        });
        let emulator = Arc::new(LocalRepoEmulator::new(&cwd, git_service));

        if strain.content.is_local() {
            if index_file.is_none() {
                return Err(SimulatorError::Config(
                    "No \"content\" location specified and no \"README.md\" or \"index.md\" found."
                        .to_string(),
                ));
            }
            let root = working_copy.as_ref().ok_or_else(|| {
                SimulatorError::Config(
                    "Local README.md or index.md must be inside a valid git repository."
                        .to_string(),
                )
            })?;
            emulator.register(root, &strain.content)?;
        }

        for local in &self.config.local_repos {
            let dir = cwd.join(&local.path);
            let root = find_working_copy(&dir).ok_or_else(|| {
                SimulatorError::Config(format!(
                    "{} is not inside a valid git repository.",
                    local.path.display()
                ))
            })?;
            emulator.register(root, &GitReference::parse(&local.url)?)?;
        }

        let templates = Arc::new(TemplateResolver::new(&build_dir));
        templates.rescan().await?;

        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(CommandRenderEngine::new(
                self.config.project.render_command.clone(),
                &build_dir,
            ))
        });
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(ReqwestClient::new()));

        let settings = DispatchSettings {
            inner_cdn_domain: self.config.project.inner_cdn_domain.clone(),
            default_params: self.config.project.params.clone(),
            request_override_headers: override_headers(&self.config)?,
        };
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            registry, emulator, templates, engine, client, settings,
        ));

        info!("Initialized simulator project");
        debug!("      strain: {}", strain.name);
        debug!(" contentRepo: {}", strain.content);
        debug!("    buildDir: {}", build_dir.display());

        Ok(Project {
            config: self.config,
            cwd,
            build_dir,
            index_file,
            working_copy,
            strain,
            dispatcher,
            server: None,
        })
    }
}

/// `index.md` if present, else `README.md`
async fn find_index(cwd: &Path) -> Option<PathBuf> {
    for name in [INDEX_MD, README_MD] {
        let candidate = cwd.join(name);
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|m| m.is_file())
        {
            return Some(candidate);
        }
    }
    None
}

fn override_headers(config: &SimulatorConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.project.request_override.headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| SimulatorError::Config(format!("invalid override header {name}: {e}")))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| SimulatorError::Config(format!("invalid override value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// An initialised simulator project
pub struct Project {
    config: SimulatorConfig,
    cwd: PathBuf,
    build_dir: PathBuf,
    index_file: Option<PathBuf>,
    working_copy: Option<PathBuf>,
    strain: Arc<Strain>,
    dispatcher: Arc<DeliveryDispatcher>,
    server: Option<SimulatorServer>,
}

impl Project {
    /// Start building a project from `config`
    #[must_use]
    pub fn builder(config: SimulatorConfig) -> ProjectBuilder {
        ProjectBuilder {
            config,
            cwd: None,
            git_service: None,
            engine: None,
            client: None,
        }
    }

    /// Configuration the project was built from
    #[must_use]
    pub const fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Project directory
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Build directory holding the render scripts
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Index document of local content
    #[must_use]
    pub fn index_file(&self) -> Option<&Path> {
        self.index_file.as_deref()
    }

    /// Working copy enclosing the project directory
    #[must_use]
    pub fn working_copy(&self) -> Option<&Path> {
        self.working_copy.as_deref()
    }

    /// Strain selected by configuration
    #[must_use]
    pub const fn strain(&self) -> &Arc<Strain> {
        &self.strain
    }

    /// Request dispatcher
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<DeliveryDispatcher> {
        &self.dispatcher
    }

    /// Whether the server is running
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.server.is_some()
    }

    /// Port of the running server
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().map(SimulatorServer::port)
    }

    /// Start the HTTP server, returning its port
    ///
    /// # Errors
    ///
    /// [`SimulatorError::PortInUse`] if the configured port is taken.
    pub async fn start(&mut self) -> Result<u16> {
        if let Some(server) = &self.server {
            return Ok(server.port());
        }
        debug!("Launching simulator server...");
        let server = SimulatorServer::start(
            Arc::clone(&self.dispatcher),
            &self.config.server.host,
            self.config.server.port,
        )
        .await?;
        let port = server.port();
        self.server = Some(server);
        Ok(port)
    }

    /// Stop the HTTP server and the git emulator
    ///
    /// # Errors
    ///
    /// Returns an error if the git service fails to stop.
    pub async fn stop(&mut self) -> Result<()> {
        match self.server.take() {
            Some(server) => server.stop().await,
            None => self.dispatcher.emulator().stop().await,
        }
    }

    /// Rescan the build directory and drop loaded scripts after a rebuild
    ///
    /// Returns the number of scripts found.
    ///
    /// # Errors
    ///
    /// Returns an error if the build directory cannot be scanned.
    pub async fn reload_scripts(&self) -> Result<usize> {
        let count = self.dispatcher.templates().rescan().await?;
        self.dispatcher.engine().reload();
        Ok(count)
    }
}

//! helix-simulator: routing and content resolution for a local git-backed CDN
//!
//! Every request is bound to a *strain*, a named routing rule that points at a
//! content repository, a static repository or a proxy origin. The request is then
//! served by the first of these that can answer it:
//!
//! 1. the proxy origin of a proxy strain
//! 2. the inner CDN, for reserved asset paths
//! 3. the content proxy, for `.md` and `.json` documents
//! 4. a render script from the build directory
//! 5. the raw file in the content repository, then in the static repository
//!
//! Repositories can be emulated by the developer's working copy, so uncommitted
//! edits are served as if they had been pushed.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use helix_simulator::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     observability::init("info")?;
//!
//!     let config = SimulatorConfig::load()?;
//!     let mut project = Project::builder(config).init().await?;
//!     project.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     project.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod git;
pub mod observability;
pub mod project;
pub mod render;
pub mod routing;
pub mod server;
pub mod strain;
pub mod template;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! ```rust
    //! use helix_simulator::prelude::*;
    //! ```

    pub use crate::config::SimulatorConfig;
    pub use crate::dispatch::{Delivery, DeliveryDispatcher, DispatchSettings, EffectiveStrain};
    pub use crate::error::{Result, SimulatorError};
    pub use crate::fetch::{HttpClient, OutboundRequest, ReqwestClient, UpstreamResponse};
    pub use crate::git::{GitReference, GitService, LocalRepoEmulator, WorkingCopyService};
    pub use crate::observability;
    pub use crate::project::{Project, ProjectBuilder};
    pub use crate::render::{CommandRenderEngine, RenderEngine, RenderResponse};
    pub use crate::routing::{IncomingRequest, PathResolver, RequestRoutingContext};
    pub use crate::server::SimulatorServer;
    pub use crate::strain::{Strain, StrainConfig, StrainRegistry, StrainRequest};
    pub use crate::template::{ScriptDescriptor, TemplateResolver};
}

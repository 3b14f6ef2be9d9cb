//! Plugin lifecycle engine for the capstan CLI.
//!
//! The engine discovers installable plugins and plugin groups from
//! configured discovery sources, resolves version requests against
//! published inventories, downloads and verifies plugin binaries, and
//! records installs in a locally persisted catalog that stays
//! consistent across concurrent CLI invocations.
//!
//! The main pieces:
//!
//! - [`discovery`]: discovery sources and the per-source snapshot cache
//! - [`inventory`]: the snapshot data model and query layer
//! - [`version`]: version tokens and resolution rules
//! - [`catalog`]: the per-scope installed-plugin catalog with
//!   cross-process locking
//! - [`manager`]: the orchestrator tying the above into install /
//!   upgrade / sync / delete / clean operations
//!
//! Transport and context integration are seams: implement
//! [`discovery::SnapshotFetcher`], [`artifact::ArtifactDownloader`],
//! and [`manager::ContextRecommendations`], or enable the `http`
//! feature for blocking HTTPS defaults in [`fetch`].
//!
//! ```no_run
//! use capstan_plugins::discovery::DiscoverySource;
//! use capstan_plugins::fetch::{HttpArtifactDownloader, HttpSnapshotFetcher};
//! use capstan_plugins::manager::{InstallRequest, ManagerConfig, PluginManager};
//! use capstan_plugins::Result;
//!
//! # struct NoContexts;
//! # impl capstan_plugins::manager::ContextRecommendations for NoContexts {
//! #     fn recommended(
//! #         &self,
//! #         _context: &str,
//! #     ) -> anyhow::Result<Vec<capstan_plugins::manager::PluginRecommendation>> {
//! #         Ok(Vec::new())
//! #     }
//! # }
//! fn main() -> Result<()> {
//!     let timeout = capstan_plugins::config::DEFAULT_HTTP_TIMEOUT;
//!     let sources = vec![DiscoverySource::new(
//!         "default",
//!         "https://plugins.capstan.sh/inventory.json",
//!     )];
//!     let manager = PluginManager::new(
//!         ManagerConfig::for_host(sources)?,
//!         Box::new(HttpSnapshotFetcher::new(timeout)?),
//!         Box::new(HttpArtifactDownloader::new(timeout)?),
//!         Box::new(NoContexts),
//!     );
//!     manager.install(&InstallRequest::latest("secret"))?;
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
#[cfg(feature = "http")]
pub mod fetch;
mod fsutil;
pub mod inventory;
pub mod manager;
pub mod paths;
pub mod version;

pub use error::{BatchError, BatchFailure, Error, Result};
pub use manager::{ManagerConfig, PluginManager};

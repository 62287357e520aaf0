//! A dynamic plugin manager for host-embedded JavaScript packages.
//!
//! [`PluginManager`] installs Node-style CommonJS packages from an
//! npm-compatible registry, GitHub, Bitbucket, a local path, or inline source,
//! keeps a content-addressed versioned store on disk so multiple plugins can
//! depend on different versions of the same package without clobbering each
//! other, and executes each installed plugin's code in its own sandboxed
//! [`boa_engine`] realm with a faithful `require`/`module.exports`
//! implementation.
//!
//! ```no_run
//! use pluginvault::{PluginManager, PluginManagerOptions};
//!
//! # async fn run() -> pluginvault::PluginResult<()> {
//! let mut manager = PluginManager::new(PluginManagerOptions::default());
//! manager.install_from_npm("left-pad", "^1.3.0", false).await?;
//! let exports = manager.require("left-pad")?;
//! # let _ = exports;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod fetch;
mod graph;
mod lock;
mod manager;
mod manifest;
mod name;
mod pipeline;
mod store;
mod version_manager;
mod vm;

pub use config::{
    HostRequire, IgnoredDependency, NpmInstallMode, NpmRegistryConfig, PluginInfo, PluginManagerOptions,
    SandboxTemplate, SatisfactionMode,
};
pub use error::{GraphError, PluginError, PluginResult};
pub use fetch::GitHostAuthentication;
pub use manager::PluginManager;
pub use manifest::PackageManifest;
pub use pipeline::InstallSource;

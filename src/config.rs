//! Public types for constructing and configuring a [`crate::PluginManager`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use crate::fetch::GitHostAuthentication;

/// An entry in `ignored_dependencies`: an exact name or a pattern.
#[derive(Debug, Clone)]
pub enum IgnoredDependency {
    /// Matches only this exact name.
    Name(String),
    /// Matches any name the pattern matches.
    Pattern(Regex),
}

impl IgnoredDependency {
    /// True if `name` is ignored by this entry.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Name(n) => n == name,
            Self::Pattern(re) => re.is_match(name),
        }
    }
}

/// A capability the embedding host supplies so the loader can fall back to
/// the host's own module graph.
pub trait HostRequire: Send + Sync {
    /// True if the host can already provide `name` without installing it.
    fn is_available(&self, name: &str) -> bool;

    /// Resolves `name` through the host's own `require`, returning its
    /// exports as JSON (the sandbox re-hydrates it into a JS value).
    fn require(&self, name: &str) -> Option<Value>;
}

/// Per-plugin sandbox defaults: the initial `global` object and `process.env`.
#[derive(Debug, Clone, Default)]
pub struct SandboxTemplate {
    /// Environment variables visible to the plugin as `process.env`. Left at
    /// its default (empty), the sandbox seeds `process.env` from a copy of
    /// the host process's own environment; set any entry here to replace the
    /// host environment outright instead of layering over it.
    pub env: BTreeMap<String, String>,
    /// Extra global bindings visible to the plugin's `global` object. Unlike
    /// `env`, there is no host-process analogue to default to here (the
    /// embedding host is a Rust process, not a JS realm with its own
    /// `globalThis` to copy) — left empty, the plugin just gets the
    /// sandbox's own built-in globals.
    pub global: BTreeMap<String, Value>,
}

/// npm install mode re-exported at the crate surface for constructor use.
pub use crate::fetch::InstallMode as NpmInstallMode;

/// Authentication passed through to the registry fetcher. Opaque beyond
/// what `reqwest` needs to attach it to a request.
#[derive(Debug, Clone, Default)]
pub struct NpmRegistryConfig {
    /// Bearer token for private-registry access, if any.
    pub auth_token: Option<String>,
}

/// Constructor options for [`crate::PluginManager`]. All fields have
/// sensible defaults; use the `with_*` setters to override individual ones.
#[derive(Debug, Clone)]
pub struct PluginManagerOptions {
    /// Base directory used to resolve relative paths. Defaults to the
    /// process's current working directory.
    pub cwd: PathBuf,
    /// Where the active view and `.versions/` live. Defaults to
    /// `<cwd>/plugin_packages`.
    pub plugins_path: PathBuf,
    /// Where canonical versioned copies live. Defaults to
    /// `<plugins_path>/.versions`.
    pub versions_path: PathBuf,
    /// Default sandbox template applied to newly-loaded plugins.
    pub sandbox: SandboxTemplate,
    /// Base URL of the npm-compatible registry.
    pub npm_registry_url: String,
    /// Registry auth/proxy configuration.
    pub npm_registry_config: NpmRegistryConfig,
    /// Whether the registry fetcher may satisfy a selector from the cache.
    pub npm_install_mode: NpmInstallMode,
    /// Whether `require_core_modules` style core-module names resolve to the
    /// host's own implementations.
    pub require_core_modules: bool,
    /// Names or patterns skipped during recursive dependency installation.
    pub ignored_dependencies: Vec<IgnoredDependency>,
    /// Dependency names pre-satisfied with a fixed export value, bypassing
    /// installation and the loader's normal resolution.
    pub static_dependencies: BTreeMap<String, Value>,
    /// GitHub credentials for `install_from_github` and transitive GitHub deps.
    pub github_authentication: Option<GitHostAuthentication>,
    /// Bitbucket credentials for `install_from_bitbucket` and transitive deps.
    pub bitbucket_authentication: Option<GitHostAuthentication>,
    /// Total time budget for acquiring the store lock.
    pub lock_wait: std::time::Duration,
    /// Age after which a held lock is considered abandoned and stolen.
    pub lock_stale: std::time::Duration,
}

impl Default for PluginManagerOptions {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let plugins_path = cwd.join("plugin_packages");
        let versions_path = plugins_path.join(".versions");
        Self {
            cwd,
            plugins_path,
            versions_path,
            sandbox: SandboxTemplate::default(),
            npm_registry_url: "https://registry.npmjs.org".to_string(),
            npm_registry_config: NpmRegistryConfig::default(),
            npm_install_mode: NpmInstallMode::UseCache,
            require_core_modules: true,
            ignored_dependencies: Vec::new(),
            static_dependencies: BTreeMap::new(),
            github_authentication: None,
            bitbucket_authentication: None,
            lock_wait: std::time::Duration::from_secs(5),
            lock_stale: std::time::Duration::from_secs(60),
        }
    }
}

impl PluginManagerOptions {
    /// Overrides `cwd`. Does not touch `plugins_path`/`versions_path`, even
    /// if they still hold their defaults — call `with_cwd` before
    /// `with_plugins_path`/`with_versions_path`, or set those explicitly
    /// afterward, if they should move with it.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Overrides `plugins_path` directly.
    #[must_use]
    pub fn with_plugins_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugins_path = path.into();
        self
    }

    /// Overrides `versions_path` directly.
    #[must_use]
    pub fn with_versions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.versions_path = path.into();
        self
    }

    /// Overrides the registry base URL.
    #[must_use]
    pub fn with_npm_registry_url(mut self, url: impl Into<String>) -> Self {
        self.npm_registry_url = url.into();
        self
    }

    /// Overrides the cache-use mode for the registry fetcher.
    #[must_use]
    pub fn with_npm_install_mode(mut self, mode: NpmInstallMode) -> Self {
        self.npm_install_mode = mode;
        self
    }

    /// Appends an ignored-dependency entry.
    #[must_use]
    pub fn with_ignored_dependency(mut self, entry: IgnoredDependency) -> Self {
        self.ignored_dependencies.push(entry);
        self
    }

    /// Registers a static (pre-satisfied) dependency.
    #[must_use]
    pub fn with_static_dependency(mut self, name: impl Into<String>, value: Value) -> Self {
        self.static_dependencies.insert(name.into(), value);
        self
    }

    /// Overrides GitHub authentication.
    #[must_use]
    pub fn with_github_authentication(mut self, auth: GitHostAuthentication) -> Self {
        self.github_authentication = Some(auth);
        self
    }

    /// Overrides Bitbucket authentication.
    #[must_use]
    pub fn with_bitbucket_authentication(mut self, auth: GitHostAuthentication) -> Self {
        self.bitbucket_authentication = Some(auth);
        self
    }

    /// True if `name` matches any `ignored_dependencies` entry.
    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_dependencies.iter().any(|entry| entry.matches(name))
    }
}

/// A single installed top-level plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Package name.
    pub name: String,
    /// Installed (semver) version.
    pub version: String,
    /// Absolute path to the entry file (`<location>/<main>`).
    pub main_file: PathBuf,
    /// Absolute path to the plugin's active-view directory.
    pub location: PathBuf,
    /// Flattened `name -> selector` map the loader will honour for direct
    /// dependency requires.
    pub dependencies: BTreeMap<String, String>,
    /// `name -> resolved version` for the plugin's entire dependency tree,
    /// not just its direct dependencies.
    pub dependency_details: BTreeMap<String, String>,
}

impl PluginInfo {
    /// Builds the `main_file` path from `location` and a manifest's `main`.
    #[must_use]
    pub fn main_file_path(location: &Path, main: &str) -> PathBuf {
        location.join(main)
    }
}

/// Mode for [`crate::PluginManager::already_installed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatisfactionMode {
    /// Any installed version must satisfy the selector as a semver range.
    Satisfies,
    /// Any installed version whose `(major, minor, patch)` is greater than
    /// or equal to the selector's own minimum version counts as satisfying.
    SatisfiesOrGreater,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plugins_path_nests_under_cwd() {
        let opts = PluginManagerOptions::default();
        assert_eq!(opts.plugins_path, opts.cwd.join("plugin_packages"));
        assert_eq!(opts.versions_path, opts.plugins_path.join(".versions"));
    }

    #[test]
    fn ignored_dependency_name_matches_exactly() {
        let entry = IgnoredDependency::Name("left-pad".to_string());
        assert!(entry.matches("left-pad"));
        assert!(!entry.matches("left-pad-2"));
    }

    #[test]
    fn ignored_dependency_pattern_matches_regex() {
        let entry = IgnoredDependency::Pattern(Regex::new("^@internal/").unwrap());
        assert!(entry.matches("@internal/tooling"));
        assert!(!entry.matches("@external/tooling"));
    }

    #[test]
    fn is_ignored_checks_every_entry() {
        let opts = PluginManagerOptions::default()
            .with_ignored_dependency(IgnoredDependency::Name("fsevents".to_string()));
        assert!(opts.is_ignored("fsevents"));
        assert!(!opts.is_ignored("debug"));
    }
}

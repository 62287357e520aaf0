//! The public façade: [`PluginManager`] ties the lock, the acquisition
//! pipeline, the version manager, and per-plugin loaders into the single
//! entry point embedding hosts use.

use std::collections::HashMap;
use std::sync::Arc;

use semver::{Version, VersionReq};
use serde_json::Value;

use crate::config::{HostRequire, PluginInfo, PluginManagerOptions, SandboxTemplate, SatisfactionMode};
use crate::error::{PluginError, PluginResult};
use crate::fetch::{BitbucketFetcher, Fetcher, GithubFetcher, RegistryFetcher};
use crate::lock::StoreLock;
use crate::manifest::PackageManifest;
use crate::pipeline::{self, InstallSource};
use crate::store::VersionedStore;
use crate::version_manager::VersionManager;
use crate::vm::Loader;

/// Owns the versioned store, the dependency graph, every loaded plugin's
/// sandbox, and the options they were all built from.
pub struct PluginManager {
    options: PluginManagerOptions,
    version_manager: VersionManager,
    installed: HashMap<String, PluginInfo>,
    loaders: HashMap<String, Loader>,
    shared_loader: Option<Loader>,
    host_require: Option<Arc<dyn HostRequire>>,
    sandbox_template: SandboxTemplate,
}

impl PluginManager {
    /// Builds a manager over `options`, without touching the filesystem
    /// beyond what the store's lazy directory creation implies.
    #[must_use]
    pub fn new(options: PluginManagerOptions) -> Self {
        let store = VersionedStore::new(options.plugins_path.clone(), options.versions_path.clone());
        Self {
            sandbox_template: options.sandbox.clone(),
            version_manager: VersionManager::new(store),
            options,
            installed: HashMap::new(),
            loaders: HashMap::new(),
            shared_loader: None,
            host_require: None,
        }
    }

    /// Registers the embedding host's fallback `require` capability.
    pub fn with_host_require(mut self, host_require: Arc<dyn HostRequire>) -> Self {
        self.host_require = Some(host_require);
        self
    }

    /// Installs `name` from `source`, recursing into its dependency tree.
    /// `force` bypasses reuse of an already-installed version satisfying the
    /// selector.
    pub async fn install(&mut self, name: &str, source: InstallSource, force: bool) -> PluginResult<PluginInfo> {
        let lock =
            StoreLock::acquire(self.options.plugins_path.as_path(), self.options.lock_wait, self.options.lock_stale)
                .await?;

        let result = pipeline::install(
            &mut self.version_manager,
            &self.options,
            self.host_require.as_deref(),
            name,
            source,
            force,
            true,
        )
        .await;

        lock.release().await?;
        let node = result?;

        let location = self.version_manager.active_dir(name);
        let main_file = PluginInfo::main_file_path(&location, &node.manifest.main);
        let mut dependencies = node.manifest.dependencies.clone();
        dependencies.extend(node.manifest.optional_dependencies.clone());

        let info = PluginInfo {
            name: name.to_string(),
            version: node.version.to_string(),
            main_file,
            location,
            dependencies,
            dependency_details: node.dependency_details,
        };

        self.installed.insert(name.to_string(), info.clone());
        self.loaders.remove(name);
        for loader in self.loaders.values_mut() {
            loader.invalidate_all();
        }
        if let Some(shared) = &mut self.shared_loader {
            shared.invalidate_all();
        }

        Ok(info)
    }

    /// Installs `name` from the configured npm-compatible registry.
    pub async fn install_from_npm(&mut self, name: &str, selector: &str, force: bool) -> PluginResult<PluginInfo> {
        self.install(name, InstallSource::Npm(selector.to_string()), force).await
    }

    /// Installs `name` from a GitHub `owner/repo[#ref]` selector.
    pub async fn install_from_github(&mut self, name: &str, selector: &str, force: bool) -> PluginResult<PluginInfo> {
        self.install(name, InstallSource::GitHub(selector.to_string()), force).await
    }

    /// Installs `name` from a Bitbucket `owner/repo[#ref]` selector.
    pub async fn install_from_bitbucket(&mut self, name: &str, selector: &str, force: bool) -> PluginResult<PluginInfo> {
        self.install(name, InstallSource::Bitbucket(selector.to_string()), force).await
    }

    /// Installs `name` from an already-unpacked directory on disk.
    pub async fn install_from_path(&mut self, name: &str, path: &str, force: bool) -> PluginResult<PluginInfo> {
        self.install(name, InstallSource::Path(path.to_string()), force).await
    }

    /// Installs `name` from inline source code. A call with no `version`
    /// always behaves as `force: true` — there's no version to compare
    /// against an already-installed one, so reuse would silently keep
    /// whatever was installed first under this name.
    pub async fn install_from_code(
        &mut self,
        name: &str,
        source: &str,
        version: Option<&str>,
        force: bool,
    ) -> PluginResult<PluginInfo> {
        let force = force || version.is_none();
        self.install(name, InstallSource::Code { source: source.to_string(), version: version.map(str::to_string) }, force)
            .await
    }

    /// Uninstalls `name`: untracks it as top-level, sweeps any version now
    /// unreferenced, and drops its loader.
    pub async fn uninstall(&mut self, name: &str) -> PluginResult<()> {
        let lock =
            StoreLock::acquire(self.options.plugins_path.as_path(), self.options.lock_wait, self.options.lock_stale)
                .await?;
        let result = self.version_manager.uninstall(name).await;
        lock.release().await?;
        result?;

        self.installed.remove(name);
        self.loaders.remove(name);
        for loader in self.loaders.values_mut() {
            loader.invalidate_all();
        }
        Ok(())
    }

    /// Uninstalls every currently top-level plugin.
    pub async fn uninstall_all(&mut self) -> PluginResult<()> {
        let names: Vec<String> = self.installed.keys().cloned().collect();
        for name in names {
            self.uninstall(&name).await?;
        }
        Ok(())
    }

    /// Every currently installed top-level plugin, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self.installed.values().cloned().collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Requires `name`'s main file, loading (or reusing) its sandbox.
    pub fn require(&mut self, name: &str) -> PluginResult<Value> {
        let info = self
            .installed
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::operation("require", format!("'{name}' is not installed")))?;

        let loader = self.loader_for(&info)?;
        let exports = loader.load_file(&info.main_file.clone())?;
        loader.to_json(&exports)
    }

    /// Evaluates `code` as a nameless module against the active view.
    pub fn run_script(&mut self, code: &str) -> PluginResult<Value> {
        if self.shared_loader.is_none() {
            let mut dependency_details = std::collections::BTreeMap::new();
            for info in self.installed.values() {
                dependency_details.insert(info.name.clone(), info.version.clone());
            }
            self.shared_loader = Some(Loader::new(
                self.options.plugins_path.clone(),
                dependency_details,
                self.options.versions_path.clone(),
                self.options.static_dependencies.clone(),
                self.options.require_core_modules,
                self.host_require.clone(),
                &self.sandbox_template,
            )?);
        }
        let loader = self
            .shared_loader
            .as_mut()
            .ok_or_else(|| PluginError::operation("run_script", "shared loader failed to initialise"))?;
        let exports = loader.run_script(code)?;
        loader.to_json(&exports)
    }

    /// True if an installed version of `name` satisfies `selector` under
    /// `mode`.
    #[must_use]
    pub fn already_installed(&self, name: &str, selector: &str, mode: SatisfactionMode) -> bool {
        let installed = self.version_manager.versions_of(name);
        if installed.is_empty() {
            return false;
        }
        if selector.is_empty() || selector == "latest" || selector == "*" {
            return true;
        }
        match mode {
            SatisfactionMode::Satisfies => {
                VersionReq::parse(selector).is_ok_and(|req| installed.iter().any(|v| req.matches(v)))
            }
            SatisfactionMode::SatisfiesOrGreater => minimum_bound(selector).is_some_and(|min| installed.iter().any(|v| *v >= min)),
        }
    }

    /// The stored [`PluginInfo`] for an installed top-level plugin.
    #[must_use]
    pub fn get_info(&self, name: &str) -> Option<PluginInfo> {
        self.installed.get(name).cloned()
    }

    /// Resolves `name`+`selector` against the configured registry without
    /// installing anything.
    pub async fn query_package(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        self.query_package_from_npm(name, selector).await
    }

    /// Resolves `name`+`selector` against the npm-compatible registry.
    pub async fn query_package_from_npm(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let fetcher =
            RegistryFetcher::new(self.options.npm_registry_url.clone(), self.version_manager.store().clone(), self.options.npm_install_mode);
        fetcher.resolve(name, selector).await
    }

    /// Resolves `name`+`selector` against GitHub.
    pub async fn query_package_from_github(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let fetcher = GithubFetcher::new(self.options.github_authentication.clone());
        fetcher.resolve(name, selector).await
    }

    /// Resolves `name`+`selector` against Bitbucket.
    pub async fn query_package_from_bitbucket(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let fetcher = BitbucketFetcher::new(self.options.bitbucket_authentication.clone());
        fetcher.resolve(name, selector).await
    }

    /// Overrides the default sandbox template applied to newly-loaded
    /// plugins. Plugins already loaded keep their existing sandbox.
    pub fn set_sandbox_template(&mut self, template: SandboxTemplate) {
        self.sandbox_template = template;
    }

    /// The current default sandbox template.
    #[must_use]
    pub fn get_sandbox_template(&self) -> &SandboxTemplate {
        &self.sandbox_template
    }

    fn loader_for(&mut self, info: &PluginInfo) -> PluginResult<&mut Loader> {
        if !self.loaders.contains_key(&info.name) {
            let loader = Loader::new(
                info.location.clone(),
                info.dependency_details.clone(),
                self.options.versions_path.clone(),
                self.options.static_dependencies.clone(),
                self.options.require_core_modules,
                self.host_require.clone(),
                &self.sandbox_template,
            )?;
            self.loaders.insert(info.name.clone(), loader);
        }
        self.loaders
            .get_mut(&info.name)
            .ok_or_else(|| PluginError::operation("require", format!("no loader for '{}'", info.name)))
    }
}

/// The minimum version a selector's range admits, read off the lowest of its
/// comparators (`VersionReq::parse` turns a bare `"1.2.3"` into an implicit
/// caret range, so this also covers exact-version selectors).
fn minimum_bound(selector: &str) -> Option<Version> {
    let req = VersionReq::parse(selector).ok()?;
    req.comparators.iter().map(|c| Version::new(c.major, c.minor.unwrap_or(0), c.patch.unwrap_or(0))).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_fixture(path: &std::path::Path, name: &str, version: &str, main_body: &str) {
        tokio::fs::create_dir_all(path).await.unwrap();
        tokio::fs::write(path.join("package.json"), format!(r#"{{"name":"{name}","version":"{version}"}}"#))
            .await
            .unwrap();
        tokio::fs::write(path.join("index.js"), main_body).await.unwrap();
    }

    #[tokio::test]
    async fn install_from_path_then_require_returns_exports() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("source");
        write_fixture(&source_dir, "greeter", "1.0.0", "module.exports = { greeting: 'hi' };").await;

        let options = PluginManagerOptions::default()
            .with_plugins_path(tmp.path().join("plugins"))
            .with_versions_path(tmp.path().join("plugins/.versions"));
        let mut manager = PluginManager::new(options);

        manager.install_from_path("greeter", source_dir.to_str().unwrap(), false).await.unwrap();
        let exports = manager.require("greeter").unwrap();
        assert_eq!(exports["greeting"], "hi");
    }

    #[tokio::test]
    async fn uninstall_removes_plugin_from_list() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("source");
        write_fixture(&source_dir, "throwaway", "1.0.0", "module.exports = {};").await;

        let options = PluginManagerOptions::default()
            .with_plugins_path(tmp.path().join("plugins"))
            .with_versions_path(tmp.path().join("plugins/.versions"));
        let mut manager = PluginManager::new(options);

        manager.install_from_path("throwaway", source_dir.to_str().unwrap(), false).await.unwrap();
        assert_eq!(manager.list().len(), 1);

        manager.uninstall("throwaway").await.unwrap();
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn already_installed_checks_selector_satisfaction() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("source");
        write_fixture(&source_dir, "versioned", "2.1.0", "module.exports = {};").await;

        let options = PluginManagerOptions::default()
            .with_plugins_path(tmp.path().join("plugins"))
            .with_versions_path(tmp.path().join("plugins/.versions"));
        let mut manager = PluginManager::new(options);
        manager.install_from_path("versioned", source_dir.to_str().unwrap(), false).await.unwrap();

        assert!(manager.already_installed("versioned", "^2.0.0", SatisfactionMode::Satisfies));
        assert!(!manager.already_installed("versioned", "^3.0.0", SatisfactionMode::Satisfies));
        assert!(manager.already_installed("versioned", "2.0.0", SatisfactionMode::SatisfiesOrGreater));
    }
}

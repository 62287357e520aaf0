//! Ties the on-disk [`VersionedStore`] to the [`DependencyGraph`] and keeps
//! the active view in sync with reference counts.

use std::path::PathBuf;

use semver::Version;

use crate::error::PluginResult;
use crate::graph::DependencyGraph;
use crate::store::VersionedStore;

/// Owns the versioned store, the plugin->dependency-version graph, and the
/// name->active-version mapping. All mutation goes through here so the two
/// stay consistent.
#[derive(Debug)]
pub struct VersionManager {
    store: VersionedStore,
    graph: DependencyGraph,
}

impl VersionManager {
    /// Builds a manager over an existing (possibly empty) store.
    #[must_use]
    pub fn new(store: VersionedStore) -> Self {
        Self { store, graph: DependencyGraph::new() }
    }

    /// The underlying store, for callers that need direct filesystem access
    /// (the acquisition pipeline, chiefly).
    #[must_use]
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Records `name@version` as already present in `.versions/` (called
    /// after the pipeline ingests it) and marks it top-level.
    pub async fn mark_top_level(&mut self, name: &str, version: &Version) -> PluginResult<()> {
        self.graph.mark_top_level(name, version);
        self.refresh_active(name).await
    }

    /// Links `plugin_name@plugin_version` to `dep_name@dep_version` in the
    /// graph. Does not touch the active view: dependency links don't change
    /// which version of `dep_name` is exposed to top-level `require`.
    pub fn link(
        &mut self,
        plugin_name: &str,
        plugin_version: &Version,
        dep_name: &str,
        dep_version: &Version,
    ) -> PluginResult<()> {
        self.graph.link(plugin_name, plugin_version, dep_name, dep_version)?;
        Ok(())
    }

    /// Unmarks every version of `name` as top-level, sweeps zero-refcount
    /// nodes out of the graph and off disk, and refreshes the active view
    /// for every name touched by the sweep.
    pub async fn uninstall(&mut self, name: &str) -> PluginResult<()> {
        let removed = self.graph.untrack_top_level(name);
        let mut touched: Vec<String> = removed.iter().map(|(n, _)| n.clone()).collect();
        touched.push(name.to_string());
        touched.sort();
        touched.dedup();

        for (removed_name, removed_version) in &removed {
            self.store.remove_version(removed_name, &removed_version.to_string()).await?;
        }
        for touched_name in touched {
            self.refresh_active(&touched_name).await?;
        }
        Ok(())
    }

    /// The version of `name` currently exposed in the active view, if any.
    #[must_use]
    pub fn active_version_of(&self, name: &str) -> Option<Version> {
        self.graph.versions_of(name).into_iter().max()
    }

    /// All installed versions of `name`, ascending.
    #[must_use]
    pub fn versions_of(&self, name: &str) -> Vec<Version> {
        let mut versions = self.graph.versions_of(name);
        versions.sort();
        versions
    }

    /// The exact version `plugin_name@plugin_version` was linked to for
    /// `dep_name`, if the link has been recorded.
    #[must_use]
    pub fn resolve_for(
        &self,
        plugin_name: &str,
        plugin_version: &Version,
        dep_name: &str,
    ) -> Option<Version> {
        self.graph.resolved_version_of(plugin_name, plugin_version, dep_name)
    }

    /// The canonical on-disk directory for `name@version`.
    #[must_use]
    pub fn versioned_dir(&self, name: &str, version: &Version) -> PathBuf {
        self.store.versioned_dir(name, &version.to_string())
    }

    /// The active-view directory for `name`.
    #[must_use]
    pub fn active_dir(&self, name: &str) -> PathBuf {
        self.store.active_dir(name)
    }

    /// Republishes the active view for `name` so it matches the highest
    /// version still present in the graph, or removes it if none remain.
    /// Exposed `pub(crate)` so the acquisition pipeline can republish after
    /// linking a dependency, not just after a top-level mark.
    pub(crate) async fn refresh_active(&self, name: &str) -> PluginResult<()> {
        match self.active_version_of(name) {
            Some(version) => {
                self.store.activate(name, &version.to_string()).await?;
            }
            None => {
                self.store.deactivate(name).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    async fn write_fixture(path: &std::path::Path, name: &str, version: &str) {
        tokio::fs::create_dir_all(path).await.unwrap();
        tokio::fs::write(
            path.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .await
        .unwrap();
        tokio::fs::write(path.join("index.js"), b"module.exports = {};").await.unwrap();
    }

    #[tokio::test]
    async fn mark_top_level_publishes_active_view() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionedStore::new(tmp.path().to_path_buf(), tmp.path().join(".versions"));
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "basic", "1.0.0").await;
        store.ingest("basic", "1.0.0", &fixture).await.unwrap();

        let mut vm = VersionManager::new(store);
        vm.mark_top_level("basic", &v("1.0.0")).await.unwrap();

        assert_eq!(vm.active_version_of("basic"), Some(v("1.0.0")));
        assert!(vm.active_dir("basic").join("package.json").is_file());
    }

    #[tokio::test]
    async fn uninstall_preserves_version_still_linked_by_another_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionedStore::new(tmp.path().to_path_buf(), tmp.path().join(".versions"));
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "dep", "1.0.0").await;
        store.ingest("dep", "1.0.0", &fixture).await.unwrap();

        let mut vm = VersionManager::new(store);
        vm.mark_top_level("dep", &v("1.0.0")).await.unwrap();
        vm.link("consumer", &v("1.0.0"), "dep", &v("1.0.0")).unwrap();

        vm.uninstall("dep").await.unwrap();

        // No longer top-level / not in the active view...
        assert_eq!(vm.active_version_of("dep"), None);
        assert!(!vm.active_dir("dep").join("package.json").is_file());
        // ...but the canonical copy survives for `consumer`'s bound require.
        assert!(vm.versioned_dir("dep", &v("1.0.0")).join("package.json").is_file());
        assert_eq!(vm.resolve_for("consumer", &v("1.0.0"), "dep"), Some(v("1.0.0")));
    }

    #[tokio::test]
    async fn active_version_tracks_the_highest_installed_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionedStore::new(tmp.path().to_path_buf(), tmp.path().join(".versions"));
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "pkg", "1.0.0").await;
        store.ingest("pkg", "1.0.0", &fixture).await.unwrap();
        store.ingest("pkg", "2.0.0", &fixture).await.unwrap();

        let mut vm = VersionManager::new(store);
        vm.mark_top_level("pkg", &v("1.0.0")).await.unwrap();
        vm.mark_top_level("pkg", &v("2.0.0")).await.unwrap();

        assert_eq!(vm.active_version_of("pkg"), Some(v("2.0.0")));
    }
}

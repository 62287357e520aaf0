//! Two-region on-disk layout: `.versions/` (canonical) and the active view.

use std::path::{Path, PathBuf};

use semver::Version;
use walkdir::WalkDir;

use crate::error::{PluginError, PluginResult};
use crate::name::split_scope;

/// Owns the physical directory layout under `plugins_path`.
///
/// ```text
/// <plugins_path>/
///   <name>/                     active view
///   @<scope>/<name>/            scoped active view
///   .versions/
///     <name>@<version>/         canonical copy
///     @<scope>/<name>@<version>/
/// ```
#[derive(Debug, Clone)]
pub struct VersionedStore {
    plugins_path: PathBuf,
    versions_path: PathBuf,
}

impl VersionedStore {
    /// Creates a store rooted at `plugins_path`, with canonical copies under
    /// `versions_path` (by default `<plugins_path>/.versions`).
    #[must_use]
    pub fn new(plugins_path: PathBuf, versions_path: PathBuf) -> Self {
        Self { plugins_path, versions_path }
    }

    /// The plugin directory root.
    #[must_use]
    pub fn plugins_path(&self) -> &Path {
        &self.plugins_path
    }

    /// The `.versions/` root.
    #[must_use]
    pub fn versions_path(&self) -> &Path {
        &self.versions_path
    }

    /// The canonical directory for `(name, version)`, whether or not it has
    /// been materialised yet.
    #[must_use]
    pub fn versioned_dir(&self, name: &str, version: &str) -> PathBuf {
        match split_scope(name) {
            (Some(scope), rest) => self.versions_path.join(format!("@{scope}")).join(format!("{rest}@{version}")),
            (None, rest) => self.versions_path.join(format!("{rest}@{version}")),
        }
    }

    /// The active-view directory for `name`, whether or not it is currently
    /// populated.
    #[must_use]
    pub fn active_dir(&self, name: &str) -> PathBuf {
        match split_scope(name) {
            (Some(scope), rest) => self.plugins_path.join(format!("@{scope}")).join(rest),
            (None, rest) => self.plugins_path.join(rest),
        }
    }

    /// True if `(name, version)` already has a canonical copy on disk.
    #[must_use]
    pub fn has_version(&self, name: &str, version: &str) -> bool {
        self.versioned_dir(name, version).join("package.json").is_file()
    }

    /// Every installed version of `name`, parsed and sorted ascending. Entries
    /// whose directory name fails to parse as `name@version` or whose version
    /// fails semver parsing are skipped.
    pub fn versions_of(&self, name: &str) -> PluginResult<Vec<Version>> {
        let (scope, rest) = split_scope(name);
        let scan_dir = match scope {
            Some(scope) => self.versions_path.join(format!("@{scope}")),
            None => self.versions_path.clone(),
        };

        let mut versions = Vec::new();
        if scan_dir.is_dir() {
            for entry in std::fs::read_dir(&scan_dir)?.flatten() {
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else { continue };
                let Some(version_str) = file_name.strip_prefix(&format!("{rest}@")) else { continue };
                if let Ok(v) = Version::parse(version_str) {
                    versions.push(v);
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Copies `source_dir` into the canonical `.versions/<name>@<version>`
    /// location, replacing anything already there.
    pub async fn ingest(&self, name: &str, version: &str, source_dir: &Path) -> PluginResult<PathBuf> {
        let dest = self.versioned_dir(name, version);
        if dest.exists() {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        copy_dir_recursive(source_dir, &dest).await?;
        Ok(dest)
    }

    /// Publishes `(name, version)`'s canonical copy as the active view for
    /// `name`, replacing whatever was previously active.
    pub async fn activate(&self, name: &str, version: &str) -> PluginResult<PathBuf> {
        let source = self.versioned_dir(name, version);
        let dest = self.active_dir(name);
        if dest.exists() {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        copy_dir_recursive(&source, &dest).await?;
        Ok(dest)
    }

    /// Removes `name`'s active view entirely (no installed version remains).
    pub async fn deactivate(&self, name: &str) -> PluginResult<()> {
        let dir = self.active_dir(name);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Deletes the canonical copy of `(name, version)` from `.versions/`.
    pub async fn remove_version(&self, name: &str, version: &str) -> PluginResult<()> {
        let dir = self.versioned_dir(name, version);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

async fn copy_dir_recursive(source: &Path, dest: &Path) -> PluginResult<()> {
    tokio::fs::create_dir_all(dest).await?;
    for entry in WalkDir::new(source).into_iter().filter_map(Result::ok) {
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| PluginError::operation("copy_dir_recursive", format!("{} is not under {}: {e}", entry.path().display(), source.display())))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &target).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> VersionedStore {
        VersionedStore::new(dir.to_path_buf(), dir.join(".versions"))
    }

    async fn write_fixture(path: &Path, name: &str, version: &str) {
        tokio::fs::create_dir_all(path).await.unwrap();
        tokio::fs::write(
            path.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .await
        .unwrap();
        tokio::fs::write(path.join("index.js"), b"module.exports = { ok: true };").await.unwrap();
    }

    #[tokio::test]
    async fn ingest_and_activate_round_trip_for_unscoped_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "basic", "1.0.0").await;

        store.ingest("basic", "1.0.0", &fixture).await.unwrap();
        assert!(store.has_version("basic", "1.0.0"));

        store.activate("basic", "1.0.0").await.unwrap();
        assert!(store.active_dir("basic").join("package.json").is_file());
    }

    #[tokio::test]
    async fn versioned_dir_nests_scoped_names_under_scope_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let dir = store.versioned_dir("@myorg/pkg", "1.0.0");
        assert_eq!(dir, tmp.path().join(".versions").join("@myorg").join("pkg@1.0.0"));
    }

    #[tokio::test]
    async fn versions_of_lists_and_sorts_installed_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "pkg", "1.0.0").await;

        store.ingest("pkg", "2.0.0", &fixture).await.unwrap();
        store.ingest("pkg", "1.0.0", &fixture).await.unwrap();

        let versions = store.versions_of("pkg").unwrap();
        assert_eq!(versions, vec![Version::parse("1.0.0").unwrap(), Version::parse("2.0.0").unwrap()]);
    }

    #[tokio::test]
    async fn remove_version_deletes_canonical_copy_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let fixture = tmp.path().join("fixture");
        write_fixture(&fixture, "pkg", "1.0.0").await;
        store.ingest("pkg", "1.0.0", &fixture).await.unwrap();
        store.activate("pkg", "1.0.0").await.unwrap();

        store.remove_version("pkg", "1.0.0").await.unwrap();
        assert!(!store.has_version("pkg", "1.0.0"));
        assert!(store.active_dir("pkg").join("package.json").is_file());
    }
}

//! Installs a package directly from a filesystem path, used by
//! `install_from_path`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{PluginError, PluginResult};
use crate::fetch::Fetcher;
use crate::manifest::PackageManifest;

/// Fetches from an absolute local directory. `selector` is the source path
/// itself.
#[derive(Debug, Default)]
pub struct LocalFetcher;

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn resolve(&self, _name: &str, selector: &str) -> PluginResult<PackageManifest> {
        PackageManifest::read_from_dir(Path::new(selector)).await
    }

    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()> {
        // `manifest` alone doesn't carry the source path; the pipeline calls
        // `copy_from` directly instead of going through the trait object for
        // local installs, since there's nothing to fetch over the network.
        let _ = (manifest, destination_dir);
        Ok(())
    }
}

impl LocalFetcher {
    /// Copies `source_dir`'s contents into `destination_dir`.
    pub async fn copy_from(source_dir: &Path, destination_dir: &Path) -> PluginResult<()> {
        tokio::fs::create_dir_all(destination_dir).await?;
        for entry in WalkDir::new(source_dir).into_iter().filter_map(Result::ok) {
            let rel = entry.path().strip_prefix(source_dir).map_err(|e| {
                PluginError::operation("copy_from", format!("{} is not under {}: {e}", entry.path().display(), source_dir.display()))
            })?;
            let target: PathBuf = destination_dir.join(rel);
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_reads_manifest_from_selector_path() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(tmp.path().join("package.json"), r#"{"name":"local-pkg","version":"1.0.0"}"#)
            .await
            .unwrap();

        let fetcher = LocalFetcher;
        let manifest = fetcher.resolve("local-pkg", tmp.path().to_str().unwrap()).await.unwrap();
        assert_eq!(manifest.name, "local-pkg");
    }

    #[tokio::test]
    async fn copy_from_mirrors_directory_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("index.js"), b"module.exports = {};").await.unwrap();

        let dest = tmp.path().join("dest");
        LocalFetcher::copy_from(&source, &dest).await.unwrap();
        assert!(dest.join("index.js").is_file());
    }
}

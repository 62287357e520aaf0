//! Fabricates a package from a caller-supplied source string, used by
//! `install_from_code`.

use std::path::Path;

use async_trait::async_trait;

use crate::error::PluginResult;
use crate::fetch::Fetcher;
use crate::manifest::PackageManifest;

/// Wraps inline source code as if it had been fetched.
pub struct InlineFetcher {
    source: String,
}

impl InlineFetcher {
    /// `source` becomes the installed package's `index.js` verbatim.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

#[async_trait]
impl Fetcher for InlineFetcher {
    /// `selector` is treated as a caller-supplied version; `None`/empty
    /// defaults to `"0.0.0"`, per the inline-install contract.
    async fn resolve(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let version = if selector.is_empty() { None } else { Some(selector) };
        Ok(PackageManifest::inline(name, version))
    }

    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()> {
        tokio::fs::create_dir_all(destination_dir).await?;
        tokio::fs::write(
            destination_dir.join("package.json"),
            serde_json::to_vec_pretty(&serde_json::json!({
                "name": manifest.name,
                "version": manifest.version,
                "main": manifest.main,
            }))?,
        )
        .await?;
        tokio::fs::write(destination_dir.join(&manifest.main), &self.source).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_defaults_version_when_selector_is_empty() {
        let fetcher = InlineFetcher::new("module.exports = 1;");
        let manifest = fetcher.resolve("scratch", "").await.unwrap();
        assert_eq!(manifest.version, "0.0.0");
    }

    #[tokio::test]
    async fn download_writes_manifest_and_source_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = InlineFetcher::new("module.exports = { ok: true };");
        let manifest = fetcher.resolve("scratch", "").await.unwrap();
        fetcher.download(&manifest, tmp.path()).await.unwrap();

        assert!(tmp.path().join("package.json").is_file());
        let source = tokio::fs::read_to_string(tmp.path().join("index.js")).await.unwrap();
        assert!(source.contains("ok: true"));
    }
}

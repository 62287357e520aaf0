//! npm-registry-style fetcher: resolves against a registry's version listing
//! and downloads gzipped tarballs through a `GzDecoder` -> `tar::Archive`
//! pipeline.

use std::path::Path;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use semver::{Version, VersionReq};
use serde_json::Value;
use tar::Archive;

use crate::error::{PluginError, PluginResult};
use crate::fetch::Fetcher;
use crate::manifest::PackageManifest;
use crate::store::VersionedStore;

/// Whether [`RegistryFetcher::resolve`] may satisfy a selector from an
/// already-installed version without hitting the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Prefer an installed version that already satisfies the selector.
    UseCache,
    /// Always resolve against the registry.
    NoCache,
}

/// Fetches packages from an npm-compatible registry.
pub struct RegistryFetcher {
    client: reqwest::Client,
    base_url: String,
    store: VersionedStore,
    mode: InstallMode,
}

impl RegistryFetcher {
    /// Builds a fetcher against `base_url` (no trailing slash expected),
    /// consulting `store` when `mode` is [`InstallMode::UseCache`].
    #[must_use]
    pub fn new(base_url: impl Into<String>, store: VersionedStore, mode: InstallMode) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), store, mode }
    }

    fn encoded_name(name: &str) -> String {
        if name.starts_with('@') {
            name.replace('@', "%40").replace('/', "%2F")
        } else {
            name.to_string()
        }
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, Self::encoded_name(name))
    }

    /// `@scope/name` -> `{base}/@scope/name/-/name-version.tgz`; `name` ->
    /// `{base}/name/-/name-version.tgz`.
    fn download_url(&self, name: &str, version: &str) -> String {
        let tarball_name = name.rsplit('/').next().unwrap_or(name);
        format!("{}/{}/-/{}-{}.tgz", self.base_url, name, tarball_name, version)
    }

    async fn cached_match(&self, name: &str, selector: &str) -> PluginResult<Option<PackageManifest>> {
        let installed = self.store.versions_of(name)?;
        let Some(version) = best_match(&installed, selector) else { return Ok(None) };
        let manifest = PackageManifest::read_from_dir(&self.store.versioned_dir(name, &version.to_string())).await?;
        Ok(Some(manifest))
    }
}

fn best_match(installed: &[Version], selector: &str) -> Option<Version> {
    if selector == "latest" || selector == "*" {
        return installed.iter().max().cloned();
    }
    let req = VersionReq::parse(selector).ok()?;
    installed.iter().filter(|v| req.matches(v)).max().cloned()
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn resolve(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        if self.mode == InstallMode::UseCache {
            if let Some(manifest) = self.cached_match(name, selector).await? {
                log::debug!("resolved '{name}@{selector}' from cache as {}", manifest.version);
                return Ok(manifest);
            }
        }

        let url = self.package_url(name);
        log::debug!("fetching registry metadata for '{name}' from {url}");
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PluginError::NotFound { name: name.to_string(), selector: selector.to_string() });
        }
        let body: Value = response.json().await?;

        let versions = body.get("versions").and_then(Value::as_object).ok_or_else(|| {
            PluginError::FetchFailed { name: name.to_string(), reason: "registry response had no 'versions' field".into() }
        })?;

        let resolved_version = if selector == "latest" {
            body.get("dist-tags")
                .and_then(|tags| tags.get("latest"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            let req = VersionReq::parse(selector).map_err(PluginError::from)?;
            versions
                .keys()
                .filter_map(|v| Version::parse(v).ok().filter(|parsed| req.matches(parsed)))
                .max()
                .map(|v| v.to_string())
        };

        let Some(resolved_version) = resolved_version else {
            return Err(PluginError::NotFound { name: name.to_string(), selector: selector.to_string() });
        };

        let version_entry = versions.get(&resolved_version).ok_or_else(|| PluginError::NotFound {
            name: name.to_string(),
            selector: selector.to_string(),
        })?;

        serde_json::from_value(version_entry.clone()).map_err(PluginError::from)
    }

    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()> {
        tokio::fs::create_dir_all(destination_dir).await?;

        let url = self.download_url(&manifest.name, &manifest.version);
        log::debug!("downloading '{}' tarball from {url}", manifest.name);
        let bytes = self.client.get(&url).send().await?.bytes().await?;

        let dest = destination_dir.to_path_buf();
        let name = manifest.name.clone();
        let version = manifest.version.clone();
        tokio::task::spawn_blocking(move || extract_tarball(&bytes, &dest))
            .await
            .map_err(|e| PluginError::FetchFailed { name: name.clone(), reason: e.to_string() })?
            .map_err(|e: std::io::Error| PluginError::FetchFailed {
                name,
                reason: format!("extracting {version}: {e}"),
            })?;

        Ok(())
    }
}

/// npm tarballs nest everything under a `package/` directory; strip it so
/// `destination/package.json` lands at the root the loader expects.
fn extract_tarball(bytes: &[u8], destination: &Path) -> std::io::Result<()> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let stripped = path.strip_prefix("package").unwrap_or(&path).to_path_buf();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(&stripped);
        entry.unpack(&target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_handles_scoped_and_unscoped_names() {
        let store = VersionedStore::new("/tmp/plugins".into(), "/tmp/plugins/.versions".into());
        let fetcher = RegistryFetcher::new("https://registry.npmjs.org", store, InstallMode::UseCache);
        assert_eq!(
            fetcher.download_url("debug", "4.3.4"),
            "https://registry.npmjs.org/debug/-/debug-4.3.4.tgz"
        );
        assert_eq!(
            fetcher.download_url("@myorg/pkg", "1.0.0"),
            "https://registry.npmjs.org/@myorg/pkg/-/pkg-1.0.0.tgz"
        );
    }

    #[test]
    fn best_match_prefers_highest_satisfying_version() {
        let installed = vec![Version::parse("1.0.0").unwrap(), Version::parse("1.5.0").unwrap(), Version::parse("2.0.0").unwrap()];
        assert_eq!(best_match(&installed, "^1.0.0"), Some(Version::parse("1.5.0").unwrap()));
        assert_eq!(best_match(&installed, "latest"), Some(Version::parse("2.0.0").unwrap()));
        assert_eq!(best_match(&installed, "^9.0.0"), None);
    }

    #[tokio::test]
    async fn resolve_picks_highest_version_satisfying_selector_from_registry_response() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "versions": {
                "1.0.0": {"name": "widget", "version": "1.0.0"},
                "1.2.0": {"name": "widget", "version": "1.2.0"},
                "2.0.0": {"name": "widget", "version": "2.0.0"},
            }
        });
        let _mock = server
            .mock("GET", "/widget")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let store = VersionedStore::new("/tmp/plugins".into(), "/tmp/plugins/.versions".into());
        let fetcher = RegistryFetcher::new(server.url(), store, InstallMode::NoCache);

        let manifest = fetcher.resolve("widget", "^1.0.0").await.unwrap();
        assert_eq!(manifest.version, "1.2.0");
    }

    #[tokio::test]
    async fn resolve_maps_a_404_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/widget").with_status(404).create_async().await;

        let store = VersionedStore::new("/tmp/plugins".into(), "/tmp/plugins/.versions".into());
        let fetcher = RegistryFetcher::new(server.url(), store, InstallMode::NoCache);

        let err = fetcher.resolve("widget", "^1.0.0").await.unwrap_err();
        assert!(err.is_not_found());
    }
}

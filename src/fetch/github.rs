//! Fetches packages from a GitHub repository selected by `owner/repo[#ref]`.
//!
//! Resolution reads `package.json` straight out of the repository via the
//! contents API; download pulls the same ref's tarball. Both reuse the
//! auth-header construction pattern from the registry client.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{PluginError, PluginResult};
use crate::fetch::{parse_git_selector, Fetcher, GitHostAuthentication};
use crate::manifest::PackageManifest;

/// Fetches from `github.com` repositories.
pub struct GithubFetcher {
    client: reqwest::Client,
    auth: Option<GitHostAuthentication>,
    /// `(name, version)` -> `(owner, repo, ref)`, populated by `resolve` so
    /// `download` (which only receives the manifest) can recover the
    /// selector it was resolved from.
    resolved_selectors: Mutex<HashMap<(String, String), (String, String, String)>>,
}

impl GithubFetcher {
    /// Builds a fetcher, optionally authenticated for private repositories.
    #[must_use]
    pub fn new(auth: Option<GitHostAuthentication>) -> Self {
        Self { client: reqwest::Client::new(), auth, resolved_selectors: Mutex::new(HashMap::new()) }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(GitHostAuthentication::Basic { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
                builder.header("Authorization", format!("Basic {encoded}"))
            }
            Some(GitHostAuthentication::Token { token }) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn resolve(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let (owner, repo, reference) = parse_git_selector(selector);
        let url = format!("https://api.github.com/repos/{owner}/{repo}/contents/package.json?ref={reference}");
        log::debug!("resolving '{name}' via GitHub contents API at {url}");

        let request = self
            .authorize(self.client.get(&url))
            .header("Accept", "application/vnd.github.raw")
            .header("User-Agent", "pluginvault");
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PluginError::NotFound { name: name.to_string(), selector: selector.to_string() });
        }
        let contents = response.text().await?;
        let manifest = PackageManifest::from_json(&contents)?;

        self.resolved_selectors
            .lock()
            .map_err(|_| PluginError::operation("github_resolve", "resolved-selector cache lock poisoned"))?
            .insert((manifest.name.clone(), manifest.version.clone()), (owner, repo, reference));
        Ok(manifest)
    }

    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()> {
        tokio::fs::create_dir_all(destination_dir).await?;

        let (owner, repo, reference) = self
            .resolved_selectors
            .lock()
            .map_err(|_| PluginError::operation("github_download", "resolved-selector cache lock poisoned"))?
            .get(&(manifest.name.clone(), manifest.version.clone()))
            .cloned()
            .ok_or_else(|| PluginError::operation("github_download", "download called before a matching resolve"))?;

        let url = format!("https://api.github.com/repos/{owner}/{repo}/tarball/{reference}");
        log::debug!("downloading GitHub tarball from {url}");
        let request = self.authorize(self.client.get(&url)).header("User-Agent", "pluginvault");
        let bytes = request.send().await?.bytes().await?;

        let dest = destination_dir.to_path_buf();
        let name = manifest.name.clone();
        tokio::task::spawn_blocking(move || extract_stripping_top_level(&bytes, &dest))
            .await
            .map_err(|e| PluginError::FetchFailed { name: name.clone(), reason: e.to_string() })?
            .map_err(|e: std::io::Error| PluginError::FetchFailed { name, reason: e.to_string() })
    }
}

/// GitHub (and Bitbucket) archives nest all files under a single generated
/// top-level directory; strip it so `package.json` lands at the root.
pub(crate) fn extract_stripping_top_level(bytes: &[u8], destination: &Path) -> std::io::Result<()> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut components = path.components();
        components.next();
        let stripped: std::path::PathBuf = components.collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(&stripped);
        entry.unpack(&target)?;
    }
    Ok(())
}

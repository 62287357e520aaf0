//! Fetches packages from a Bitbucket repository selected by `owner/repo[#ref]`.
//!
//! Mirrors [`crate::fetch::GithubFetcher`]'s shape against Bitbucket's
//! source-browsing and archive endpoints.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;

use crate::error::{PluginError, PluginResult};
use crate::fetch::github::extract_stripping_top_level;
use crate::fetch::{parse_git_selector, Fetcher, GitHostAuthentication};
use crate::manifest::PackageManifest;

/// Fetches from `bitbucket.org` repositories.
pub struct BitbucketFetcher {
    client: reqwest::Client,
    auth: Option<GitHostAuthentication>,
    resolved_selectors: Mutex<HashMap<(String, String), (String, String, String)>>,
}

impl BitbucketFetcher {
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
impl Fetcher for BitbucketFetcher {
    async fn resolve(&self, name: &str, selector: &str) -> PluginResult<PackageManifest> {
        let (owner, repo, reference) = parse_git_selector(selector);
        let url = format!("https://api.bitbucket.org/2.0/repositories/{owner}/{repo}/src/{reference}/package.json");
        log::debug!("resolving '{name}' via Bitbucket src API at {url}");

        let response = self.authorize(self.client.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PluginError::NotFound { name: name.to_string(), selector: selector.to_string() });
        }
        let contents = response.text().await?;
        let manifest = PackageManifest::from_json(&contents)?;

        self.resolved_selectors
            .lock()
            .map_err(|_| PluginError::operation("bitbucket_resolve", "resolved-selector cache lock poisoned"))?
            .insert((manifest.name.clone(), manifest.version.clone()), (owner, repo, reference));
        Ok(manifest)
    }

    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()> {
        tokio::fs::create_dir_all(destination_dir).await?;

        let (owner, repo, reference) = self
            .resolved_selectors
            .lock()
            .map_err(|_| PluginError::operation("bitbucket_download", "resolved-selector cache lock poisoned"))?
            .get(&(manifest.name.clone(), manifest.version.clone()))
            .cloned()
            .ok_or_else(|| PluginError::operation("bitbucket_download", "download called before a matching resolve"))?;

        let url = format!("https://bitbucket.org/{owner}/{repo}/get/{reference}.tar.gz");
        log::debug!("downloading Bitbucket tarball from {url}");
        let bytes = self.authorize(self.client.get(&url)).send().await?.bytes().await?;

        let dest = destination_dir.to_path_buf();
        let name = manifest.name.clone();
        tokio::task::spawn_blocking(move || extract_stripping_top_level(&bytes, &dest))
            .await
            .map_err(|e| PluginError::FetchFailed { name: name.clone(), reason: e.to_string() })?
            .map_err(|e: std::io::Error| PluginError::FetchFailed { name, reason: e.to_string() })
    }
}

//! Fetchers: one per package source, uniform behind [`Fetcher`].

mod bitbucket;
mod github;
mod inline;
mod local;
mod registry;

pub use bitbucket::BitbucketFetcher;
pub use github::GithubFetcher;
pub use inline::InlineFetcher;
pub use local::LocalFetcher;
pub use registry::{InstallMode, RegistryFetcher};

use std::path::Path;

use async_trait::async_trait;

use crate::error::PluginResult;
use crate::manifest::PackageManifest;

/// A source capable of resolving a name+selector to a manifest and
/// materialising its files on disk.
///
/// `selector` is source-specific: a semver range for the registry, an
/// `owner/repo[#ref]` string for git hosts, a filesystem path for
/// [`LocalFetcher`], or ignored entirely by [`InlineFetcher`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolves `name` + `selector` to a concrete manifest, without writing
    /// any files.
    async fn resolve(&self, name: &str, selector: &str) -> PluginResult<PackageManifest>;

    /// Materialises `manifest`'s files under `destination_dir`, such that
    /// `destination_dir/package.json` and `destination_dir/<manifest.main>`
    /// exist afterward.
    async fn download(&self, manifest: &PackageManifest, destination_dir: &Path) -> PluginResult<()>;
}

/// Basic-auth or bearer-token credentials for a git-host fetcher.
#[derive(Debug, Clone)]
pub enum GitHostAuthentication {
    /// `Authorization: Basic base64(username:password)`.
    Basic {
        /// Account username.
        username: String,
        /// Account password or app token used as a password.
        password: String,
    },
    /// `Authorization: Bearer token` (or the host's token scheme).
    Token {
        /// The bearer token.
        token: String,
    },
}

/// Splits a `"owner/repo[#ref]"` selector into its parts. `ref` defaults to
/// `"HEAD"` when omitted.
#[must_use]
pub fn parse_git_selector(selector: &str) -> (String, String, String) {
    let (path, ref_part) = match selector.split_once('#') {
        Some((path, r)) => (path, r),
        None => (selector, "HEAD"),
    };
    let mut parts = path.splitn(2, '/');
    let owner = parts.next().unwrap_or_default().to_string();
    let repo = parts.next().unwrap_or_default().to_string();
    (owner, repo, ref_part.to_string())
}

//! Package Acquisition Pipeline: resolve -> download -> recurse into
//! dependencies -> link into the [`VersionManager`]'s graph.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use semver::{Version, VersionReq};

use crate::config::{HostRequire, PluginManagerOptions};
use crate::error::PluginResult;
use crate::fetch::{BitbucketFetcher, Fetcher, GithubFetcher, InlineFetcher, LocalFetcher, RegistryFetcher};
use crate::manifest::PackageManifest;
use crate::name::validate_plugin_name;
use crate::version_manager::VersionManager;

/// Where to acquire a package from for a single `install` call.
#[derive(Debug, Clone)]
pub enum InstallSource {
    /// A semver range against the configured npm-compatible registry.
    Npm(String),
    /// A `"owner/repo[#ref]"` selector against GitHub.
    GitHub(String),
    /// A `"owner/repo[#ref]"` selector against Bitbucket.
    Bitbucket(String),
    /// An absolute filesystem path to an already-unpacked package.
    Path(String),
    /// Inline source code, with an optional caller-supplied version.
    Code { source: String, version: Option<String> },
}

impl InstallSource {
    fn selector(&self) -> &str {
        match self {
            Self::Npm(s) | Self::GitHub(s) | Self::Bitbucket(s) | Self::Path(s) => s,
            Self::Code { version, .. } => version.as_deref().unwrap_or(""),
        }
    }

    fn build_fetcher(&self, options: &PluginManagerOptions, store: crate::store::VersionedStore) -> Box<dyn Fetcher> {
        match self {
            Self::Npm(_) => Box::new(RegistryFetcher::new(options.npm_registry_url.clone(), store, options.npm_install_mode)),
            Self::GitHub(_) => Box::new(GithubFetcher::new(options.github_authentication.clone())),
            Self::Bitbucket(_) => Box::new(BitbucketFetcher::new(options.bitbucket_authentication.clone())),
            Self::Path(_) => Box::new(LocalFetcher),
            Self::Code { source, .. } => Box::new(InlineFetcher::new(source.clone())),
        }
    }
}

/// The outcome of installing (or reusing) a single `(name, version)` node:
/// its manifest and the resolved versions of its entire dependency subtree.
pub struct InstalledNode {
    /// Resolved version.
    pub version: Version,
    /// Parsed manifest.
    pub manifest: PackageManifest,
    /// Absolute directory the package's files live in.
    pub location: PathBuf,
    /// `name -> version` for every dependency in this node's subtree,
    /// transitively.
    pub dependency_details: BTreeMap<String, String>,
}

/// Installs `name` from `source` into `version_manager`, recursing into its
/// declared dependencies. `top_level` marks the resulting version as a
/// direct, user-requested install rather than a transitive dependency.
pub async fn install(
    version_manager: &mut VersionManager,
    options: &PluginManagerOptions,
    host_require: Option<&dyn HostRequire>,
    name: &str,
    source: InstallSource,
    force: bool,
    top_level: bool,
) -> PluginResult<InstalledNode> {
    install_node(version_manager, options, host_require, name.to_string(), source, force, top_level).await
}

/// `name` is owned rather than borrowed: dependency names come from a
/// manifest that lives only for the duration of a single recursion frame,
/// so they can't carry the long `'a` tied to `version_manager`/`options`.
fn install_node<'a>(
    version_manager: &'a mut VersionManager,
    options: &'a PluginManagerOptions,
    host_require: Option<&'a dyn HostRequire>,
    name: String,
    source: InstallSource,
    force: bool,
    top_level: bool,
) -> Pin<Box<dyn Future<Output = PluginResult<InstalledNode>> + Send + 'a>> {
    Box::pin(async move {
        validate_plugin_name(&name)?;

        let (version, manifest) = resolve_and_materialize(version_manager, options, &name, &source, force).await?;
        let location = version_manager.versioned_dir(&name, &version);

        let dependencies: Vec<(String, String, bool)> = manifest
            .all_dependencies()
            .map(|(n, s, optional)| (n.to_string(), s.to_string(), optional))
            .collect();

        let mut dependency_details = BTreeMap::new();
        for (dep_name, dep_selector, is_optional) in dependencies {
            if options.is_ignored(&dep_name) {
                log::debug!("skipping ignored dependency '{dep_name}' of '{name}'");
                continue;
            }
            if options.static_dependencies.contains_key(&dep_name) {
                log::debug!("skipping statically-satisfied dependency '{dep_name}' of '{name}'");
                continue;
            }
            if host_require.is_some_and(|h| h.is_available(&dep_name)) {
                log::debug!("skipping host-resolvable dependency '{dep_name}' of '{name}'");
                continue;
            }

            let dep_source = InstallSource::Npm(dep_selector);
            let outcome =
                install_node(version_manager, options, host_require, dep_name.clone(), dep_source, false, false).await;

            match outcome {
                Ok(node) => {
                    version_manager.link(&name, &version, &dep_name, &node.version)?;
                    version_manager.refresh_active(&dep_name).await?;
                    dependency_details.insert(dep_name, node.version.to_string());
                    dependency_details.extend(node.dependency_details);
                }
                Err(e) if is_optional && e.is_swallowable_for_optional() => {
                    log::warn!("optional dependency '{dep_name}' of '{name}' could not be installed: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        if top_level {
            version_manager.mark_top_level(&name, &version).await?;
            log::info!("installed '{name}@{version}' as a top-level plugin");
        }

        Ok(InstalledNode { version, manifest, location, dependency_details })
    })
}

/// Resolves `name`+`source` to a manifest, reusing an already-installed
/// version when `force` is false and one satisfies the selector, and
/// downloads it if no canonical copy exists yet.
async fn resolve_and_materialize(
    version_manager: &VersionManager,
    options: &PluginManagerOptions,
    name: &str,
    source: &InstallSource,
    force: bool,
) -> PluginResult<(Version, PackageManifest)> {
    if !force {
        if let Some(version) = satisfying_installed_version(version_manager, name, source) {
            let manifest = PackageManifest::read_from_dir(&version_manager.versioned_dir(name, &version)).await?;
            return Ok((version, manifest));
        }
    }

    let fetcher = source.build_fetcher(options, version_manager.store().clone());
    let manifest = fetcher.resolve(name, source.selector()).await?;
    let version = manifest.semver()?;
    let dest = version_manager.versioned_dir(name, &version);

    if !version_manager.store().has_version(name, &version.to_string()) {
        log::debug!("materializing '{name}@{version}' into {}", dest.display());
        match source {
            InstallSource::Path(path) => LocalFetcher::copy_from(Path::new(path), &dest).await?,
            _ => fetcher.download(&manifest, &dest).await?,
        }
    }

    Ok((version, manifest))
}

/// An already-installed version of `name` satisfying `source`'s selector,
/// if one exists. Non-registry sources can't be compared against a selector
/// meaningfully, so any installed version counts as satisfying them.
fn satisfying_installed_version(version_manager: &VersionManager, name: &str, source: &InstallSource) -> Option<Version> {
    let installed = version_manager.versions_of(name);
    if installed.is_empty() {
        return None;
    }
    match source {
        InstallSource::Npm(selector) => {
            if selector == "latest" || selector == "*" || selector.is_empty() {
                return installed.into_iter().max();
            }
            let req = VersionReq::parse(selector).ok()?;
            installed.into_iter().filter(|v| req.matches(v)).max()
        }
        InstallSource::GitHub(_) | InstallSource::Bitbucket(_) | InstallSource::Path(_) | InstallSource::Code { .. } => {
            installed.into_iter().max()
        }
    }
}

//! `package.json` manifest parsing.
//!
//! The manager reads just enough of `package.json` to drive acquisition and
//! loading: name, version, entry point, and the two dependency maps. Everything
//! else in the file is opaque to us and is dropped on parse.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PluginError, PluginResult};

fn default_main() -> String {
    "index.js".to_string()
}

/// The metadata read from a package's `package.json`. Immutable once parsed.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PackageManifest {
    /// Package name, possibly scoped (`@scope/name`).
    pub name: String,
    /// Semver version string as written in the manifest.
    pub version: String,
    /// Entry point file, relative to the package root. Defaults to `index.js`.
    #[serde(default = "default_main")]
    pub main: String,
    /// Declared runtime dependencies: name -> selector.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Declared optional dependencies: name -> selector. Failures installing
    /// these are swallowed by the acquisition pipeline.
    #[serde(default, rename = "optionalDependencies")]
    pub optional_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parses a manifest from the contents of a `package.json` file.
    pub fn from_json(contents: &str) -> PluginResult<Self> {
        let manifest: Self = serde_json::from_str(contents)?;
        Ok(manifest)
    }

    /// Reads and parses `<dir>/package.json`.
    pub async fn read_from_dir(dir: &Path) -> PluginResult<Self> {
        let path = dir.join("package.json");
        let contents = tokio::fs::read_to_string(&path).await?;
        Self::from_json(&contents)
    }

    /// Fabricates a manifest for inline (`installFromCode`) installs.
    ///
    /// A caller-supplied version defaults to `"0.0.0"`.
    #[must_use]
    pub fn inline(name: &str, version: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            version: version.unwrap_or("0.0.0").to_string(),
            main: default_main(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
        }
    }

    /// Parses [`Self::version`] as a [`semver::Version`].
    pub fn semver(&self) -> PluginResult<semver::Version> {
        semver::Version::parse(&self.version).map_err(PluginError::from)
    }

    /// Every declared dependency, runtime and optional, paired with whether it
    /// is optional.
    pub fn all_dependencies(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.dependencies
            .iter()
            .map(|(n, s)| (n.as_str(), s.as_str(), false))
            .chain(self.optional_dependencies.iter().map(|(n, s)| (n.as_str(), s.as_str(), true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let m = PackageManifest::from_json(r#"{"name":"basic","version":"1.0.0"}"#).unwrap();
        assert_eq!(m.name, "basic");
        assert_eq!(m.main, "index.js");
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn parses_dependencies_and_optional_dependencies() {
        let json = r#"{
            "name": "my-plugin-with-diff-dep",
            "version": "1.0.0",
            "main": "lib/main.js",
            "dependencies": {"debug": "^2.0.0"},
            "optionalDependencies": {"fsevents": "^2.0.0"}
        }"#;
        let m = PackageManifest::from_json(json).unwrap();
        assert_eq!(m.main, "lib/main.js");
        assert_eq!(m.dependencies.get("debug"), Some(&"^2.0.0".to_string()));
        assert_eq!(m.optional_dependencies.get("fsevents"), Some(&"^2.0.0".to_string()));

        let all: Vec<_> = m.all_dependencies().collect();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn inline_defaults_version_to_0_0_0() {
        let m = PackageManifest::inline("scratch", None);
        assert_eq!(m.version, "0.0.0");
    }

    #[test]
    fn rejects_manifest_without_name() {
        let result = PackageManifest::from_json(r#"{"version":"1.0.0"}"#);
        assert!(result.is_err());
    }
}

//! Pure CommonJS resolution: given a `require` specifier and the file it was
//! called from, decides what it means without touching a JS engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::HostRequire;
use crate::error::PluginError;
use crate::manifest::PackageManifest;
use crate::name::split_require_spec;

/// Node's built-in module names. `require_core_modules` gates whether these
/// resolve to the host's own implementation instead of `ModuleNotFound`.
const CORE_MODULES: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "net", "os",
    "path", "querystring", "stream", "url", "util", "zlib",
];

/// What a specifier resolved to.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A core module name the host is expected to provide.
    Core(String),
    /// A value from `static_dependencies`, returned verbatim as `exports`.
    Static(Value),
    /// A concrete file to compile and execute (or reuse from cache).
    File(PathBuf),
    /// A value supplied by the embedding host's own `require`.
    Host(Value),
}

/// Everything the resolver needs about the requesting plugin, independent of
/// any live [`crate::version_manager::VersionManager`]: the flattened
/// dependency-version map captured at install time already tells us exactly
/// which version of each dependency this plugin is bound to.
pub struct ResolutionContext<'a> {
    /// The plugin's own active-view directory (used to resolve its `main`
    /// when nothing else applies).
    pub plugin_location: PathBuf,
    /// `name -> resolved version` for every dependency in this plugin's
    /// subtree, direct and transitive.
    pub dependency_details: &'a BTreeMap<String, String>,
    /// Root of the canonical versioned store (`.versions/`).
    pub versions_path: PathBuf,
    /// Dependency names pre-satisfied with a fixed value.
    pub static_dependencies: &'a BTreeMap<String, Value>,
    /// Whether core module names resolve to the host.
    pub require_core_modules: bool,
    /// Last-resort resolution through the embedding host.
    pub host_require: Option<&'a dyn HostRequire>,
}

/// Resolves `spec` as required from `from_file` (a file inside the plugin
/// described by `ctx`).
pub fn resolve(spec: &str, from_file: &Path, ctx: &ResolutionContext<'_>) -> Result<Resolved, PluginError> {
    if ctx.require_core_modules && CORE_MODULES.contains(&spec) {
        return Ok(Resolved::Core(spec.to_string()));
    }

    if let Some(value) = ctx.static_dependencies.get(spec) {
        return Ok(Resolved::Static(value.clone()));
    }

    if spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/') {
        let base = if spec.starts_with('/') { PathBuf::new() } else { from_file.parent().unwrap_or(Path::new(".")).to_path_buf() };
        let candidate = base.join(spec);
        if let Some(file) = resolve_file_or_dir(&candidate) {
            return Ok(Resolved::File(file));
        }
    } else {
        let (head, rest) = split_require_spec(spec);
        if let Some(version) = ctx.dependency_details.get(&head) {
            let package_dir = versioned_dir(&ctx.versions_path, &head, version);
            let target = match &rest {
                Some(rest) => package_dir.join(rest),
                None => package_dir.clone(),
            };
            if let Some(file) = resolve_file_or_dir(&target) {
                return Ok(Resolved::File(file));
            }
        } else if head == manifest_name_of(&ctx.plugin_location).unwrap_or_default() {
            // A plugin requiring its own package name resolves against itself.
            let target = match &rest {
                Some(rest) => ctx.plugin_location.join(rest),
                None => ctx.plugin_location.clone(),
            };
            if let Some(file) = resolve_file_or_dir(&target) {
                return Ok(Resolved::File(file));
            }
        }
    }

    if let Some(host) = ctx.host_require {
        if host.is_available(spec) {
            if let Some(value) = host.require(spec) {
                return Ok(Resolved::Host(value));
            }
        }
    }

    Err(PluginError::ModuleNotFound { spec: spec.to_string(), from: from_file.to_path_buf() })
}

fn manifest_name_of(plugin_location: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(plugin_location.join("package.json")).ok()?;
    let manifest = PackageManifest::from_json(&contents).ok()?;
    Some(manifest.name)
}

fn versioned_dir(versions_path: &Path, name: &str, version: &str) -> PathBuf {
    match crate::name::split_scope(name) {
        (Some(scope), rest) => versions_path.join(format!("@{scope}")).join(format!("{rest}@{version}")),
        (None, rest) => versions_path.join(format!("{rest}@{version}")),
    }
}

/// File-extension then directory-main resolution, matching Node: an exact
/// file hit wins over a directory of the same name.
fn resolve_file_or_dir(candidate: &Path) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(clean(candidate));
    }
    for ext in [".js", ".json"] {
        let with_ext = append_ext(candidate, ext);
        if with_ext.is_file() {
            return Some(clean(&with_ext));
        }
    }
    if candidate.is_dir() {
        if let Ok(contents) = std::fs::read_to_string(candidate.join("package.json")) {
            if let Ok(manifest) = PackageManifest::from_json(&contents) {
                let main = candidate.join(&manifest.main);
                if main.is_file() {
                    return Some(clean(&main));
                }
            }
        }
        let index = candidate.join("index.js");
        if index.is_file() {
            return Some(clean(&index));
        }
    }
    None
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(ext);
    PathBuf::from(s)
}

fn clean(path: &Path) -> PathBuf {
    path_clean::clean(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        plugin_location: &Path,
        dependency_details: &'a BTreeMap<String, String>,
        versions_path: &Path,
        static_dependencies: &'a BTreeMap<String, Value>,
    ) -> ResolutionContext<'a> {
        ResolutionContext {
            plugin_location: plugin_location.to_path_buf(),
            dependency_details,
            versions_path: versions_path.to_path_buf(),
            static_dependencies,
            require_core_modules: true,
            host_require: None,
        }
    }

    #[test]
    fn resolves_core_module_by_name() {
        let deps = BTreeMap::new();
        let statics = BTreeMap::new();
        let c = ctx(Path::new("/plugins/a"), &deps, Path::new("/versions"), &statics);
        let resolved = resolve("fs", Path::new("/plugins/a/index.js"), &c).unwrap();
        assert!(matches!(resolved, Resolved::Core(name) if name == "fs"));
    }

    #[test]
    fn resolves_static_dependency_by_exact_name() {
        let deps = BTreeMap::new();
        let mut statics = BTreeMap::new();
        statics.insert("config".to_string(), serde_json::json!({"debug": true}));
        let c = ctx(Path::new("/plugins/a"), &deps, Path::new("/versions"), &statics);
        let resolved = resolve("config", Path::new("/plugins/a/index.js"), &c).unwrap();
        assert!(matches!(resolved, Resolved::Static(v) if v["debug"] == true));
    }

    #[test]
    fn resolves_relative_path_with_js_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("helper.js"), b"module.exports = {};").unwrap();
        std::fs::write(tmp.path().join("index.js"), b"module.exports = {};").unwrap();

        let deps = BTreeMap::new();
        let statics = BTreeMap::new();
        let c = ctx(tmp.path(), &deps, Path::new("/versions"), &statics);
        let resolved = resolve("./helper", &tmp.path().join("index.js"), &c).unwrap();
        match resolved {
            Resolved::File(path) => assert_eq!(path, tmp.path().join("helper.js")),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn resolves_dependency_head_against_its_bound_version() {
        let tmp = tempfile::tempdir().unwrap();
        let versions_path = tmp.path().join(".versions");
        let dep_dir = versions_path.join("debug@4.3.4");
        std::fs::create_dir_all(&dep_dir).unwrap();
        std::fs::write(dep_dir.join("package.json"), r#"{"name":"debug","version":"4.3.4"}"#).unwrap();
        std::fs::write(dep_dir.join("index.js"), b"module.exports = {};").unwrap();

        let mut deps = BTreeMap::new();
        deps.insert("debug".to_string(), "4.3.4".to_string());
        let statics = BTreeMap::new();
        let c = ctx(tmp.path(), &deps, &versions_path, &statics);
        let resolved = resolve("debug", &tmp.path().join("index.js"), &c).unwrap();
        match resolved {
            Resolved::File(path) => assert_eq!(path, dep_dir.join("index.js")),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_specifier_is_module_not_found() {
        let deps = BTreeMap::new();
        let statics = BTreeMap::new();
        let c = ctx(Path::new("/plugins/a"), &deps, Path::new("/versions"), &statics);
        let err = resolve("left-pad", Path::new("/plugins/a/index.js"), &c).unwrap_err();
        assert!(matches!(err, PluginError::ModuleNotFound { .. }));
    }
}

//! Ties [`resolver`] and [`sandbox::Sandbox`] together: compiles and
//! executes CommonJS modules, caching exports by canonical file path and
//! threading a per-module `require` closure through the engine.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsValue, NativeFunction, Source};
use serde_json::Value;

use crate::config::{HostRequire, SandboxTemplate};
use crate::error::{PluginError, PluginResult};
use crate::vm::resolver::{resolve, ResolutionContext, Resolved};
use crate::vm::sandbox::Sandbox;

/// Static data the resolver needs about the plugin this loader serves,
/// captured once at install/load time rather than kept live against a
/// [`crate::version_manager::VersionManager`] (the flattened dependency map
/// already tells us exactly which version each name is bound to).
struct LoaderData {
    plugin_location: PathBuf,
    dependency_details: BTreeMap<String, String>,
    versions_path: PathBuf,
    static_dependencies: BTreeMap<String, Value>,
    require_core_modules: bool,
    host_require: Option<Arc<dyn HostRequire>>,
}

/// `module.exports` cache plus in-flight modules (for circular requires),
/// both keyed by canonicalised absolute file path.
#[derive(Default)]
struct LoaderCache {
    exports: HashMap<PathBuf, JsValue>,
    in_progress: HashMap<PathBuf, JsValue>,
}

/// Loads and executes CommonJS modules for one plugin inside its own
/// isolated [`Sandbox`].
pub struct Loader {
    sandbox: Sandbox,
    cache: Rc<RefCell<LoaderCache>>,
    data: Rc<LoaderData>,
}

impl Loader {
    /// Builds a loader for a plugin installed at `plugin_location`, bound to
    /// `dependency_details` (`name -> version` for its whole dependency
    /// subtree).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plugin_location: PathBuf,
        dependency_details: BTreeMap<String, String>,
        versions_path: PathBuf,
        static_dependencies: BTreeMap<String, Value>,
        require_core_modules: bool,
        host_require: Option<Arc<dyn HostRequire>>,
        sandbox_template: &SandboxTemplate,
    ) -> PluginResult<Self> {
        Ok(Self {
            sandbox: Sandbox::new(sandbox_template)?,
            cache: Rc::new(RefCell::new(LoaderCache::default())),
            data: Rc::new(LoaderData {
                plugin_location,
                dependency_details,
                versions_path,
                static_dependencies,
                require_core_modules,
                host_require,
            }),
        })
    }

    /// Requires `spec` as if called from `from_file` (the plugin's own main
    /// file when entering fresh, a dependency's file for nested requires).
    pub fn require(&mut self, spec: &str, from_file: &Path) -> PluginResult<JsValue> {
        let context = self.sandbox.context_mut();
        resolve_and_load(context, &self.cache, &self.data, spec, from_file).map_err(to_plugin_error)
    }

    /// Drops every cached export whose resolved path sits inside `root`
    /// (a dependency's installation directory that was just rebound to a
    /// different version). The next `require` recompiles from scratch.
    pub fn invalidate_under(&mut self, root: &Path) {
        let mut cache = self.cache.borrow_mut();
        cache.exports.retain(|path, _| !path.starts_with(root));
        cache.in_progress.retain(|path, _| !path.starts_with(root));
    }

    /// Drops the entire export cache. Used as the conservative fallback when
    /// a mutation touches a dependency shared with plugins other than the
    /// one that triggered it, and pinpointing every affected root isn't
    /// worth the bookkeeping.
    pub fn invalidate_all(&mut self) {
        let mut cache = self.cache.borrow_mut();
        cache.exports.clear();
        cache.in_progress.clear();
    }

    /// Loads `path` directly as a module, bypassing specifier resolution.
    /// Used to enter a plugin's own `main` file.
    pub fn load_file(&mut self, path: &Path) -> PluginResult<JsValue> {
        let context = self.sandbox.context_mut();
        load_module(context, &self.cache, &self.data, path).map_err(to_plugin_error)
    }

    /// Converts a loaded `JsValue` to a JSON value at the host boundary, via
    /// `JSON.stringify`. Functions and other non-JSON values stringify to
    /// `undefined`/`null`, matching `JSON.stringify`'s own behaviour.
    pub fn to_json(&mut self, value: &JsValue) -> PluginResult<Value> {
        let context = self.sandbox.context_mut();
        js_to_json(value, context)
    }

    /// Evaluates `code` as a nameless module in this loader's sandbox, with
    /// a `require` that resolves against the plugin's own dependency
    /// bindings (used for `run_script`).
    pub fn run_script(&mut self, code: &str) -> PluginResult<JsValue> {
        let virtual_file = self.data.plugin_location.join("__run_script__.js");
        let context = self.sandbox.context_mut();
        execute_source(context, &self.cache, &self.data, code, &virtual_file).map_err(to_plugin_error)
    }
}

fn to_plugin_error(e: boa_engine::JsError) -> PluginError {
    PluginError::ExecutionError { file: PathBuf::new(), message: e.to_string() }
}

fn canonicalize(path: &Path) -> PathBuf {
    path_clean::clean(path)
}

fn resolve_and_load(
    context: &mut Context,
    cache: &Rc<RefCell<LoaderCache>>,
    data: &Rc<LoaderData>,
    spec: &str,
    from_file: &Path,
) -> JsResult<JsValue> {
    let ctx = ResolutionContext {
        plugin_location: data.plugin_location.clone(),
        dependency_details: &data.dependency_details,
        versions_path: data.versions_path.clone(),
        static_dependencies: &data.static_dependencies,
        require_core_modules: data.require_core_modules,
        host_require: data.host_require.as_deref(),
    };

    match resolve(spec, from_file, &ctx) {
        Ok(Resolved::File(path)) => load_module(context, cache, data, &path),
        Ok(Resolved::Static(value)) => super::sandbox::json_to_js(&value, context).map_err(js_error_to_native),
        Ok(Resolved::Host(value)) => super::sandbox::json_to_js(&value, context).map_err(js_error_to_native),
        Ok(Resolved::Core(name)) => Err(native_error(&format!("core module '{name}' has no host binding"))),
        Err(e) => Err(native_error(&e.to_string())),
    }
}

fn js_error_to_native(e: PluginError) -> boa_engine::JsError {
    native_error(&e.to_string())
}

fn native_error(message: &str) -> boa_engine::JsError {
    boa_engine::JsError::from_opaque(JsValue::from(message))
}

/// Loads `path`, reusing a cached export or an in-flight module object for
/// circular requires, executing fresh otherwise.
fn load_module(
    context: &mut Context,
    cache: &Rc<RefCell<LoaderCache>>,
    data: &Rc<LoaderData>,
    path: &Path,
) -> JsResult<JsValue> {
    let canonical = canonicalize(path);

    if let Some(exports) = cache.borrow().exports.get(&canonical).cloned() {
        return Ok(exports);
    }
    if let Some(module) = cache.borrow().in_progress.get(&canonical).cloned() {
        return module_exports(&module, context);
    }

    let source = std::fs::read_to_string(&canonical)
        .map_err(|e| native_error(&format!("reading '{}': {e}", canonical.display())))?;

    if canonical.extension().and_then(|e| e.to_str()) == Some("json") {
        let value: Value = serde_json::from_str(&source)
            .map_err(|e| native_error(&format!("parsing JSON module '{}': {e}", canonical.display())))?;
        let exports = super::sandbox::json_to_js(&value, context).map_err(js_error_to_native)?;
        cache.borrow_mut().exports.insert(canonical, exports.clone());
        return Ok(exports);
    }

    execute_source(context, cache, data, &source, &canonical)
}

/// Compiles `source` as a CommonJS module wrapper and executes it against a
/// fresh `module`/`exports` pair, caching the result under `canonical`
/// (the path of the file it came from, or a synthetic path for
/// `run_script`).
fn execute_source(
    context: &mut Context,
    cache: &Rc<RefCell<LoaderCache>>,
    data: &Rc<LoaderData>,
    source: &str,
    canonical: &Path,
) -> JsResult<JsValue> {
    let wrapper_src = format!(
        "(function(module, exports, require, __filename, __dirname, global, process, Buffer, \
         setTimeout, clearTimeout, setInterval, clearInterval, setImmediate, clearImmediate) {{\n{source}\n}})"
    );
    let wrapper = context.eval(Source::from_bytes(&wrapper_src))?;
    let wrapper_fn = wrapper.as_object().cloned().ok_or_else(|| native_error("module wrapper did not compile to a function"))?;

    let exports_obj = ObjectInitializer::new(context).build();
    let module_obj = ObjectInitializer::new(context).property("exports", exports_obj.clone(), Attribute::all()).build();

    cache.borrow_mut().in_progress.insert(canonical.to_path_buf(), module_obj.clone().into());

    let require_fn = make_require(context, cache, data, canonical.to_path_buf());
    let dirname = canonical.parent().unwrap_or(Path::new("/")).to_string_lossy().into_owned();
    let filename = canonical.to_string_lossy().into_owned();
    let global = context.global_object().clone();
    let process = global.get("process", context)?;
    let buffer = global.get("Buffer", context)?;
    let set_timeout = global.get("setTimeout", context)?;
    let clear_timeout = global.get("clearTimeout", context)?;
    let set_interval = global.get("setInterval", context)?;
    let clear_interval = global.get("clearInterval", context)?;
    let set_immediate = global.get("setImmediate", context)?;
    let clear_immediate = global.get("clearImmediate", context)?;

    let args = [
        JsValue::from(module_obj.clone()),
        exports_obj.clone().into(),
        require_fn,
        JsValue::from(filename),
        JsValue::from(dirname),
        JsValue::from(global),
        process,
        buffer,
        set_timeout,
        clear_timeout,
        set_interval,
        clear_interval,
        set_immediate,
        clear_immediate,
    ];

    let result = wrapper_fn.call(&JsValue::undefined(), &args, context);

    cache.borrow_mut().in_progress.remove(canonical);
    match result {
        Ok(_) => {
            let exports = module_obj.get("exports", context)?;
            cache.borrow_mut().exports.insert(canonical.to_path_buf(), exports.clone());
            Ok(exports)
        }
        Err(e) => Err(e),
    }
}

/// Round-trips a `JsValue` through `JSON.stringify`/`serde_json::from_str`
/// to cross the host boundary as plain data.
fn js_to_json(value: &JsValue, context: &mut Context) -> PluginResult<Value> {
    let global = context.global_object().clone();
    let json = global
        .get("JSON", context)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .ok_or_else(|| PluginError::ExecutionError { file: PathBuf::new(), message: "JSON global missing".into() })?;
    let stringify = json.get("stringify", context).map_err(to_plugin_error)?;
    let stringify_fn = stringify.as_object().ok_or_else(|| PluginError::ExecutionError {
        file: PathBuf::new(),
        message: "JSON.stringify is not callable".into(),
    })?;
    let result = stringify_fn.call(&JsValue::from(json.clone()), &[value.clone()], context).map_err(to_plugin_error)?;
    if result.is_undefined() {
        return Ok(Value::Null);
    }
    let text = result
        .as_string()
        .ok_or_else(|| PluginError::ExecutionError { file: PathBuf::new(), message: "JSON.stringify did not return a string".into() })?
        .to_std_string_escaped();
    serde_json::from_str(&text).map_err(PluginError::from)
}

fn module_exports(module: &JsValue, context: &mut Context) -> JsResult<JsValue> {
    match module.as_object() {
        Some(obj) => obj.get("exports", context),
        None => Ok(module.clone()),
    }
}

/// Builds a `require` function bound to `from_file`: each module gets its
/// own, matching Node's per-module `require`.
fn make_require(
    context: &mut Context,
    cache: &Rc<RefCell<LoaderCache>>,
    data: &Rc<LoaderData>,
    from_file: PathBuf,
) -> JsValue {
    let cache = cache.clone();
    let data = data.clone();
    let closure = move |_this: &JsValue, args: &[JsValue], context: &mut Context| -> JsResult<JsValue> {
        let spec = args.first().and_then(JsValue::as_string).map(|s| s.to_std_string_escaped()).unwrap_or_default();
        resolve_and_load(context, &cache, &data, &spec, &from_file)
    };
    boa_engine::object::FunctionObjectBuilder::new(context.realm(), NativeFunction::from_closure(closure))
        .name("require")
        .length(1)
        .build()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn loads_a_module_and_returns_its_exports() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("index.js"), "module.exports = { value: 41 + 1 };");

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            tmp.path().join(".versions"),
            BTreeMap::new(),
            true,
            None,
            &SandboxTemplate::default(),
        )
        .unwrap();

        let exports = loader.require("./index", &tmp.path().join("entry.js")).unwrap();
        let context = loader.sandbox.context_mut();
        let value = exports.as_object().unwrap().get("value", context).unwrap();
        assert_eq!(value.as_number(), Some(42.0));
    }

    #[test]
    fn caches_exports_across_repeated_requires() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("counter.js"), "globalThis.__n = (globalThis.__n || 0) + 1; module.exports = { n: globalThis.__n };");

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            tmp.path().join(".versions"),
            BTreeMap::new(),
            true,
            None,
            &SandboxTemplate::default(),
        )
        .unwrap();

        let entry = tmp.path().join("entry.js");
        let first = loader.require("./counter", &entry).unwrap();
        let second = loader.require("./counter", &entry).unwrap();
        let context = loader.sandbox.context_mut();
        assert_eq!(first.as_object().unwrap().get("n", context).unwrap().as_number(), Some(1.0));
        assert_eq!(second.as_object().unwrap().get("n", context).unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn failed_require_is_retried_every_time_with_no_negative_caching() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("broken.js"), "throw new Error('boom');");

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            tmp.path().join(".versions"),
            BTreeMap::new(),
            true,
            None,
            &SandboxTemplate::default(),
        )
        .unwrap();

        let entry = tmp.path().join("entry.js");
        for _ in 0..10 {
            let err = loader.require("./broken", &entry).unwrap_err();
            assert!(matches!(err, PluginError::ExecutionError { .. }));
        }
    }

    #[test]
    fn circular_requires_see_the_live_partially_populated_module() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("a.js"),
            "exports.loaded = false;\nvar b = require('./b');\nexports.loaded = true;\nexports.bSawLoaded = b.aLoadedWhenBRequired;",
        );
        write(&tmp.path().join("b.js"), "var a = require('./a');\nexports.aLoadedWhenBRequired = a.loaded;");

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            tmp.path().join(".versions"),
            BTreeMap::new(),
            true,
            None,
            &SandboxTemplate::default(),
        )
        .unwrap();

        let entry = tmp.path().join("entry.js");
        let a = loader.require("./a", &entry).unwrap();
        let context = loader.sandbox.context_mut();
        let loaded = a.as_object().unwrap().get("loaded", context).unwrap();
        assert_eq!(loaded.as_boolean(), Some(true));
        // b required a while a was still mid-load, so it saw `loaded` still
        // false — proof the in-progress map hands out the live module, not a
        // stale exports snapshot.
        let b_saw_loaded = a.as_object().unwrap().get("bSawLoaded", context).unwrap();
        assert_eq!(b_saw_loaded.as_boolean(), Some(false));
    }

    #[test]
    fn plugin_own_dependency_binding_wins_over_a_diverging_host_version() {
        let tmp = tempfile::tempdir().unwrap();
        let versions_path = tmp.path().join(".versions");
        let debug_dir = versions_path.join("debug@2.6.9");
        write(&debug_dir.join("package.json"), r#"{"name":"debug","version":"2.6.9"}"#);
        write(&debug_dir.join("index.js"), "module.exports = {};");

        struct HostDebugV4;
        impl HostRequire for HostDebugV4 {
            fn is_available(&self, name: &str) -> bool {
                name == "debug"
            }
            fn require(&self, name: &str) -> Option<Value> {
                (name == "debug").then(|| serde_json::json!({"version": "4.3.4"}))
            }
        }

        let mut deps = BTreeMap::new();
        deps.insert("debug".to_string(), "2.6.9".to_string());

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            deps,
            versions_path,
            BTreeMap::new(),
            true,
            Some(Arc::new(HostDebugV4)),
            &SandboxTemplate::default(),
        )
        .unwrap();

        let entry = tmp.path().join("entry.js");
        let pkg = loader.require("debug/package.json", &entry).unwrap();
        let context = loader.sandbox.context_mut();
        let version = pkg.as_object().unwrap().get("version", context).unwrap();
        assert_eq!(version.as_string().unwrap().to_std_string_escaped(), "2.6.9");

        // The host's own resolution of the same name is untouched by the
        // plugin's bound version.
        let host_view = HostDebugV4.require("debug").unwrap();
        assert_eq!(host_view["version"], "4.3.4");
    }

    #[test]
    fn invalidate_under_forces_a_fresh_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dep_dir = tmp.path().join("dep");
        write(&dep_dir.join("index.js"), "globalThis.__n = (globalThis.__n || 0) + 1; module.exports = { n: globalThis.__n };");

        let mut deps = BTreeMap::new();
        deps.insert("dep".to_string(), "1.0.0".to_string());
        let versions_path = tmp.path().join(".versions");
        write(&versions_path.join("dep@1.0.0").join("package.json"), r#"{"name":"dep","version":"1.0.0"}"#);
        write(&versions_path.join("dep@1.0.0").join("index.js"), "globalThis.__n = (globalThis.__n || 0) + 1; module.exports = { n: globalThis.__n };");

        let mut loader = Loader::new(
            tmp.path().to_path_buf(),
            deps,
            versions_path.clone(),
            BTreeMap::new(),
            true,
            None,
            &SandboxTemplate::default(),
        )
        .unwrap();

        let entry = tmp.path().join("entry.js");
        let first = loader.require("dep", &entry).unwrap();
        loader.invalidate_under(&versions_path.join("dep@1.0.0"));
        let second = loader.require("dep", &entry).unwrap();

        let context = loader.sandbox.context_mut();
        let first_n = first.as_object().unwrap().get("n", context).unwrap().as_number();
        let second_n = second.as_object().unwrap().get("n", context).unwrap().as_number();
        assert_ne!(first_n, second_n);
    }
}

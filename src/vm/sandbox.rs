//! Per-plugin JS engine realm: an isolated `boa_engine::Context` whose
//! `global` and `process.env` are seeded from a [`crate::config::SandboxTemplate`]
//! and never shared with any other plugin's realm.

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsValue, NativeFunction, Source};

use crate::config::SandboxTemplate;
use crate::error::{PluginError, PluginResult};

/// One plugin's isolated evaluation context.
pub struct Sandbox {
    context: Context,
}

impl Sandbox {
    /// Builds a fresh realm and installs `template`'s `env`/`global`
    /// bindings plus the minimal Node-shaped globals (`process`, `Buffer`,
    /// the timer functions) the wrapper function signature expects to find
    /// in scope. `template.env` left empty falls back to a copy of the host
    /// process's own environment.
    pub fn new(template: &SandboxTemplate) -> PluginResult<Self> {
        let mut context = Context::default();

        let mut process = ObjectInitializer::new(&mut context);
        let mut env = ObjectInitializer::new(process.context());
        if template.env.is_empty() {
            for (key, value) in std::env::vars() {
                env.property(key.as_str(), JsValue::from(value.as_str()), Attribute::all());
            }
        } else {
            for (key, value) in &template.env {
                env.property(key.as_str(), JsValue::from(value.as_str()), Attribute::all());
            }
        }
        let env_obj = env.build();
        process.property("env", env_obj, Attribute::all());
        let process_obj = process.build();
        context.register_global_property("process", process_obj, Attribute::all()).map_err(js_error)?;

        register_timers(&mut context)?;
        register_buffer_stub(&mut context)?;

        for (key, value) in &template.global {
            let js_value = json_to_js(value, &mut context)?;
            context.register_global_property(key.as_str(), js_value, Attribute::all()).map_err(js_error)?;
        }

        Ok(Self { context })
    }

    /// Evaluates `source` as a plain script (used for `run_script`, and
    /// internally to compile each module's wrapper function).
    pub fn eval(&mut self, source: &str) -> PluginResult<JsValue> {
        self.context.eval(Source::from_bytes(source)).map_err(js_error)
    }

    /// The underlying engine context, for callers that need to call a
    /// compiled function value directly (the module loader).
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}

fn js_error(e: boa_engine::JsError) -> PluginError {
    PluginError::ExecutionError { file: std::path::PathBuf::new(), message: e.to_string() }
}

/// Converts a `serde_json::Value` into a `JsValue` by round-tripping through
/// `JSON.parse`, the simplest correct way to hydrate arbitrary JSON-shaped
/// sandbox globals into a boa realm.
pub(crate) fn json_to_js(value: &serde_json::Value, context: &mut Context) -> PluginResult<JsValue> {
    let text = serde_json::to_string(value)?;
    let wrapped = format!("(JSON.parse({text:?}))");
    context.eval(Source::from_bytes(&wrapped)).map_err(js_error)
}

/// The sandbox runs cooperatively with no real event loop, so timers fire
/// their callback immediately and once; `clearTimeout`/`clearInterval` are
/// no-ops since nothing is ever pending.
fn register_timers(context: &mut Context) -> PluginResult<()> {
    let with_delay = build_fn(context, fire_immediately, "setTimeout");
    context.register_global_property("setTimeout", with_delay.clone(), Attribute::all()).map_err(js_error)?;
    context.register_global_property("setInterval", with_delay, Attribute::all()).map_err(js_error)?;

    let no_delay = build_fn(context, fire_immediately_no_delay, "setImmediate");
    context.register_global_property("setImmediate", no_delay, Attribute::all()).map_err(js_error)?;

    let clear = build_fn(context, noop, "clearTimeout");
    context.register_global_property("clearTimeout", clear.clone(), Attribute::all()).map_err(js_error)?;
    context.register_global_property("clearInterval", clear.clone(), Attribute::all()).map_err(js_error)?;
    context.register_global_property("clearImmediate", clear, Attribute::all()).map_err(js_error)?;
    Ok(())
}

fn build_fn(
    context: &mut Context,
    f: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    name: &str,
) -> boa_engine::JsObject {
    FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(f)).name(name).length(1).build()
}

fn fire_immediately(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    call_first_arg(args, 2, context)
}

fn fire_immediately_no_delay(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    call_first_arg(args, 1, context)
}

fn call_first_arg(args: &[JsValue], extra_args_start: usize, context: &mut Context) -> JsResult<JsValue> {
    if let Some(callback) = args.first().and_then(JsValue::as_object) {
        let extra: Vec<JsValue> = args.get(extra_args_start..).map(<[JsValue]>::to_vec).unwrap_or_default();
        callback.call(&JsValue::undefined(), &extra, context)?;
    }
    Ok(JsValue::undefined())
}

fn noop(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::undefined())
}

/// A minimal `Buffer.from`/`Buffer.isBuffer` stand-in. Binary buffer
/// semantics are out of scope; `from` passes its argument through unchanged
/// so plugins that only use `Buffer` as a marker type still work.
fn register_buffer_stub(context: &mut Context) -> PluginResult<()> {
    let buffer = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(buffer_from), "from", 1)
        .function(NativeFunction::from_fn_ptr(noop), "isBuffer", 1)
        .build();
    context.register_global_property("Buffer", buffer, Attribute::all()).map_err(js_error)
}

fn buffer_from(_this: &JsValue, args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    Ok(args.first().cloned().unwrap_or_else(JsValue::undefined))
}

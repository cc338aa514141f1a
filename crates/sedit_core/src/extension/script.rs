//! Extensions written as sedit scripts.
//!
//! A module's top level runs once at load time; `setup()` and `teardown()`
//! are called when defined. Functions are passed to host bindings by name,
//! e.g. `add_menu_item("Say Hi", "say_hi")`.
//!
//! # Invariants
//! - A module's globals persist between calls. Calls may overlap (owner
//!   thread and `run_background` workers); each global read or write is
//!   atomic, a whole call is not.
//! - Callbacks handed to the registry or event bus hold the module weakly,
//!   so a reload frees the old module even if a callback leaks.

use super::api::{parse_level, ExtensionApi};
use super::Extension;
use crate::events::EventCallback;
use crate::logging::EXTENSION_LOG_TARGET;
use crate::script::{
    compile, ExecError, HostBindings, Interpreter, Program, RuntimeError, Scope, ScriptError,
    Value,
};
use crate::HookResult;
use log::{info, Level};
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

const HOOK_SETUP: &str = "setup";
const HOOK_TEARDOWN: &str = "teardown";

/// Host functions that need a facade, i.e. are unavailable at load time.
const FACADE_FUNCTIONS: &[&str] = &[
    "add_menu_item",
    "on",
    "off",
    "get_setting",
    "set_setting",
    "get_extension_setting",
    "set_extension_setting",
    "get_text",
    "set_text",
    "open_file",
    "save_file",
    "current_file",
    "run_background",
    "register_resource",
];

pub struct ScriptExtension {
    module: Arc<ScriptModule>,
}

struct ScriptModule {
    name: String,
    program: Program,
    globals: Mutex<Scope>,
    /// One callback per function name so `off` finds what `on` registered.
    listeners: Mutex<HashMap<String, EventCallback>>,
}

impl ScriptExtension {
    /// Compiles `source` and runs its top level.
    pub fn load(name: &str, source: &str, filename: &str) -> Result<Self, ScriptError> {
        let program = compile(source, filename)?;
        let module = Arc::new(ScriptModule {
            name: name.to_string(),
            program,
            globals: Mutex::new(Scope::new()),
            listeners: Mutex::new(HashMap::new()),
        });
        module.run_top_level()?;
        info!(
            "event=extension_module_load module=extension status=ok name={} functions={}",
            name,
            module.program.function_names().len()
        );
        Ok(Self { module })
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.module.program.has_function(name)
    }

    fn hook(&self, hook: &str, api: &ExtensionApi) -> HookResult {
        if !self.module.program.has_function(hook) {
            return Ok(());
        }
        self.module.call(Some(api), hook, Vec::new())?;
        Ok(())
    }
}

impl Extension for ScriptExtension {
    fn setup(&self, api: &ExtensionApi) -> HookResult {
        self.hook(HOOK_SETUP, api)
    }

    fn teardown(&self, api: &ExtensionApi) -> HookResult {
        self.hook(HOOK_TEARDOWN, api)
    }
}

impl ScriptModule {
    fn run_top_level(self: &Arc<Self>) -> Result<(), ScriptError> {
        let bindings = ModuleBindings {
            module: self,
            api: None,
        };
        Interpreter::shared(&self.program, &self.globals, &bindings)
            .run()
            .map_err(exec_error)
    }

    fn call(
        self: &Arc<Self>,
        api: Option<&ExtensionApi>,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let bindings = ModuleBindings { module: self, api };
        Interpreter::shared(&self.program, &self.globals, &bindings)
            .call(function, args)
            .map_err(exec_error)
    }

    fn listener(self: &Arc<Self>, api: &ExtensionApi, function: &str) -> EventCallback {
        let mut listeners = self.listeners.lock();
        if let Some(existing) = listeners.get(function) {
            return Arc::clone(existing);
        }
        let module = Arc::downgrade(self);
        let api = api.clone();
        let name = function.to_string();
        let callback: EventCallback = Arc::new(move |args| {
            let values = args.iter().map(Value::from_json).collect();
            call_weak(&module, &api, &name, values)
        });
        listeners.insert(function.to_string(), Arc::clone(&callback));
        callback
    }
}

fn call_weak(
    module: &Weak<ScriptModule>,
    api: &ExtensionApi,
    function: &str,
    args: Vec<Value>,
) -> HookResult {
    let Some(module) = module.upgrade() else {
        return Err(format!("extension module for `{function}` is unloaded").into());
    };
    module.call(Some(api), function, args)?;
    Ok(())
}

fn exec_error(err: ExecError) -> ScriptError {
    match err {
        ExecError::Raised(err) => ScriptError::Runtime(err),
        ExecError::Halted => ScriptError::Runtime(RuntimeError {
            message: "execution halted".to_string(),
            frames: Vec::new(),
        }),
    }
}

struct ModuleBindings<'a> {
    module: &'a Arc<ScriptModule>,
    api: Option<&'a ExtensionApi>,
}

impl ModuleBindings<'_> {
    fn log(&self, message: &str, level: Level) {
        match self.api {
            Some(api) => api.log(message, level),
            None => log::log!(
                target: EXTENSION_LOG_TARGET,
                level,
                "[{}] {}",
                self.module.name,
                message
            ),
        }
    }

    fn function_arg(&self, args: &[Value], index: usize) -> Result<String, String> {
        let name = string_arg(args, index)?;
        if !self.module.program.has_function(&name) {
            return Err(format!("undefined function `{name}`"));
        }
        Ok(name)
    }

    fn facade_call(&self, api: &ExtensionApi, name: &str, args: &[Value]) -> Result<Value, String> {
        match name {
            "add_menu_item" => {
                let label = string_arg(args, 0)?;
                let function = self.function_arg(args, 1)?;
                let module = Arc::downgrade(self.module);
                let callback_api = api.clone();
                api.add_menu_item(
                    &label,
                    Arc::new(move || call_weak(&module, &callback_api, &function, Vec::new())),
                );
                Ok(Value::Nil)
            }
            "on" => {
                let event = string_arg(args, 0)?;
                let function = self.function_arg(args, 1)?;
                let callback = self.module.listener(api, &function);
                Ok(Value::Bool(api.on(&event, callback)))
            }
            "off" => {
                let event = string_arg(args, 0)?;
                let function = string_arg(args, 1)?;
                let callback = self.module.listeners.lock().get(&function).cloned();
                Ok(Value::Bool(
                    callback.is_some_and(|callback| api.off(&event, &callback)),
                ))
            }
            "get_setting" => {
                let key = string_arg(args, 0)?;
                let default = args.get(1).map(Value::to_json).unwrap_or(JsonValue::Null);
                Ok(Value::from_json(&api.get_setting(&key, default)))
            }
            "set_setting" => {
                let key = string_arg(args, 0)?;
                let value = args.get(1).ok_or("set_setting expects a value")?;
                Ok(Value::Bool(api.set_setting(&key, value.to_json())))
            }
            "get_extension_setting" => {
                let key = string_arg(args, 0)?;
                let settings = api.get_extension_settings();
                match settings.get(&key) {
                    Some(value) => Ok(Value::from_json(value)),
                    None => Ok(args.get(1).cloned().unwrap_or_default()),
                }
            }
            "set_extension_setting" => {
                let key = string_arg(args, 0)?;
                let value = args.get(1).ok_or("set_extension_setting expects a value")?;
                let mut settings = match api.get_extension_settings() {
                    JsonValue::Object(map) => map,
                    _ => Map::new(),
                };
                settings.insert(key, value.to_json());
                Ok(Value::Bool(
                    api.set_extension_settings(JsonValue::Object(settings)),
                ))
            }
            "get_text" => Ok(Value::Str(api.text())),
            "set_text" => {
                api.set_text(&string_arg(args, 0)?);
                Ok(Value::Nil)
            }
            "open_file" => {
                let path = string_arg(args, 0)?;
                Ok(Value::Bool(api.open_file(Path::new(&path))))
            }
            "save_file" => {
                let path = match args.first() {
                    Some(Value::Str(path)) => Some(path.clone()),
                    Some(Value::Nil) | None => None,
                    Some(other) => {
                        return Err(format!("save_file expects a path, got {}", other.type_name()))
                    }
                };
                Ok(Value::Bool(api.save_file(path.as_deref().map(Path::new))))
            }
            "current_file" => Ok(api
                .current_path()
                .map(|path| Value::Str(path.to_string_lossy().into_owned()))
                .unwrap_or_default()),
            "run_background" => {
                let function = self.function_arg(args, 0)?;
                let module = Arc::downgrade(self.module);
                let job_api = api.clone();
                let handle = api.run_background(move || {
                    call_weak(&module, &job_api, &function, Vec::new())
                });
                Ok(Value::Bool(handle.is_some()))
            }
            "register_resource" => {
                let function = self.function_arg(args, 0)?;
                let module = Arc::downgrade(self.module);
                let dispose_api = api.clone();
                api.register_disposer(move || {
                    call_weak(&module, &dispose_api, &function, Vec::new())
                });
                Ok(Value::Nil)
            }
            other => Err(format!("undefined function `{other}`")),
        }
    }
}

impl HostBindings for ModuleBindings<'_> {
    fn print(&self, text: &str) {
        self.log(text, Level::Info);
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        if name == "log" {
            let result = string_arg(args, 0).map(|message| {
                let level = args
                    .get(1)
                    .and_then(Value::as_str)
                    .map_or(Level::Info, parse_level);
                self.log(&message, level);
                Value::Nil
            });
            return Some(result);
        }
        if !FACADE_FUNCTIONS.contains(&name) {
            return None;
        }
        Some(match self.api {
            Some(api) => self.facade_call(api, name, args),
            None => Err(format!("`{name}` is not available while the module loads")),
        })
    }
}

fn string_arg(args: &[Value], index: usize) -> Result<String, String> {
    match args.get(index) {
        Some(Value::Str(value)) => Ok(value.clone()),
        Some(other) => Err(format!(
            "argument {} must be a string, got {}",
            index + 1,
            other.type_name()
        )),
        None => Err(format!("missing argument {}", index + 1)),
    }
}

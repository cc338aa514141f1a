//! Capability surface handed to one extension.
//!
//! # Responsibility
//! - Give an extension bounded access to the buffer, documents, settings,
//!   events, menu, background work and the extension log.
//! - Tag everything it registers with the extension name so teardown can
//!   find it.
//!
//! # Invariants
//! - Facade methods never fail; document and settings operations report
//!   success as `bool` and log the cause of a failure.
//! - The facade holds no state beyond the extension name and its handles.

use super::registry::{ExtensionRegistry, MenuCallback};
use super::{guarded, Resource};
use crate::context::EditorContext;
use crate::events::EventCallback;
use crate::host::EditorHost;
use crate::logging::EXTENSION_LOG_TARGET;
use crate::HookResult;
use log::{error, warn, Level};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

#[derive(Clone)]
pub struct ExtensionApi {
    registry: Weak<ExtensionRegistry>,
    context: Arc<EditorContext>,
    name: String,
}

impl std::fmt::Debug for ExtensionApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionApi")
            .field("name", &self.name)
            .finish()
    }
}

impl ExtensionApi {
    pub(crate) fn new(registry: &Arc<ExtensionRegistry>, name: &str) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            context: Arc::clone(registry.context()),
            name: name.to_string(),
        }
    }

    /// Name of the extension this facade belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<EditorContext> {
        &self.context
    }

    /// Raw host handle, for extensions that drive the shell directly.
    pub fn host(&self) -> &Arc<dyn EditorHost> {
        self.context.host()
    }

    pub fn text(&self) -> String {
        self.context.text()
    }

    /// Replaces the buffer; publishes `text_changed`.
    pub fn set_text(&self, text: &str) {
        self.context.set_text(text);
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.context.current_path()
    }

    /// Adds a menu item under this extension; shown after the next menu
    /// rebuild.
    pub fn add_menu_item(&self, label: &str, callback: MenuCallback) {
        match self.registry.upgrade() {
            Some(registry) => registry.register_menu_item(&self.name, label, callback),
            None => self.warn_detached("add_menu_item"),
        }
    }

    pub fn open_file(&self, path: &Path) -> bool {
        if path.as_os_str().is_empty() {
            return false;
        }
        match self.context.open_file(path) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "event=file_open module=extension status=error name={} error={err}",
                    self.name
                );
                false
            }
        }
    }

    /// Saves to `path`, the current document path, or a dialog choice.
    pub fn save_file(&self, path: Option<&Path>) -> bool {
        match self.context.save_file(path) {
            Ok(saved) => saved.is_some(),
            Err(err) => {
                warn!(
                    "event=file_save module=extension status=error name={} error={err}",
                    self.name
                );
                false
            }
        }
    }

    pub fn get_setting(&self, key: &str, default: Value) -> Value {
        self.context.settings().get_or(key, default)
    }

    /// Persists immediately; I/O failures are logged, not reported.
    pub fn set_setting(&self, key: &str, value: Value) -> bool {
        self.context.settings().set(key, value);
        true
    }

    pub fn get_extension_settings(&self) -> Value {
        self.context.settings().extension_settings(&self.name)
    }

    pub fn set_extension_settings(&self, value: Value) -> bool {
        self.context
            .settings()
            .set_extension_settings(&self.name, value);
        true
    }

    /// Subscribes on the owner thread, tagged with this extension.
    pub fn on(&self, event: &str, callback: EventCallback) -> bool {
        self.context
            .events()
            .subscribe(event, callback, Some(&self.name), false);
        true
    }

    pub fn off(&self, event: &str, callback: &EventCallback) -> bool {
        self.context
            .events()
            .unsubscribe(event, Some(callback), Some(&self.name));
        true
    }

    /// Runs `job` on an unsupervised thread; failures are logged.
    pub fn run_background<F>(&self, job: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> HookResult + Send + 'static,
    {
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("sedit-ext-{name}"))
            .spawn(move || {
                if let Err(message) = guarded(job) {
                    error!(
                        target: EXTENSION_LOG_TARGET,
                        "[{name}] background task failed: {message}"
                    );
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(
                    "event=run_background module=extension status=spawn_failed name={} error={err}",
                    self.name
                );
                None
            }
        }
    }

    /// Hands a disposable to the registry; it is disposed exactly once when
    /// this extension is disabled or reloaded.
    pub fn register_resource(&self, resource: Box<dyn Resource>) {
        match self.registry.upgrade() {
            Some(registry) => registry.register_resource(&self.name, resource),
            None => self.warn_detached("register_resource"),
        }
    }

    /// Registers a plain closure as a resource disposer.
    pub fn register_disposer<F>(&self, disposer: F)
    where
        F: FnOnce() -> HookResult + Send + 'static,
    {
        self.register_resource(Box::new(disposer));
    }

    /// Appends `[name] message` to the extension log.
    pub fn log(&self, message: &str, level: Level) {
        log::log!(target: EXTENSION_LOG_TARGET, level, "[{}] {}", self.name, message);
    }

    fn warn_detached(&self, operation: &str) {
        warn!(
            "event={operation} module=extension status=detached name={}",
            self.name
        );
    }
}

/// Maps `debug|info|warn|warning|error` to a level; unknown names are `Info`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "warn" | "warning" => Level::Warn,
        "error" | "critical" => Level::Error,
        _ => Level::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_level;
    use log::Level;

    #[test]
    fn parse_level_defaults_to_info() {
        assert_eq!(parse_level("WARNING"), Level::Warn);
        assert_eq!(parse_level("error"), Level::Error);
        assert_eq!(parse_level("loud"), Level::Info);
    }
}

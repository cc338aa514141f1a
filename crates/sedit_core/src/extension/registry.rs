//! Extension registry and lifecycle manager.
//!
//! # Responsibility
//! - Discover, load, enable and disable extensions without restarting.
//! - Own the resources and menu items each extension registers.
//! - Maintain the derived extensions menu.
//!
//! # Invariants
//! - No registry lock is held while extension code runs.
//! - A reload disposes every resource registered before it started.
//! - Enabled state persisted in settings only changes through explicit
//!   `enable`/`disable`; reload and shutdown keep it.
//! - The menu is rebuilt after every state change and is deterministic for
//!   a given state (extensions in name order).

use super::api::ExtensionApi;
use super::loader::{discover, ExtensionDescriptor, ExtensionLoader};
use super::{guarded, Extension, ExtensionError, Resource};
use crate::context::EditorContext;
use crate::logging::EXTENSION_LOG_TARGET;
use crate::HookResult;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Action behind an extension menu item.
pub type MenuCallback = Arc<dyn Fn() -> HookResult + Send + Sync>;

const README_LABEL: &str = "Open README";
const FOLDER_LABEL: &str = "Open Folder";
const NESTED_INDENT: &str = "    ";

/// Fixed commands at the top of the extensions menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementCommand {
    OpenExtensionsFolder,
    ReloadAll,
}

impl ManagementCommand {
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenExtensionsFolder => "Open Extensions Folder",
            Self::ReloadAll => "Reload Extensions",
        }
    }
}

/// One row of the derived extensions menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    Command(ManagementCommand),
    Toggle {
        name: String,
        enabled: bool,
    },
    /// Opens the extension's README, or its folder when it has none.
    Aux {
        name: String,
        label: &'static str,
        path: PathBuf,
    },
    /// Menu item registered by `owner`; `index` is its registration slot.
    Item {
        owner: String,
        label: String,
        index: usize,
    },
}

impl MenuEntry {
    /// Label as rendered, with nested rows indented under their toggle.
    pub fn display_label(&self) -> String {
        match self {
            Self::Command(command) => command.label().to_string(),
            Self::Toggle { name, .. } => name.clone(),
            Self::Aux { label, .. } => format!("{NESTED_INDENT}{label}"),
            Self::Item { label, .. } => format!("{NESTED_INDENT}{label}"),
        }
    }
}

/// Load state visible to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum ModuleState {
    /// Discovered; the current load pass has not reached it yet.
    Loadable,
    Loaded,
    Failed(String),
}

/// Snapshot of one extension for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionInfo {
    pub descriptor: ExtensionDescriptor,
    pub state: ModuleState,
    pub enabled: bool,
    pub menu_items: Vec<String>,
    pub resources: usize,
}

/// Outcome of one `load_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub enabled: Vec<String>,
    pub enable_failed: Vec<(String, String)>,
}

enum ModuleSlot {
    Loadable,
    Loaded(Arc<dyn Extension>),
    Failed(String),
}

struct ExtensionRecord {
    descriptor: ExtensionDescriptor,
    slot: ModuleSlot,
    enabled: bool,
}

struct MenuItem {
    label: String,
    callback: MenuCallback,
}

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<String, ExtensionRecord>,
    resources: BTreeMap<String, Vec<Box<dyn Resource>>>,
    menu_items: BTreeMap<String, Vec<MenuItem>>,
    menu: Vec<MenuEntry>,
}

pub struct ExtensionRegistry {
    context: Arc<EditorContext>,
    extensions_dir: PathBuf,
    loader: Arc<dyn ExtensionLoader>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions_dir", &self.extensions_dir)
            .field("extensions", &self.state.lock().records.len())
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn new(
        context: Arc<EditorContext>,
        extensions_dir: impl Into<PathBuf>,
        loader: Arc<dyn ExtensionLoader>,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            context,
            extensions_dir: extensions_dir.into(),
            loader,
            state: Mutex::new(RegistryState::default()),
        });
        registry.rebuild_menu();
        registry
    }

    pub fn context(&self) -> &Arc<EditorContext> {
        &self.context
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    /// Tears everything down, rescans the extensions directory, loads every
    /// module and re-enables those persisted as enabled.
    ///
    /// # Errors
    /// - `DirectoryUnavailable` when the directory cannot be created or read;
    ///   the registry is left empty.
    pub fn load_all(self: &Arc<Self>) -> Result<LoadSummary, ExtensionError> {
        for name in self.enabled_names() {
            self.disable_inner(&name, false);
        }
        self.clear();

        let descriptors = match std::fs::create_dir_all(&self.extensions_dir)
            .and_then(|()| discover(&self.extensions_dir))
        {
            Ok(descriptors) => descriptors,
            Err(err) => {
                self.rebuild_menu();
                error!(
                    "event=extensions_load module=extension status=error dir={} error={err}",
                    self.extensions_dir.display()
                );
                return Err(ExtensionError::DirectoryUnavailable {
                    path: self.extensions_dir.clone(),
                    message: err.to_string(),
                });
            }
        };

        {
            let mut state = self.state.lock();
            for descriptor in &descriptors {
                state.records.insert(
                    descriptor.name.clone(),
                    ExtensionRecord {
                        descriptor: descriptor.clone(),
                        slot: ModuleSlot::Loadable,
                        enabled: false,
                    },
                );
            }
        }

        let mut summary = LoadSummary::default();
        for descriptor in &descriptors {
            let name = descriptor.name.as_str();
            let slot = match guarded(|| self.loader.load(name, &descriptor.path)) {
                Ok(module) => {
                    summary.loaded.push(name.to_string());
                    ModuleSlot::Loaded(module)
                }
                Err(message) => {
                    error!(
                        target: EXTENSION_LOG_TARGET,
                        "Failed to load extension {name}: {message}"
                    );
                    summary.failed.push((name.to_string(), message.clone()));
                    ModuleSlot::Failed(message)
                }
            };
            if let Some(record) = self.state.lock().records.get_mut(name) {
                record.slot = slot;
            }
        }

        let persisted = self.context.settings().enabled_extensions();
        for name in &summary.loaded {
            if !persisted.contains(name) {
                continue;
            }
            match self.enable(name) {
                Ok(()) => summary.enabled.push(name.clone()),
                Err(err) => {
                    error!(target: EXTENSION_LOG_TARGET, "Enable {name} failed: {err}");
                    summary.enable_failed.push((name.clone(), err.to_string()));
                }
            }
        }

        self.rebuild_menu();
        info!(
            "event=extensions_load module=extension status=ok loaded={} failed={} enabled={}",
            summary.loaded.len(),
            summary.failed.len(),
            summary.enabled.len()
        );
        Ok(summary)
    }

    /// Runs the extension's `setup` with a fresh facade and marks it enabled.
    ///
    /// Enabling an enabled extension is a no-op. A failed `setup` is not
    /// rolled back: whatever it registered stays until `disable`.
    ///
    /// # Errors
    /// - `NotFound` for an undiscovered name.
    /// - `NotLoaded` when the module failed (or has not yet tried) to load.
    /// - `HookFailed` when `setup` returns an error or panics.
    pub fn enable(self: &Arc<Self>, name: &str) -> Result<(), ExtensionError> {
        let module = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get(name)
                .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
            if record.enabled {
                return Ok(());
            }
            let module = match &record.slot {
                ModuleSlot::Loaded(module) => Arc::clone(module),
                ModuleSlot::Loadable | ModuleSlot::Failed(_) => {
                    return Err(ExtensionError::NotLoaded(name.to_string()))
                }
            };
            state.menu_items.insert(name.to_string(), Vec::new());
            state.resources.entry(name.to_string()).or_default();
            module
        };

        let api = ExtensionApi::new(self, name);
        if let Err(message) = guarded(|| module.setup(&api)) {
            self.rebuild_menu();
            warn!("event=extension_enable module=extension status=error name={name}");
            return Err(ExtensionError::HookFailed {
                name: name.to_string(),
                hook: "setup",
                message,
            });
        }

        if let Some(record) = self.state.lock().records.get_mut(name) {
            record.enabled = true;
        }
        self.context.settings().set_extension_enabled(name, true);
        self.rebuild_menu();
        info!("event=extension_enable module=extension status=ok name={name}");
        Ok(())
    }

    /// Runs `teardown`, releases everything the extension registered and
    /// marks it disabled. Never fails; unknown or unloaded names are a no-op.
    pub fn disable(self: &Arc<Self>, name: &str) {
        self.disable_inner(name, true);
    }

    /// Disables every enabled extension, keeping the persisted enabled set so
    /// the next start restores it.
    pub fn shutdown(self: &Arc<Self>) {
        for name in self.enabled_names() {
            self.disable_inner(&name, false);
        }
        info!("event=extensions_shutdown module=extension status=ok");
    }

    fn disable_inner(self: &Arc<Self>, name: &str, persist: bool) {
        let (module, was_enabled) = {
            let state = self.state.lock();
            match state.records.get(name) {
                Some(ExtensionRecord {
                    slot: ModuleSlot::Loaded(module),
                    enabled,
                    ..
                }) => (Arc::clone(module), *enabled),
                _ => return,
            }
        };

        if was_enabled {
            let api = ExtensionApi::new(self, name);
            if let Err(message) = guarded(|| module.teardown(&api)) {
                warn!(target: EXTENSION_LOG_TARGET, "[{name}] teardown failed: {message}");
            }
        }

        let resources = {
            let mut state = self.state.lock();
            state.menu_items.remove(name);
            if let Some(record) = state.records.get_mut(name) {
                record.enabled = false;
            }
            state.resources.remove(name).unwrap_or_default()
        };
        self.context.events().remove_owner(name);
        dispose_resources(name, resources);

        if persist {
            self.context.settings().set_extension_enabled(name, false);
        }
        self.rebuild_menu();
        if was_enabled {
            info!("event=extension_disable module=extension status=ok name={name}");
        }
    }

    /// Drops all records and disposes resources left by extensions that
    /// were never cleanly disabled.
    fn clear(&self) {
        let (leftovers, names) = {
            let mut state = self.state.lock();
            let names: Vec<String> = state.records.keys().cloned().collect();
            state.records.clear();
            state.menu_items.clear();
            (std::mem::take(&mut state.resources), names)
        };
        for name in &names {
            self.context.events().remove_owner(name);
        }
        for (name, resources) in leftovers {
            dispose_resources(&name, resources);
        }
    }

    pub fn register_resource(&self, name: &str, resource: Box<dyn Resource>) {
        self.state
            .lock()
            .resources
            .entry(name.to_string())
            .or_default()
            .push(resource);
    }

    pub fn register_menu_item(&self, name: &str, label: &str, callback: MenuCallback) {
        self.state
            .lock()
            .menu_items
            .entry(name.to_string())
            .or_default()
            .push(MenuItem {
                label: label.to_string(),
                callback,
            });
    }

    /// Recomputes the derived extensions menu from current state.
    pub fn rebuild_menu(&self) {
        let mut state = self.state.lock();
        let mut menu = vec![
            MenuEntry::Command(ManagementCommand::OpenExtensionsFolder),
            MenuEntry::Command(ManagementCommand::ReloadAll),
        ];
        for (name, record) in &state.records {
            menu.push(MenuEntry::Toggle {
                name: name.clone(),
                enabled: record.enabled,
            });
            let descriptor = &record.descriptor;
            match &descriptor.readme {
                Some(readme) => menu.push(MenuEntry::Aux {
                    name: name.clone(),
                    label: README_LABEL,
                    path: readme.clone(),
                }),
                None => menu.push(MenuEntry::Aux {
                    name: name.clone(),
                    label: FOLDER_LABEL,
                    path: descriptor.directory.clone(),
                }),
            }
            for (index, item) in state.menu_items.get(name).into_iter().flatten().enumerate() {
                menu.push(MenuEntry::Item {
                    owner: name.clone(),
                    label: item.label.clone(),
                    index,
                });
            }
        }
        state.menu = menu;
    }

    pub fn menu_snapshot(&self) -> Vec<MenuEntry> {
        self.state.lock().menu.clone()
    }

    /// Runs the action of menu row `index`; returns false when out of range.
    ///
    /// Failures are logged. A toggle whose enable fails is cleaned up and
    /// left disabled.
    pub fn activate(self: &Arc<Self>, index: usize) -> bool {
        let Some(entry) = self.menu_snapshot().get(index).cloned() else {
            return false;
        };
        match entry {
            MenuEntry::Command(ManagementCommand::OpenExtensionsFolder) => {
                self.context.host().open_path(&self.extensions_dir);
            }
            MenuEntry::Command(ManagementCommand::ReloadAll) => {
                if let Err(err) = self.load_all() {
                    error!("event=extensions_reload module=extension status=error error={err}");
                }
            }
            MenuEntry::Toggle {
                name,
                enabled: false,
            } => {
                if let Err(err) = self.enable(&name) {
                    error!(target: EXTENSION_LOG_TARGET, "Enable {name} failed: {err}");
                    self.disable(&name);
                }
            }
            MenuEntry::Toggle {
                name,
                enabled: true,
            } => self.disable(&name),
            MenuEntry::Aux { path, .. } => {
                self.context.host().open_path(&path);
            }
            MenuEntry::Item { owner, index, .. } => {
                let callback = self
                    .state
                    .lock()
                    .menu_items
                    .get(&owner)
                    .and_then(|items| items.get(index))
                    .map(|item| Arc::clone(&item.callback));
                if let Some(callback) = callback {
                    if let Err(message) = guarded(|| callback()) {
                        error!(
                            target: EXTENSION_LOG_TARGET,
                            "[{owner}] menu item failed: {message}"
                        );
                    }
                }
            }
        }
        true
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.state
            .lock()
            .records
            .get(name)
            .is_some_and(|record| record.enabled)
    }

    pub fn extensions(&self) -> Vec<ExtensionInfo> {
        let state = self.state.lock();
        state
            .records
            .iter()
            .map(|(name, record)| ExtensionInfo {
                descriptor: record.descriptor.clone(),
                state: match &record.slot {
                    ModuleSlot::Loadable => ModuleState::Loadable,
                    ModuleSlot::Loaded(_) => ModuleState::Loaded,
                    ModuleSlot::Failed(message) => ModuleState::Failed(message.clone()),
                },
                enabled: record.enabled,
                menu_items: state
                    .menu_items
                    .get(name)
                    .map(|items| items.iter().map(|item| item.label.clone()).collect())
                    .unwrap_or_default(),
                resources: state.resources.get(name).map_or(0, Vec::len),
            })
            .collect()
    }

    pub fn extension(&self, name: &str) -> Option<ExtensionInfo> {
        self.extensions()
            .into_iter()
            .find(|info| info.descriptor.name == name)
    }

    fn enabled_names(&self) -> Vec<String> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|(_, record)| record.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Disposes newest first; failures are logged and do not stop the batch.
fn dispose_resources(name: &str, resources: Vec<Box<dyn Resource>>) {
    for resource in resources.into_iter().rev() {
        if let Err(message) = guarded(|| resource.dispose()) {
            warn!(target: EXTENSION_LOG_TARGET, "[{name}] resource dispose failed: {message}");
        }
    }
}

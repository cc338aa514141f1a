//! Extension runtime.
//!
//! # Responsibility
//! - Discover extension modules on disk and load them through a loader.
//! - Track per-extension lifecycle (`Loaded`, `Failed`, enabled flag).
//! - Hand each extension a bounded facade (`ExtensionApi`) and own the
//!   resources and menu items it registers.
//!
//! # Invariants
//! - A failure inside one extension never aborts a batch operation.
//! - `enabled == true` implies a loaded module whose `setup` returned `Ok`.
//! - Resources are disposed exactly once, on disable or reload.

pub mod api;
pub mod loader;
pub mod registry;
pub mod script;

pub use api::ExtensionApi;
pub use loader::{discover, DefaultExtensionLoader, ExtensionDescriptor, ExtensionLoader};
pub use registry::{
    ExtensionInfo, ExtensionRegistry, LoadSummary, ManagementCommand, MenuCallback, MenuEntry,
    ModuleState,
};
pub use script::ScriptExtension;

use crate::logging::panic_message;
use crate::{BoxError, HookResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// Module file suffix for script extensions.
pub const MODULE_SUFFIX: &str = "sed";

/// Lifecycle hooks of an extension module; both are optional.
pub trait Extension: Send + Sync {
    fn setup(&self, _api: &ExtensionApi) -> HookResult {
        Ok(())
    }

    fn teardown(&self, _api: &ExtensionApi) -> HookResult {
        Ok(())
    }
}

/// Disposable handle owned by the registry on behalf of an extension.
pub trait Resource: Send {
    fn dispose(self: Box<Self>) -> HookResult;
}

impl<F> Resource for F
where
    F: FnOnce() -> HookResult + Send,
{
    fn dispose(self: Box<Self>) -> HookResult {
        (*self)()
    }
}

/// Extension lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// Extension exists but its module did not load.
    NotLoaded(String),
    /// No extension with this name was discovered.
    NotFound(String),
    LoadFailed { name: String, message: String },
    HookFailed {
        name: String,
        hook: &'static str,
        message: String,
    },
    DirectoryUnavailable { path: PathBuf, message: String },
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded(name) => write!(f, "extension not loaded: {name}"),
            Self::NotFound(name) => write!(f, "extension not found: {name}"),
            Self::LoadFailed { name, message } => {
                write!(f, "failed to load extension {name}: {message}")
            }
            Self::HookFailed {
                name,
                hook,
                message,
            } => write!(f, "extension {name} {hook} failed: {message}"),
            Self::DirectoryUnavailable { path, message } => write!(
                f,
                "extensions directory unavailable `{}`: {message}",
                path.display()
            ),
        }
    }
}

impl Error for ExtensionError {}

/// Runs extension code, turning panics into errors.
pub(crate) fn guarded<T>(call: impl FnOnce() -> Result<T, BoxError>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

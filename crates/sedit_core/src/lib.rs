//! Core of the sedit editor: extension runtime and interactive debugger.
//! Everything a shell needs beyond text rendering lives here.

pub mod config;
pub mod context;
pub mod debug;
pub mod events;
pub mod extension;
pub mod host;
pub mod logging;
pub mod runtime;
pub mod script;
pub mod settings;

pub use config::SeditConfig;
pub use context::EditorContext;
pub use debug::{
    DebugError, DebugMessage, DebugSessionController, Directive, SessionId, SessionStatus,
};
pub use events::{EventArgs, EventBus, EventCallback};
pub use extension::{
    Extension, ExtensionApi, ExtensionError, ExtensionLoader, ExtensionRegistry, MenuEntry,
    Resource,
};
pub use host::{EditorHost, HeadlessHost, OwnerQueue};
pub use logging::{default_log_level, init_logging, logging_status};
pub use runtime::Sedit;
pub use settings::{SettingsError, SettingsStore};

/// Error raised by extension code and listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of an extension hook, listener, disposer or menu action.
pub type HookResult = Result<(), BoxError>;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

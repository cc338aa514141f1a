//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose stable, use-case-level functions to Dart via FRB.
//! - Own the process-wide editor runtime between `editor_start` and
//!   `editor_shutdown`.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Calls made before `editor_start` fail softly (empty/false/error
//!   envelope) instead of starting a runtime implicitly.
//! - Extension callbacks scheduled for the owner thread only run inside
//!   `editor_tick`, which the UI isolate calls.

use crate::host::UiHost;
use log::{info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sedit_core::extension::ModuleState;
use sedit_core::logging::{clear_log, read_log_tail};
use sedit_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, logging_status,
    ping as ping_inner, Directive, MenuEntry, Sedit, SeditConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TAIL_DEFAULT_LIMIT: u32 = 200;
const LOG_TAIL_LIMIT_MAX: u32 = 2_000;

struct EditorRuntime {
    sedit: Sedit,
    host: Arc<UiHost>,
}

static RUNTIME: Lazy<Mutex<Option<EditorRuntime>>> = Lazy::new(|| Mutex::new(None));

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl ActionResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Editor state pulled by the shell once per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorTick {
    /// Buffer content as last set by the core or the shell.
    pub text: String,
    /// Bumped on every buffer replacement; redraw when it changes.
    pub text_revision: u64,
    /// 1-based line the debugger stopped at, if any.
    pub highlighted_line: Option<u32>,
    /// Output pane lines appended since the previous tick.
    pub output: Vec<String>,
    /// Debugger status label (`idle|running|stopped|finished|exited|errored`).
    pub debug_status: String,
}

/// One discovered extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionItem {
    pub name: String,
    /// `loadable|loaded|failed`.
    pub state: String,
    /// Load error for failed modules.
    pub error: Option<String>,
    pub enabled: bool,
    pub menu_items: Vec<String>,
    pub has_readme: bool,
}

/// One row of the extensions menu; activate it by `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuRow {
    pub index: u32,
    /// `command|toggle|aux|item`.
    pub kind: String,
    /// Display label, already indented for nested rows.
    pub label: String,
    /// Checked state for toggle rows.
    pub checked: Option<bool>,
}

/// Starts the editor runtime and loads extensions.
///
/// Input semantics:
/// - `root`: optional directory holding `extensions/`, `settings.json` and
///   `logs/`; empty or absent uses the per-user config directory.
///
/// # FFI contract
/// - Sync call; performs file-system work and runs extension setup hooks.
/// - Idempotent: a second call while running is a successful no-op.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_start(root: Option<String>) -> ActionResponse {
    let mut runtime = RUNTIME.lock();
    if runtime.is_some() {
        return ActionResponse::success("Editor already running.");
    }
    let config = match root.as_deref().map(str::trim) {
        Some(root) if !root.is_empty() => SeditConfig::rooted_at(Path::new(root)),
        _ => SeditConfig::default(),
    };
    let host = Arc::new(UiHost::new());
    let sedit = Sedit::start(config, host.clone());
    let message = format!(
        "Editor started with {} extension(s).",
        sedit.extensions().extensions().len()
    );
    info!("event=ffi_editor_start module=ffi status=ok");
    *runtime = Some(EditorRuntime { sedit, host });
    ActionResponse::success(message)
}

/// Tears extensions down and flushes settings.
///
/// # FFI contract
/// - Safe to call when not running; returns `ok=false`.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_shutdown() -> ActionResponse {
    match RUNTIME.lock().take() {
        Some(runtime) => {
            runtime.sedit.shutdown();
            ActionResponse::success("Editor stopped.")
        }
        None => ActionResponse::failure("editor_shutdown failed: editor not running"),
    }
}

/// Runs owner-thread work and returns what the shell must redraw.
///
/// # FFI contract
/// - Call from the UI isolate only; extension callbacks run inside.
/// - Returns `None` when the editor is not running.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_tick() -> Option<EditorTick> {
    with_runtime(|runtime| {
        runtime.sedit.debugger().poll(runtime.host.as_ref());
        let state = runtime.host.tick();
        EditorTick {
            text: state.text,
            text_revision: state.revision,
            highlighted_line: state.highlighted.map(to_u32),
            output: state.output,
            debug_status: status_label(&runtime.sedit.debugger().status()).to_string(),
        }
    })
}

/// Replaces the buffer from the shell and notifies extensions.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_set_text(text: String) -> bool {
    with_runtime(|runtime| runtime.sedit.context().set_text(&text)).is_some()
}

/// Opens `path` into the buffer.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_open_file(path: String) -> ActionResponse {
    let result = with_runtime(|runtime| runtime.sedit.context().open_file(Path::new(&path)));
    match result {
        Some(Ok(())) => ActionResponse::success(format!("Opened {path}.")),
        Some(Err(err)) => ActionResponse::failure(format!("editor_open_file failed: {err}")),
        None => not_running("editor_open_file"),
    }
}

/// Saves the buffer to `path`, or to the current document when absent.
#[flutter_rust_bridge::frb(sync)]
pub fn editor_save_file(path: Option<String>) -> ActionResponse {
    let target = path.map(PathBuf::from);
    let result = with_runtime(|runtime| runtime.sedit.context().save_file(target.as_deref()));
    match result {
        Some(Ok(Some(saved))) => ActionResponse::success(format!("Saved {}.", saved.display())),
        Some(Ok(None)) => ActionResponse::failure("editor_save_file failed: no target path"),
        Some(Err(err)) => ActionResponse::failure(format!("editor_save_file failed: {err}")),
        None => not_running("editor_save_file"),
    }
}

/// Lists discovered extensions in name order.
#[flutter_rust_bridge::frb(sync)]
pub fn extensions_list() -> Vec<ExtensionItem> {
    with_runtime(|runtime| {
        runtime
            .sedit
            .extensions()
            .extensions()
            .into_iter()
            .map(|info| {
                let (state, error) = match info.state {
                    ModuleState::Loadable => ("loadable", None),
                    ModuleState::Loaded => ("loaded", None),
                    ModuleState::Failed(message) => ("failed", Some(message)),
                };
                ExtensionItem {
                    name: info.descriptor.name,
                    state: state.to_string(),
                    error,
                    enabled: info.enabled,
                    menu_items: info.menu_items,
                    has_readme: info.descriptor.readme.is_some(),
                }
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Enables or disables one extension and persists the choice.
#[flutter_rust_bridge::frb(sync)]
pub fn extensions_set_enabled(name: String, enabled: bool) -> ActionResponse {
    let result = with_runtime(|runtime| {
        let registry = runtime.sedit.extensions();
        if enabled {
            registry.enable(&name).map_err(|err| err.to_string())
        } else {
            registry.disable(&name);
            Ok(())
        }
    });
    match result {
        Some(Ok(())) if enabled => ActionResponse::success(format!("Enabled {name}.")),
        Some(Ok(())) => ActionResponse::success(format!("Disabled {name}.")),
        Some(Err(err)) => ActionResponse::failure(format!("extensions_set_enabled failed: {err}")),
        None => not_running("extensions_set_enabled"),
    }
}

/// Re-discovers and reloads every extension.
#[flutter_rust_bridge::frb(sync)]
pub fn extensions_reload() -> ActionResponse {
    match with_runtime(|runtime| runtime.sedit.extensions().load_all()) {
        Some(Ok(summary)) => ActionResponse::success(format!(
            "Loaded {} extension(s), {} failed.",
            summary.loaded.len(),
            summary.failed.len()
        )),
        Some(Err(err)) => ActionResponse::failure(format!("extensions_reload failed: {err}")),
        None => not_running("extensions_reload"),
    }
}

/// Current extensions menu.
#[flutter_rust_bridge::frb(sync)]
pub fn extensions_menu() -> Vec<MenuRow> {
    with_runtime(|runtime| {
        runtime
            .sedit
            .extensions()
            .menu_snapshot()
            .iter()
            .enumerate()
            .map(|(index, entry)| to_menu_row(index, entry))
            .collect()
    })
    .unwrap_or_default()
}

/// Activates the menu row at `index`; false when the index is stale.
#[flutter_rust_bridge::frb(sync)]
pub fn extensions_activate(index: u32) -> bool {
    with_runtime(|runtime| runtime.sedit.extensions().activate(index as usize)).unwrap_or(false)
}

/// Starts debugging the current buffer.
#[flutter_rust_bridge::frb(sync)]
pub fn debug_start() -> ActionResponse {
    match with_runtime(|runtime| runtime.sedit.debug_buffer()) {
        Some(Ok(id)) => ActionResponse::success(format!("Debug session {id} started.")),
        Some(Err(err)) => ActionResponse::failure(format!("debug_start failed: {err}")),
        None => not_running("debug_start"),
    }
}

/// Resumes a stopped session with `step|next|continue|quit`.
///
/// # FFI contract
/// - Returns false for unknown directives or when no session is stopped.
#[flutter_rust_bridge::frb(sync)]
pub fn debug_action(directive: String) -> bool {
    let Some(directive) = Directive::parse(&directive) else {
        warn!("event=ffi_debug_action module=ffi status=rejected directive={directive}");
        return false;
    };
    with_runtime(|runtime| runtime.sedit.debugger().set_action(directive)).unwrap_or(false)
}

/// Flips a breakpoint; returns whether `line` now has one.
#[flutter_rust_bridge::frb(sync)]
pub fn debug_toggle_breakpoint(line: u32) -> bool {
    with_runtime(|runtime| runtime.sedit.debugger().toggle_breakpoint(line as usize))
        .unwrap_or(false)
}

#[flutter_rust_bridge::frb(sync)]
pub fn debug_breakpoints() -> Vec<u32> {
    with_runtime(|runtime| {
        runtime
            .sedit
            .debugger()
            .breakpoints()
            .into_iter()
            .map(to_u32)
            .collect()
    })
    .unwrap_or_default()
}

/// Last lines of the active log file for the diagnostics panel.
///
/// # FFI contract
/// - Returns empty when logging was never initialized.
/// - `limit` defaults to 200 and is capped at 2000.
#[flutter_rust_bridge::frb(sync)]
pub fn log_tail(limit: Option<u32>) -> Vec<String> {
    let Some((_, log_dir)) = logging_status() else {
        return Vec::new();
    };
    read_log_tail(&log_dir, normalize_tail_limit(limit) as usize)
}

/// Empties the active log file, as the log viewer's Clear button.
///
/// # FFI contract
/// - `ok=false` when logging was never initialized or truncation failed.
#[flutter_rust_bridge::frb(sync)]
pub fn log_clear() -> ActionResponse {
    let Some((_, log_dir)) = logging_status() else {
        return ActionResponse::failure("log_clear failed: logging not initialized");
    };
    match clear_log(&log_dir) {
        Ok(true) => ActionResponse::success("Log cleared."),
        Ok(false) => ActionResponse::success("No log file to clear."),
        Err(err) => {
            warn!("event=ffi_log_clear module=ffi status=error error={err}");
            ActionResponse::failure(format!("log_clear failed: {err}"))
        }
    }
}

fn with_runtime<T>(f: impl FnOnce(&EditorRuntime) -> T) -> Option<T> {
    let runtime = RUNTIME.lock();
    runtime.as_ref().map(f)
}

fn not_running(operation: &str) -> ActionResponse {
    ActionResponse::failure(format!("{operation} failed: editor not running"))
}

fn normalize_tail_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => LOG_TAIL_DEFAULT_LIMIT,
        Some(value) => value.min(LOG_TAIL_LIMIT_MAX),
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn to_menu_row(index: usize, entry: &MenuEntry) -> MenuRow {
    let (kind, checked) = match entry {
        MenuEntry::Command(_) => ("command", None),
        MenuEntry::Toggle { enabled, .. } => ("toggle", Some(*enabled)),
        MenuEntry::Aux { .. } => ("aux", None),
        MenuEntry::Item { .. } => ("item", None),
    };
    MenuRow {
        index: to_u32(index),
        kind: kind.to_string(),
        label: entry.display_label(),
        checked,
    }
}

fn status_label(status: &sedit_core::SessionStatus) -> &'static str {
    use sedit_core::SessionStatus;
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Running => "running",
        SessionStatus::Stopped { .. } => "stopped",
        SessionStatus::Finished => "finished",
        SessionStatus::Exited => "exited",
        SessionStatus::Errored(_) => "errored",
    }
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, debug_action, debug_breakpoints, debug_start, debug_toggle_breakpoint,
        editor_open_file, editor_set_text, editor_shutdown, editor_start, editor_tick,
        extensions_activate, extensions_list, extensions_menu, extensions_set_enabled,
        init_logging, log_clear, log_tail, normalize_tail_limit, ping,
    };
    use std::time::{Duration, Instant};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    // Only test that starts the process logger.
    #[test]
    fn log_clear_empties_the_viewer_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().to_string_lossy().into_owned();
        assert_eq!(init_logging("info".to_string(), log_dir), "");
        log::info!("event=viewer_marker module=ffi status=ok");
        let marked = |lines: &[String]| lines.iter().any(|line| line.contains("viewer_marker"));
        assert!(marked(&log_tail(None)));

        assert!(log_clear().ok);
        assert!(!marked(&log_tail(None)));
    }

    #[test]
    fn tail_limit_is_normalized() {
        assert_eq!(normalize_tail_limit(None), 200);
        assert_eq!(normalize_tail_limit(Some(0)), 200);
        assert_eq!(normalize_tail_limit(Some(5_000)), 2_000);
        assert_eq!(normalize_tail_limit(Some(7)), 7);
    }

    #[test]
    fn unknown_directive_is_rejected() {
        assert!(!debug_action("jump".to_string()));
    }

    // The runtime is process-global, so the whole flow lives in one test.
    #[test]
    fn editor_flow_over_ffi() {
        let dir = tempfile::tempdir().expect("tempdir");
        let extensions = dir.path().join("extensions");
        std::fs::create_dir_all(&extensions).expect("create extensions dir");
        std::fs::write(
            extensions.join("greeter.sed"),
            concat!(
                "fn setup()\n  add_menu_item(\"Say Hi\", \"hi\")\nend\n",
                "fn hi()\n  set_text(\"Hi!\")\nend\n",
            ),
        )
        .expect("write extension");
        let document = dir.path().join("doc.sed");
        std::fs::write(&document, "print 1\nprint 2\n").expect("write document");

        assert!(editor_tick().is_none());
        let root = dir.path().to_string_lossy().into_owned();
        assert!(editor_start(Some(root.clone())).ok);
        assert!(editor_start(Some(root)).ok);

        let listed = extensions_list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, "loaded");
        assert!(extensions_set_enabled("greeter".to_string(), true).ok);
        let menu = extensions_menu();
        let row = menu
            .iter()
            .find(|row| row.kind == "item")
            .expect("extension menu item");
        assert_eq!(row.label, "    Say Hi");
        assert!(extensions_activate(row.index));
        assert_eq!(editor_tick().expect("running").text, "Hi!");

        assert!(editor_open_file(document.to_string_lossy().into_owned()).ok);
        assert!(debug_toggle_breakpoint(2));
        assert_eq!(debug_breakpoints(), vec![2]);
        assert!(debug_start().ok);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut output = Vec::new();
        loop {
            assert!(Instant::now() < deadline, "debug session did not finish");
            let tick = editor_tick().expect("running");
            output.extend(tick.output);
            match tick.debug_status.as_str() {
                "stopped" => {
                    debug_action("continue".to_string());
                }
                "finished" => break,
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert!(output.iter().any(|line| line.ends_with("doc.sed:2")));
        assert!(output.contains(&"Finished".to_string()));

        assert!(editor_set_text("edited".to_string()));
        assert!(editor_shutdown().ok);
        assert!(!editor_shutdown().ok);
    }
}

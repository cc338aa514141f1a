//! Process log: core diagnostics plus the lines extensions write.
//!
//! # Responsibility
//! - Start one append-only, size-rotated log file per process.
//! - Render each record as `[timestamp] [LEVEL] message`.
//! - Capture panics as one-line `event=panic_captured` records.
//! - Serve the tail of the active file to log viewers and clear it on
//!   request.
//!
//! # Invariants
//! - A second start with the same level and directory is a no-op; any other
//!   combination is refused and the running logger is kept.
//! - Nothing in here panics; failures are returned as text.

use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter, Record};
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_FILE_BASENAME: &str = "sedit_extensions";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 5;
const PANIC_TEXT_LIMIT: usize = 160;

/// Log target used for lines written on behalf of extensions.
pub const EXTENSION_LOG_TARGET: &str = "sedit::extension";

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Validated `init_logging` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    level: &'static str,
    dir: PathBuf,
}

struct ActiveLogger {
    target: LogTarget,
    _handle: LoggerHandle,
}

impl LogTarget {
    fn parse(level: &str, dir: &str) -> Result<Self, String> {
        Ok(Self {
            level: parse_level(level)?,
            dir: parse_dir(dir)?,
        })
    }

    /// Reason the running logger cannot serve `requested`, if any.
    fn mismatch(&self, requested: &LogTarget) -> Option<String> {
        if self.dir != requested.dir {
            return Some(format!(
                "logging already writes to `{}`; refusing to switch to `{}`",
                self.dir.display(),
                requested.dir.display()
            ));
        }
        if self.level != requested.level {
            return Some(format!(
                "logging already runs at `{}`; refusing to switch to `{}`",
                self.level, requested.level
            ));
        }
        None
    }

    fn start(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            format!("cannot create log directory `{}`: {err}", self.dir.display())
        })?;
        let files = FileSpec::default()
            .directory(self.dir.as_path())
            .basename(LOG_FILE_BASENAME);
        Logger::try_with_str(self.level)
            .map_err(|err| format!("invalid log level `{}`: {err}", self.level))?
            .log_to_file(files)
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
            )
            .append()
            .write_mode(WriteMode::Direct)
            .format_for_files(write_line)
            .start()
            .map_err(|err| format!("cannot start logger: {err}"))
    }
}

/// Starts the process log at `level` under `log_dir`.
///
/// # Errors
/// - `level` is not one of trace|debug|info|warn|error.
/// - `log_dir` is empty, relative, or cannot be created.
/// - A logger is already running with a different level or directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogTarget::parse(level, log_dir)?;
    let active = ACTIVE.get_or_try_init(|| -> Result<ActiveLogger, String> {
        let handle = requested.start()?;
        install_panic_hook();
        info!(
            "event=logging_start module=logging status=ok level={} dir={} os={} version={}",
            requested.level,
            requested.dir.display(),
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION")
        );
        Ok(ActiveLogger {
            target: requested.clone(),
            _handle: handle,
        })
    })?;
    match active.target.mismatch(&requested) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.target.level, active.target.dir.clone()))
}

pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// `$XDG_DATA_HOME/sedit`, falling back to the temp dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sedit")
}

/// Returns the last `limit` lines of the newest log file in `log_dir`.
///
/// Missing directories or files yield an empty list.
pub fn read_log_tail(log_dir: &Path, limit: usize) -> Vec<String> {
    let Some(path) = newest_log_file(log_dir) else {
        return Vec::new();
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].iter().map(|line| line.to_string()).collect()
}

/// Truncates the newest log file in `log_dir`; returns whether one existed.
///
/// A running logger keeps appending to the same, now empty, file.
pub fn clear_log(log_dir: &Path) -> Result<bool, String> {
    let Some(path) = newest_log_file(log_dir) else {
        return Ok(false);
    };
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|err| format!("cannot clear log `{}`: {err}", path.display()))?;
    info!(
        "event=log_clear module=logging status=ok file={}",
        path.display()
    );
    Ok(true)
}

fn newest_log_file(log_dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(log_dir)
        .ok()?
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_BASENAME)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// `[2026-01-02T03:04:05.123456] [INFO] message`
fn write_line(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "[{}] [{}] {}",
        now.format(TIMESTAMP_FORMAT),
        record.level(),
        record.args()
    )
}

fn parse_level(level: &str) -> Result<&'static str, String> {
    let lowered = level.trim().to_ascii_lowercase();
    let alias = if lowered == "warning" { "warn" } else { lowered.as_str() };
    match LevelFilter::from_str(alias) {
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{}`; expected trace|debug|info|warn|error",
            level.trim()
        )),
        Ok(LevelFilter::Error) => Ok("error"),
        Ok(LevelFilter::Warn) => Ok("warn"),
        Ok(LevelFilter::Info) => Ok("info"),
        Ok(LevelFilter::Debug) => Ok("debug"),
        Ok(LevelFilter::Trace) => Ok("trace"),
    }
}

fn parse_dir(dir: &str) -> Result<PathBuf, String> {
    let dir = Path::new(dir.trim());
    if dir.as_os_str().is_empty() {
        return Err("log directory is empty".to_string());
    }
    if !dir.is_absolute() {
        return Err(format!(
            "log directory must be absolute, got `{}`",
            dir.display()
        ));
    }
    Ok(dir.to_path_buf())
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic| {
            let location = panic
                .location()
                .map_or_else(|| "unknown".to_string(), |at| format!("{}:{}", at.file(), at.line()));
            error!(
                "event=panic_captured module=logging status=error location={} payload={}",
                location,
                one_line(&panic_message(panic.payload()), PANIC_TEXT_LIMIT)
            );
            previous(panic);
        }));
    });
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Joins lines and caps the result at `limit` chars (plus `...`).
fn one_line(text: &str, limit: usize) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut capped: String = flat.chars().take(limit).collect();
    capped.push_str("...");
    capped
}

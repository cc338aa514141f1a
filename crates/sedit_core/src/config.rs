//! Startup configuration.
//!
//! # Responsibility
//! - Resolve where extensions, settings and logs live.
//! - Carry the debugger poll cadence used by interactive hosts.

use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR_NAME: &str = "sedit";
const EXTENSIONS_DIR_NAME: &str = "extensions";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Interval at which hosts drain the debugger status queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeditConfig {
    pub extensions_dir: PathBuf,
    pub settings_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub poll_interval: Duration,
}

impl Default for SeditConfig {
    /// `$XDG_CONFIG_HOME/sedit/{extensions,settings.json}` and
    /// `$XDG_DATA_HOME/sedit` for logs.
    fn default() -> Self {
        let config_root = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);
        Self {
            extensions_dir: config_root.join(EXTENSIONS_DIR_NAME),
            settings_path: config_root.join(SETTINGS_FILE_NAME),
            log_dir: crate::logging::default_log_dir(),
            log_level: crate::logging::default_log_level().to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SeditConfig {
    /// Portable layout with every path under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            extensions_dir: root.join(EXTENSIONS_DIR_NAME),
            settings_path: root.join(SETTINGS_FILE_NAME),
            log_dir: root.join("logs"),
            ..Self::default()
        }
    }

    pub fn with_extensions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extensions_dir = dir.into();
        self
    }

    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{SeditConfig, DEFAULT_POLL_INTERVAL};
    use std::path::Path;

    #[test]
    fn rooted_layout_keeps_everything_under_root() {
        let config = SeditConfig::rooted_at(Path::new("/opt/sedit"));
        assert_eq!(config.extensions_dir, Path::new("/opt/sedit/extensions"));
        assert_eq!(config.settings_path, Path::new("/opt/sedit/settings.json"));
        assert_eq!(config.log_dir, Path::new("/opt/sedit/logs"));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn default_paths_are_namespaced() {
        let config = SeditConfig::default();
        assert!(config.extensions_dir.ends_with("sedit/extensions"));
        assert!(config.settings_path.ends_with("sedit/settings.json"));
    }
}

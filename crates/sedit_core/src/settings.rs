//! Flat key-value settings document.
//!
//! # Responsibility
//! - Hold the process-wide settings map and persist it as pretty JSON.
//! - Provide typed accessors for the keys the core owns
//!   (`enabled_extensions`, `extensions`, `recent_files`, `last_file`).
//!
//! # Invariants
//! - Every mutation is persisted immediately; persistence failures are
//!   logged and swallowed so callers never fail on I/O.
//! - Read-modify-write and the file write happen under one lock, so the
//!   file always holds the latest document even with concurrent writers.
//! - A missing or corrupt settings file loads as an empty document.

use log::{info, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const KEY_ENABLED_EXTENSIONS: &str = "enabled_extensions";
pub const KEY_EXTENSIONS: &str = "extensions";
pub const KEY_RECENT_FILES: &str = "recent_files";
pub const KEY_LAST_FILE: &str = "last_file";

/// Recent-file list is capped at this many entries.
pub const MAX_RECENT_FILES: usize = 20;

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "settings io error: {err}"),
            Self::Json(err) => write!(f, "settings encode error: {err}"),
        }
    }
}

impl Error for SettingsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Process-wide settings map.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Loads settings from `path`; the file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_document(&path);
        info!(
            "event=settings_open module=settings status=ok keys={} path={}",
            values.len(),
            path.display()
        );
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// Settings that are never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Sets one key and persists.
    pub fn set(&self, key: &str, value: Value) {
        self.mutate(|values| {
            values.insert(key.to_string(), value);
            true
        });
    }

    /// Merges `update` into the document and persists.
    pub fn update(&self, update: Map<String, Value>) {
        self.mutate(|values| {
            values.extend(update);
            true
        });
    }

    /// Applies `change` and persists when it reports a modification.
    fn mutate(&self, change: impl FnOnce(&mut Map<String, Value>) -> bool) {
        let mut values = self.values.lock();
        if !change(&mut *values) {
            return;
        }
        if let Err(err) = self.write(&values) {
            warn!("event=settings_write module=settings status=error error={err}");
        }
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.lock().clone()
    }

    /// Writes the current document; unlike `set`, reports failures.
    pub fn flush(&self) -> Result<(), SettingsError> {
        let values = self.values.lock();
        self.write(&values)
    }

    fn write(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(values)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Names persisted as enabled, in enable order.
    pub fn enabled_extensions(&self) -> Vec<String> {
        string_list(self.get(KEY_ENABLED_EXTENSIONS))
    }

    /// Adds or removes `name` from the persisted enabled set.
    pub fn set_extension_enabled(&self, name: &str, enabled: bool) {
        self.mutate(|values| {
            let mut current = string_list(values.get(KEY_ENABLED_EXTENSIONS).cloned());
            let present = current.iter().any(|n| n == name);
            match (enabled, present) {
                (true, false) => current.push(name.to_string()),
                (false, true) => current.retain(|n| n != name),
                _ => return false,
            }
            values.insert(KEY_ENABLED_EXTENSIONS.to_string(), string_array(current));
            true
        });
    }

    /// Sub-document owned by one extension; empty object when unset.
    pub fn extension_settings(&self, name: &str) -> Value {
        self.get(KEY_EXTENSIONS)
            .and_then(|all| all.get(name).cloned())
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn set_extension_settings(&self, name: &str, value: Value) {
        self.mutate(|values| {
            let slot = values
                .entry(KEY_EXTENSIONS)
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(all) = slot {
                all.insert(name.to_string(), value);
            }
            true
        });
    }

    pub fn recent_files(&self) -> Vec<String> {
        string_list(self.get(KEY_RECENT_FILES))
    }

    /// Records `path` as last opened file and moves it to the front of the
    /// recent list.
    pub fn push_recent_file(&self, path: &str) {
        self.mutate(|values| {
            let mut recent = string_list(values.get(KEY_RECENT_FILES).cloned());
            recent.retain(|p| p != path);
            recent.insert(0, path.to_string());
            recent.truncate(MAX_RECENT_FILES);
            values.insert(KEY_LAST_FILE.to_string(), Value::String(path.to_string()));
            values.insert(KEY_RECENT_FILES.to_string(), string_array(recent));
            true
        });
    }
}

fn string_array(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn read_document(path: &Path) -> Map<String, Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(err) => {
            warn!(
                "event=settings_read module=settings status=error path={} error={err}",
                path.display()
            );
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(
                "event=settings_read module=settings status=corrupt path={}",
                path.display()
            );
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SettingsStore, MAX_RECENT_FILES};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn persists_immediately_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::open(&path);
        store.set("font_size", json!(14));
        store.set_extension_enabled("greeter", true);
        let mut batch = serde_json::Map::new();
        batch.insert("theme".to_string(), json!("dark"));
        batch.insert("font_size".to_string(), json!(16));
        store.update(batch);

        let reopened = SettingsStore::open(&path);
        assert_eq!(reopened.get("font_size"), Some(json!(16)));
        assert_eq!(reopened.get("theme"), Some(json!("dark")));
        assert_eq!(reopened.enabled_extensions(), vec!["greeter".to_string()]);
    }

    #[test]
    fn corrupt_file_loads_as_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").expect("write corrupt file");
        let store = SettingsStore::open(&path);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn enabled_set_has_no_duplicates_and_keeps_order() {
        let store = SettingsStore::in_memory();
        store.set_extension_enabled("b", true);
        store.set_extension_enabled("a", true);
        store.set_extension_enabled("b", true);
        assert_eq!(store.enabled_extensions(), vec!["b", "a"]);
        store.set_extension_enabled("b", false);
        assert_eq!(store.enabled_extensions(), vec!["a"]);
    }

    #[test]
    fn extension_settings_are_namespaced() {
        let store = SettingsStore::in_memory();
        assert_eq!(store.extension_settings("x"), json!({}));
        store.set_extension_settings("x", json!({"greeting": "hi"}));
        store.set_extension_settings("y", json!({"greeting": "yo"}));
        assert_eq!(store.extension_settings("x"), json!({"greeting": "hi"}));
        assert_eq!(
            store.get("extensions"),
            Some(json!({"x": {"greeting": "hi"}, "y": {"greeting": "yo"}}))
        );
    }

    #[test]
    fn recent_files_are_deduplicated_and_capped() {
        let store = SettingsStore::in_memory();
        for i in 0..(MAX_RECENT_FILES + 5) {
            store.push_recent_file(&format!("/tmp/{i}.sed"));
        }
        store.push_recent_file("/tmp/3.sed");
        let recent = store.recent_files();
        assert_eq!(recent.len(), MAX_RECENT_FILES);
        assert_eq!(recent[0], "/tmp/3.sed");
        assert_eq!(recent.iter().filter(|p| *p == "/tmp/3.sed").count(), 1);
        assert_eq!(store.get("last_file"), Some(json!("/tmp/3.sed")));
    }

    #[test]
    fn concurrent_writers_lose_no_updates_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let store = Arc::new(SettingsStore::open(&path));
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let name = format!("ext{worker}_{i}");
                        store.set_extension_enabled(&name, true);
                        store.set_extension_settings(&name, json!({ "n": i }));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("writer thread");
        }

        let reopened = SettingsStore::open(&path);
        assert_eq!(reopened.enabled_extensions().len(), 80);
        assert_eq!(reopened.extension_settings("ext7_9"), json!({ "n": 9 }));
        assert_eq!(reopened.snapshot(), store.snapshot());
    }
}

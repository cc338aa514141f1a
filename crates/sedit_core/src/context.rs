//! Process-scoped editor context.
//!
//! # Responsibility
//! - Own the host handle, the event bus and the settings store.
//! - Implement the document operations (open/save/replace text) shared by
//!   the extension facade and the shells.
//!
//! # Invariants
//! - A successful open or save publishes exactly one event after the buffer
//!   or file has been updated.
//! - A failed open leaves the buffer and current path untouched.

use crate::events::{EventBus, EVENT_FILE_OPENED, EVENT_FILE_SAVED, EVENT_TEXT_CHANGED};
use crate::host::EditorHost;
use crate::settings::SettingsStore;
use log::info;
use parking_lot::Mutex;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct EditorContext {
    host: Arc<dyn EditorHost>,
    events: EventBus,
    settings: SettingsStore,
    current_path: Mutex<Option<PathBuf>>,
}

impl EditorContext {
    pub fn new(host: Arc<dyn EditorHost>, settings: SettingsStore) -> Arc<Self> {
        Arc::new(Self {
            events: EventBus::new(Arc::clone(&host)),
            host,
            settings,
            current_path: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &Arc<dyn EditorHost> {
        &self.host
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Path of the document shown in the buffer, if it has one.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_path.lock().clone()
    }

    /// Loads `path` into the buffer and publishes `file_opened`.
    pub fn open_file(&self, path: &Path) -> io::Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.host.set_buffer_text(&content);
        *self.current_path.lock() = Some(path.to_path_buf());
        let display = path.to_string_lossy().into_owned();
        self.settings.push_recent_file(&display);
        info!(
            "event=file_open module=context status=ok bytes={}",
            content.len()
        );
        self.events
            .publish(EVENT_FILE_OPENED, vec![Value::String(display)]);
        Ok(())
    }

    /// Writes the buffer to `path`, the current path, or a path chosen in the
    /// host save dialog, in that order.
    ///
    /// Returns `Ok(None)` when the dialog was cancelled.
    pub fn save_file(&self, path: Option<&Path>) -> io::Result<Option<PathBuf>> {
        let target = match path.map(Path::to_path_buf).or_else(|| self.current_path()) {
            Some(target) => target,
            None => match self.host.save_file_dialog() {
                Some(chosen) => chosen,
                None => return Ok(None),
            },
        };
        let content = self.host.buffer_text();
        std::fs::write(&target, &content)?;
        *self.current_path.lock() = Some(target.clone());
        info!(
            "event=file_save module=context status=ok bytes={}",
            content.len()
        );
        self.events.publish(
            EVENT_FILE_SAVED,
            vec![Value::String(target.to_string_lossy().into_owned())],
        );
        Ok(Some(target))
    }

    /// Replaces the buffer and publishes `text_changed`.
    pub fn set_text(&self, text: &str) {
        self.host.set_buffer_text(text);
        self.events
            .publish(EVENT_TEXT_CHANGED, vec![Value::String(text.to_string())]);
    }

    pub fn text(&self) -> String {
        self.host.buffer_text()
    }
}

#[cfg(test)]
mod tests {
    use super::EditorContext;
    use crate::events::{EVENT_FILE_OPENED, EVENT_FILE_SAVED};
    use crate::host::{EditorHost, HeadlessHost};
    use crate::settings::SettingsStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn context(text: &str) -> (Arc<HeadlessHost>, Arc<EditorContext>) {
        let host = Arc::new(HeadlessHost::with_text(text));
        let context = EditorContext::new(host.clone(), SettingsStore::in_memory());
        (host, context)
    }

    #[test]
    fn open_file_fills_buffer_records_recent_and_publishes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hello.sed");
        std::fs::write(&path, "print 1\n").expect("write fixture");
        let (host, context) = context("");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        context.events().subscribe(
            EVENT_FILE_OPENED,
            Arc::new(move |args| {
                sink.lock().extend(args.iter().cloned());
                Ok(())
            }),
            None,
            false,
        );

        context.open_file(&path).expect("open should succeed");
        host.run_pending();

        let shown = path.to_string_lossy().into_owned();
        assert_eq!(host.buffer_text(), "print 1\n");
        assert_eq!(context.current_path().as_deref(), Some(path.as_path()));
        assert_eq!(context.settings().recent_files(), vec![shown.clone()]);
        assert_eq!(*seen.lock(), vec![json!(shown)]);
    }

    #[test]
    fn failed_open_leaves_state_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, context) = context("keep me");
        assert!(context.open_file(&dir.path().join("missing.sed")).is_err());
        assert_eq!(host.buffer_text(), "keep me");
        assert!(context.current_path().is_none());
        assert_eq!(host.queue().pending(), 0);
    }

    #[test]
    fn save_without_path_falls_back_to_dialog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("out.sed");
        let (host, context) = context("let x = 1");
        context
            .events()
            .subscribe(EVENT_FILE_SAVED, Arc::new(|_| Ok(())), None, false);

        assert_eq!(context.save_file(None).expect("cancelled save"), None);

        host.answer_save_dialog(Some(target.clone()));
        let saved = context.save_file(None).expect("save should succeed");
        assert_eq!(saved.as_deref(), Some(target.as_path()));
        assert_eq!(
            std::fs::read_to_string(&target).expect("read back"),
            "let x = 1"
        );
        assert_eq!(host.queue().pending(), 1);

        // Current path is reused without asking again.
        host.set_buffer_text("let x = 2");
        context.save_file(None).expect("second save");
        assert_eq!(
            std::fs::read_to_string(&target).expect("read back"),
            "let x = 2"
        );
    }
}

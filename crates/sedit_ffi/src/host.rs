//! Editor host backed by state the Flutter shell pulls on each tick.
//!
//! # Invariants
//! - Output lines are handed out exactly once, in append order.
//! - Owner-thread jobs only run from `tick`, i.e. on the UI isolate's call.

use parking_lot::Mutex;
use sedit_core::host::{OwnerJob, OwnerQueue};
use sedit_core::EditorHost;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub(crate) struct UiHost {
    buffer: Mutex<String>,
    revision: Mutex<u64>,
    highlighted: Mutex<Option<usize>>,
    output: Mutex<Vec<String>>,
    queue: OwnerQueue,
}

/// State drained by one tick.
pub(crate) struct TickState {
    pub text: String,
    pub revision: u64,
    pub highlighted: Option<usize>,
    pub output: Vec<String>,
    pub jobs_run: usize,
}

impl UiHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs queued owner jobs, then hands out the buffer and new output.
    pub(crate) fn tick(&self) -> TickState {
        let jobs_run = self.queue.run_pending();
        TickState {
            text: self.buffer.lock().clone(),
            revision: *self.revision.lock(),
            highlighted: *self.highlighted.lock(),
            output: std::mem::take(&mut *self.output.lock()),
            jobs_run,
        }
    }
}

impl EditorHost for UiHost {
    fn buffer_text(&self) -> String {
        self.buffer.lock().clone()
    }

    fn set_buffer_text(&self, text: &str) {
        *self.buffer.lock() = text.to_string();
        *self.revision.lock() += 1;
    }

    fn highlight_line(&self, line: usize) {
        *self.highlighted.lock() = Some(line);
    }

    fn schedule_on_owner_thread(&self, job: OwnerJob) {
        self.queue.schedule(job);
    }

    // Dialogs are shown by the shell, which passes chosen paths in directly.
    fn open_file_dialog(&self) -> Option<PathBuf> {
        None
    }

    fn save_file_dialog(&self) -> Option<PathBuf> {
        None
    }

    fn append_log_line(&self, text: &str) {
        self.output.lock().push(text.to_string());
    }
}

//! Host collaborator contracts.
//!
//! # Responsibility
//! - Describe what the core needs from the editor shell (buffer, dialogs,
//!   owner-thread scheduling, log pane).
//! - Provide an owner-thread run queue and a headless host for CLI/tests.
//!
//! # Invariants
//! - Work scheduled via `schedule_on_owner_thread` runs on the owner thread,
//!   in scheduling order.
//! - The core never mutates host state from a worker thread directly.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Unit of work marshaled onto the owner thread.
pub type OwnerJob = Box<dyn FnOnce() + Send + 'static>;

/// Editor shell operations consumed by the core.
pub trait EditorHost: Send + Sync {
    /// Full text of the active buffer.
    fn buffer_text(&self) -> String;

    /// Replaces the active buffer content.
    fn set_buffer_text(&self, text: &str);

    /// Marks `line` (1-based) as the current debugger line.
    fn highlight_line(&self, line: usize);

    /// Queues `job` for the owner thread's next idle tick.
    fn schedule_on_owner_thread(&self, job: OwnerJob);

    fn open_file_dialog(&self) -> Option<PathBuf>;

    fn save_file_dialog(&self) -> Option<PathBuf>;

    /// Appends one line to the user-visible output pane.
    fn append_log_line(&self, text: &str);

    /// Opens a folder or document with the desktop handler.
    fn open_path(&self, path: &Path) -> bool {
        warn!(
            "event=open_path module=host status=unsupported path={}",
            path.display()
        );
        false
    }
}

/// FIFO run queue drained by the owner thread.
#[derive(Debug, Clone)]
pub struct OwnerQueue {
    tx: Sender<OwnerJob>,
    rx: Receiver<OwnerJob>,
}

impl Default for OwnerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueues a job; callable from any thread.
    pub fn schedule(&self, job: OwnerJob) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(job);
    }

    /// Runs every job queued so far on the calling thread.
    ///
    /// Jobs queued while draining run in the same call.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl std::fmt::Debug for dyn EditorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EditorHost")
    }
}

/// In-process host with a string buffer and scripted dialogs.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    buffer: Mutex<String>,
    highlighted: Mutex<Option<usize>>,
    log_lines: Mutex<Vec<String>>,
    open_answer: Mutex<Option<PathBuf>>,
    save_answer: Mutex<Option<PathBuf>>,
    queue: OwnerQueue,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let host = Self::default();
        *host.buffer.lock() = text.to_string();
        host
    }

    pub fn queue(&self) -> &OwnerQueue {
        &self.queue
    }

    /// Runs queued owner-thread jobs; call from the owner thread.
    pub fn run_pending(&self) -> usize {
        self.queue.run_pending()
    }

    pub fn highlighted_line(&self) -> Option<usize> {
        *self.highlighted.lock()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log_lines.lock().clone()
    }

    /// Sets the answer of the next save dialog.
    pub fn answer_save_dialog(&self, path: Option<PathBuf>) {
        *self.save_answer.lock() = path;
    }

    /// Sets the answer of the next open dialog.
    pub fn answer_open_dialog(&self, path: Option<PathBuf>) {
        *self.open_answer.lock() = path;
    }
}

impl EditorHost for HeadlessHost {
    fn buffer_text(&self) -> String {
        self.buffer.lock().clone()
    }

    fn set_buffer_text(&self, text: &str) {
        *self.buffer.lock() = text.to_string();
    }

    fn highlight_line(&self, line: usize) {
        *self.highlighted.lock() = Some(line);
    }

    fn schedule_on_owner_thread(&self, job: OwnerJob) {
        self.queue.schedule(job);
    }

    fn open_file_dialog(&self) -> Option<PathBuf> {
        self.open_answer.lock().take()
    }

    fn save_file_dialog(&self) -> Option<PathBuf> {
        self.save_answer.lock().take()
    }

    fn append_log_line(&self, text: &str) {
        self.log_lines.lock().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::{EditorHost, HeadlessHost, OwnerQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn owner_queue_runs_jobs_in_order_including_nested_ones() {
        let queue = OwnerQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            let nested_queue = queue.clone();
            queue.schedule(Box::new(move || {
                order.lock().push(i);
                if i == 0 {
                    let order = Arc::clone(&order);
                    nested_queue.schedule(Box::new(move || order.lock().push(99)));
                }
            }));
        }
        assert_eq!(queue.run_pending(), 4);
        assert_eq!(*order.lock(), vec![0, 1, 2, 99]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn headless_host_defers_scheduled_work_until_drained() {
        let host = HeadlessHost::with_text("abc");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        host.schedule_on_owner_thread(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        host.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(host.buffer_text(), "abc");
    }
}

//! Debug session controller (owner-thread side).
//!
//! # Responsibility
//! - Start one worker per session and track the status it reports.
//! - Forward directives to a stopped worker through the resume gate.
//! - Render status messages into the host without blocking.
//!
//! # Invariants
//! - At most one live session; a session stays live until its terminal
//!   message has been drained by `poll` or `wait_message`.
//! - Breakpoints belong to the controller and apply to every session it
//!   starts, including the one currently running.

use super::gate::ResumeGate;
use super::tracer::StepTracer;
use super::{DebugError, DebugMessage, Directive, SessionId, SessionStatus};
use crate::host::EditorHost;
use crate::logging::panic_message;
use crate::script::{compile, ExecError, HostBindings, Interpreter, Scope};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;

struct LiveSession {
    id: SessionId,
    gate: Arc<ResumeGate>,
    messages: Receiver<DebugMessage>,
}

struct ControllerState {
    session: Option<LiveSession>,
    status: SessionStatus,
    last_session: Option<SessionId>,
}

pub struct DebugSessionController {
    breakpoints: Arc<Mutex<BTreeSet<usize>>>,
    state: Mutex<ControllerState>,
}

impl Default for DebugSessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DebugSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSessionController")
            .field("status", &self.status())
            .field("breakpoints", &self.breakpoints())
            .finish()
    }
}

impl DebugSessionController {
    pub fn new() -> Self {
        Self {
            breakpoints: Arc::new(Mutex::new(BTreeSet::new())),
            state: Mutex::new(ControllerState {
                session: None,
                status: SessionStatus::Idle,
                last_session: None,
            }),
        }
    }

    /// Spawns a worker that compiles `source` as `filename` and runs it,
    /// stopping on its first line.
    ///
    /// # Errors
    /// - `SessionActive` while the previous session's terminal message has
    ///   not been drained.
    /// - `Spawn` when the worker thread cannot be created.
    pub fn start(&self, source: &str, filename: &str) -> Result<SessionId, DebugError> {
        let mut state = self.state.lock();
        if let Some(live) = state.session.as_ref() {
            return Err(DebugError::SessionActive(live.id));
        }

        let id = Uuid::new_v4();
        let gate = Arc::new(ResumeGate::new());
        let (tx, rx) = unbounded();
        let tracer = StepTracer::new(Arc::clone(&gate), tx.clone(), Arc::clone(&self.breakpoints));
        let source = source.to_string();
        let filename = filename.to_string();
        thread::Builder::new()
            .name("sedit-debug".to_string())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || run_session(id, &source, &filename, tracer, tx))
            .map_err(|err| DebugError::Spawn(err.to_string()))?;

        info!("event=debug_start module=debug status=ok session={id}");
        state.session = Some(LiveSession {
            id,
            gate,
            messages: rx,
        });
        state.status = SessionStatus::Running;
        state.last_session = Some(id);
        Ok(id)
    }

    /// Resumes a stopped session. Returns false when no session is parked
    /// waiting for a directive; the directive is then dropped.
    pub fn set_action(&self, directive: Directive) -> bool {
        let mut state = self.state.lock();
        let Some(live) = state.session.as_ref() else {
            warn!(
                "event=debug_directive module=debug status=rejected directive={} reason=no_session",
                directive.as_str()
            );
            return false;
        };
        let accepted = live.gate.offer(directive);
        if accepted && matches!(state.status, SessionStatus::Stopped { .. }) {
            state.status = SessionStatus::Running;
        }
        accepted
    }

    /// Sends `quit` to a stopped session.
    pub fn stop(&self) -> bool {
        self.set_action(Directive::Quit)
    }

    /// Flips a breakpoint on `line`; returns whether it is now set.
    ///
    /// Breakpoints are keyed by line alone: a session debugs one file, the
    /// buffer's, so the file half of a `(file, line)` pair is always that
    /// session's file. Lines in other files are never traced.
    pub fn toggle_breakpoint(&self, line: usize) -> bool {
        let mut breakpoints = self.breakpoints.lock();
        if breakpoints.remove(&line) {
            false
        } else {
            breakpoints.insert(line);
            true
        }
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.breakpoints.lock().iter().copied().collect()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status.clone()
    }

    /// Id of the live or most recent session.
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().last_session
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Drains every queued message without blocking and renders each one
    /// into `host`: stops highlight their line, everything is logged.
    pub fn poll(&self, host: &dyn EditorHost) -> Vec<DebugMessage> {
        let Some(messages) = self.receiver() else {
            return Vec::new();
        };
        let drained: Vec<DebugMessage> = messages.try_iter().collect();
        for message in &drained {
            self.observe(message);
            render(host, message);
        }
        drained
    }

    /// Blocks up to `timeout` for the next message, for hosts without an
    /// event loop. Does not render.
    pub fn wait_message(&self, timeout: Duration) -> Option<DebugMessage> {
        let messages = self.receiver()?;
        match messages.recv_timeout(timeout) {
            Ok(message) => {
                self.observe(&message);
                Some(message)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("event=debug_wait module=debug status=disconnected");
                None
            }
        }
    }

    fn receiver(&self) -> Option<Receiver<DebugMessage>> {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|live| live.messages.clone())
    }

    fn observe(&self, message: &DebugMessage) {
        let mut state = self.state.lock();
        state.status = match message {
            DebugMessage::Stopped { file, line } => SessionStatus::Stopped {
                file: file.clone(),
                line: *line,
            },
            DebugMessage::Output(_) => return,
            DebugMessage::Error(trace) => SessionStatus::Errored(trace.clone()),
            DebugMessage::Finished => SessionStatus::Finished,
            DebugMessage::Exited => SessionStatus::Exited,
        };
        if message.is_terminal() {
            if let Some(live) = state.session.take() {
                info!(
                    "event=debug_end module=debug status=ok session={} outcome={}",
                    live.id,
                    match message {
                        DebugMessage::Error(_) => "errored",
                        DebugMessage::Exited => "exited",
                        _ => "finished",
                    }
                );
            }
        }
    }
}

impl Drop for DebugSessionController {
    fn drop(&mut self) {
        if let Some(live) = self.state.get_mut().session.take() {
            live.gate.close();
        }
    }
}

fn render(host: &dyn EditorHost, message: &DebugMessage) {
    if let DebugMessage::Stopped { line, .. } = message {
        host.highlight_line(*line);
    }
    host.append_log_line(&message.render());
}

/// Forwards program output to the owner as messages.
struct SessionBindings {
    messages: Sender<DebugMessage>,
}

impl HostBindings for SessionBindings {
    fn print(&self, text: &str) {
        let _ = self.messages.send(DebugMessage::Output(text.to_string()));
    }
}

fn run_session(
    id: SessionId,
    source: &str,
    filename: &str,
    mut tracer: StepTracer,
    messages: Sender<DebugMessage>,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let program = match compile(source, filename) {
            Ok(program) => program,
            Err(err) => return DebugMessage::Error(err.to_string()),
        };
        let bindings = SessionBindings {
            messages: messages.clone(),
        };
        let mut globals = Scope::new();
        let result = Interpreter::new(&program, &mut globals, &bindings)
            .with_tracer(&mut tracer)
            .run();
        match result {
            Ok(()) => DebugMessage::Finished,
            Err(ExecError::Halted) => DebugMessage::Exited,
            Err(ExecError::Raised(err)) => DebugMessage::Error(err.trace_text()),
        }
    }));
    let terminal = outcome.unwrap_or_else(|payload| {
        DebugMessage::Error(format!(
            "error: debugger crashed: {}",
            panic_message(payload.as_ref())
        ))
    });
    log::debug!(
        "event=debug_worker_exit module=debug status=ok session={id} terminal={}",
        terminal.render().lines().next().unwrap_or_default()
    );
    let _ = messages.send(terminal);
}

//! Stepping tracer driving a debug session.

use super::gate::ResumeGate;
use super::{DebugMessage, Directive};
use crate::script::{Halt, Tracer};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Where the next stop happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Step,
    /// Stop once the call depth is back at or above this frame.
    Next { depth: usize },
    Continue,
}

/// Tracer state machine: decides whether a line is a stop, and while stopped
/// parks on the gate until the owner picks the next mode.
pub(crate) struct StepTracer {
    gate: Arc<ResumeGate>,
    messages: Sender<DebugMessage>,
    breakpoints: Arc<Mutex<BTreeSet<usize>>>,
    mode: Mode,
}

impl StepTracer {
    /// Starts in step mode so the first line always stops.
    pub(crate) fn new(
        gate: Arc<ResumeGate>,
        messages: Sender<DebugMessage>,
        breakpoints: Arc<Mutex<BTreeSet<usize>>>,
    ) -> Self {
        Self {
            gate,
            messages,
            breakpoints,
            mode: Mode::Step,
        }
    }

    fn should_stop(&self, line: usize, depth: usize) -> bool {
        let by_mode = match self.mode {
            Mode::Step => true,
            Mode::Next { depth: frame } => depth <= frame,
            Mode::Continue => false,
        };
        by_mode || self.breakpoints.lock().contains(&line)
    }
}

impl Tracer for StepTracer {
    fn on_line(&mut self, file: &str, line: usize, depth: usize) -> Result<(), Halt> {
        if self.gate.is_closed() {
            return Err(Halt);
        }
        if !self.should_stop(line, depth) {
            return Ok(());
        }
        let messages = &self.messages;
        let directive = self.gate.park(|| {
            let _ = messages.send(DebugMessage::Stopped {
                file: file.to_string(),
                line,
            });
        });
        self.mode = match directive {
            Directive::Step => Mode::Step,
            Directive::Next => Mode::Next { depth },
            Directive::Continue => Mode::Continue,
            Directive::Quit => return Err(Halt),
        };
        Ok(())
    }
}

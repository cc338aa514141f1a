//! One-directive rendezvous between the owner and a stopped worker.

use super::Directive;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct GateState {
    parked: bool,
    closed: bool,
}

/// Binary wait/signal gate.
///
/// The worker parks and blocks; the owner offers exactly one directive per
/// park. Offers made while the worker is not parked are rejected, never
/// queued for a later stop.
#[derive(Debug)]
pub struct ResumeGate {
    state: Mutex<GateState>,
    tx: Sender<Directive>,
    rx: Receiver<Directive>,
}

impl Default for ResumeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumeGate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            state: Mutex::new(GateState::default()),
            tx,
            rx,
        }
    }

    /// Worker side: marks the gate parked, runs `on_parked`, then blocks until
    /// a directive arrives. A closed gate yields `Quit` immediately.
    ///
    /// `on_parked` runs while the gate is already parked, so an owner that
    /// reacts to it can offer right away.
    pub fn park(&self, on_parked: impl FnOnce()) -> Directive {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Directive::Quit;
            }
            state.parked = true;
            on_parked();
        }
        self.rx.recv().unwrap_or(Directive::Quit)
    }

    /// Owner side: delivers `directive` to the parked worker.
    ///
    /// Returns false, and drops the directive, when the worker is not parked
    /// or already has a directive pending.
    pub fn offer(&self, directive: Directive) -> bool {
        let mut state = self.state.lock();
        if state.closed || !state.parked {
            warn!(
                "event=debug_directive module=debug status=rejected directive={} reason=not_parked",
                directive.as_str()
            );
            return false;
        }
        if self.tx.try_send(directive).is_err() {
            warn!(
                "event=debug_directive module=debug status=rejected directive={} reason=pending",
                directive.as_str()
            );
            return false;
        }
        state.parked = false;
        true
    }

    /// Releases a parked worker with `Quit` and makes future parks return
    /// `Quit` at once.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if state.parked {
            state.parked = false;
            let _ = self.tx.try_send(Directive::Quit);
        }
    }

    pub fn is_parked(&self) -> bool {
        self.state.lock().parked
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

//! Interactive debug sessions.
//!
//! # Responsibility
//! - Run a script on a worker thread, stopping at source lines.
//! - Exchange status messages (worker to owner) and directives (owner to
//!   worker) without ever blocking the owner thread.
//!
//! # Invariants
//! - The worker never touches host state; it only sends `DebugMessage`s.
//! - While stopped, no line executes until one directive is delivered.
//! - Every session ends with exactly one of `Finished`, `Exited`, `Error`.

mod controller;
mod gate;
mod tracer;

pub use controller::DebugSessionController;
pub use gate::ResumeGate;

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identifies one debug session in logs.
pub type SessionId = Uuid;

/// Resume mode chosen by the owner for a stopped session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Stop at the next line, entering calls.
    Step,
    /// Stop at the next line in the current or a calling function.
    Next,
    /// Run until a breakpoint.
    Continue,
    Quit,
}

impl Directive {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Next => "next",
            Self::Continue => "continue",
            Self::Quit => "quit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "step" | "s" => Some(Self::Step),
            "next" | "n" => Some(Self::Next),
            "continue" | "c" => Some(Self::Continue),
            "quit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Session state as observed by the owner thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped { file: String, line: usize },
    Finished,
    Exited,
    Errored(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Exited | Self::Errored(_))
    }
}

/// Worker-to-owner status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugMessage {
    Stopped { file: String, line: usize },
    /// Text printed by the debugged program.
    Output(String),
    /// The program raised or failed to compile; carries the full trace.
    Error(String),
    Finished,
    /// Ended by a `quit` directive.
    Exited,
}

impl DebugMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Exited | Self::Error(_))
    }

    /// Line shown in the debugger output pane.
    pub fn render(&self) -> String {
        match self {
            Self::Stopped { file, line } => format!("Stopped at {file}:{line}"),
            Self::Output(text) => text.clone(),
            Self::Error(trace) => trace.clone(),
            Self::Finished => "Finished".to_string(),
            Self::Exited => "Debugger exited".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    /// A session is still live; its terminal message has not been observed.
    SessionActive(SessionId),
    Spawn(String),
}

impl Display for DebugError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionActive(id) => write!(f, "debug session already active: {id}"),
            Self::Spawn(message) => write!(f, "failed to start debug worker: {message}"),
        }
    }
}

impl Error for DebugError {}

#[cfg(test)]
mod tests {
    use super::{DebugMessage, Directive, SessionStatus};

    #[test]
    fn directives_parse_short_and_long_forms() {
        assert_eq!(Directive::parse("n"), Some(Directive::Next));
        assert_eq!(Directive::parse(" Continue "), Some(Directive::Continue));
        assert_eq!(Directive::parse("jump"), None);
        assert_eq!(Directive::Quit.as_str(), "quit");
    }

    #[test]
    fn terminal_states_are_classified() {
        assert!(SessionStatus::Errored("x".into()).is_terminal());
        assert!(!SessionStatus::Stopped {
            file: "f".into(),
            line: 1
        }
        .is_terminal());
        assert!(DebugMessage::Exited.is_terminal());
        assert!(!DebugMessage::Output("hi".into()).is_terminal());
        assert_eq!(
            DebugMessage::Stopped {
                file: "f".into(),
                line: 3
            }
            .render(),
            "Stopped at f:3"
        );
    }
}

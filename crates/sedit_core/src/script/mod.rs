//! sedit script runtime.
//!
//! # Responsibility
//! - Compile `.sed` sources into an executable program tree.
//! - Execute programs with optional per-line tracing for the debugger.
//! - Expose host bindings so extension modules can reach the editor.
//!
//! # Invariants
//! - Script failures are values (`SyntaxError`, `RuntimeError`), never panics.
//! - A tracer halt (`ExecError::Halted`) is distinct from a raised error.
//! - Every statement reports its source line to the tracer before it runs.

mod interp;
mod lexer;
mod parser;
mod value;

pub use interp::{Interpreter, Scope, MAX_CALL_DEPTH};
pub use parser::{compile, Function, Program, MAX_NESTING_DEPTH};
pub use value::Value;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Compile-time diagnostic with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(file: &str, line: usize, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: syntax error: {}", self.file, self.line, self.message)
    }
}

impl Error for SyntaxError {}

/// One call-stack entry captured when a runtime error is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub file: String,
    pub line: usize,
    pub function: String,
}

/// Error raised by a running script, with the stack at the raise point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    /// Outermost frame first.
    pub frames: Vec<TraceFrame>,
}

impl RuntimeError {
    /// Renders the full trace, innermost frame first.
    pub fn trace_text(&self) -> String {
        let mut out = format!("error: {}", self.message);
        for frame in self.frames.iter().rev() {
            out.push_str(&format!(
                "\n  at {} ({}:{})",
                frame.function, frame.file, frame.line
            ));
        }
        out
    }

    /// Innermost source line, when any frame was active.
    pub fn line(&self) -> Option<usize> {
        self.frames.last().map(|frame| frame.line)
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.frames.last() {
            Some(frame) => write!(f, "{}:{}: {}", frame.file, frame.line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for RuntimeError {}

/// Compile or runtime failure of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Syntax(SyntaxError),
    Runtime(RuntimeError),
}

impl ScriptError {
    pub fn trace_text(&self) -> String {
        match self {
            Self::Syntax(err) => err.to_string(),
            Self::Runtime(err) => err.trace_text(),
        }
    }
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(err) => write!(f, "{err}"),
            Self::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ScriptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Syntax(err) => Some(err),
            Self::Runtime(err) => Some(err),
        }
    }
}

impl From<SyntaxError> for ScriptError {
    fn from(value: SyntaxError) -> Self {
        Self::Syntax(value)
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(value: RuntimeError) -> Self {
        Self::Runtime(value)
    }
}

/// Marker returned by a tracer to stop the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt;

/// Why execution ended early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    Raised(RuntimeError),
    Halted,
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raised(err) => write!(f, "{err}"),
            Self::Halted => write!(f, "execution halted"),
        }
    }
}

impl Error for ExecError {}

/// Line-level execution hook.
pub trait Tracer {
    /// Called before the statement at `line` of `file` executes.
    ///
    /// `depth` is 1 for top-level code and grows by one per active call.
    fn on_line(&mut self, file: &str, line: usize, depth: usize) -> Result<(), Halt>;
}

/// Host functions visible to scripts.
pub trait HostBindings {
    /// Receives the text of every `print` statement.
    fn print(&self, text: &str);

    /// Resolves a host function call; `None` means the name is unknown.
    fn call(&self, _name: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        None
    }
}

/// Bindings that print to standard output and expose no host functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutBindings;

impl HostBindings for StdoutBindings {
    fn print(&self, text: &str) {
        println!("{text}");
    }
}

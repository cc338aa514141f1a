//! Tree-walking interpreter.

use super::parser::{BinaryOp, Expr, Function, Program, Stmt, StmtKind, UnaryOp};
use super::{ExecError, HostBindings, RuntimeError, TraceFrame, Tracer, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Variable bindings of one scope.
pub type Scope = HashMap<String, Value>;

/// Calls nested deeper than this raise instead of overflowing the stack.
pub const MAX_CALL_DEPTH: usize = 200;

const MAIN_FRAME: &str = "<main>";

enum Flow {
    Normal,
    Return(Value),
}

struct Frame {
    function: String,
    line: usize,
    /// `None` for top-level code, which binds into globals.
    locals: Option<Scope>,
}

/// Where top-level bindings live.
enum Globals<'a> {
    Exclusive(&'a mut Scope),
    /// Locked per access, so interpreters on other threads can share it.
    Shared(&'a Mutex<Scope>),
}

impl Globals<'_> {
    fn get(&self, name: &str) -> Option<Value> {
        match self {
            Globals::Exclusive(scope) => scope.get(name).cloned(),
            Globals::Shared(scope) => scope.lock().get(name).cloned(),
        }
    }

    fn declare(&mut self, name: &str, value: Value) {
        match self {
            Globals::Exclusive(scope) => {
                scope.insert(name.to_string(), value);
            }
            Globals::Shared(scope) => {
                scope.lock().insert(name.to_string(), value);
            }
        }
    }

    /// Overwrites an existing binding; `false` when `name` is unbound.
    fn assign(&mut self, name: &str, value: Value) -> bool {
        match self {
            Globals::Exclusive(scope) => overwrite(scope, name, value),
            Globals::Shared(scope) => overwrite(&mut scope.lock(), name, value),
        }
    }
}

fn overwrite(scope: &mut Scope, name: &str, value: Value) -> bool {
    match scope.get_mut(name) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// Executes one program against a caller-owned global scope.
///
/// Globals outlive the interpreter so a module can run its top level once
/// and later serve function calls against the same state.
pub struct Interpreter<'a> {
    program: &'a Program,
    globals: Globals<'a>,
    bindings: &'a dyn HostBindings,
    tracer: Option<&'a mut dyn Tracer>,
    frames: Vec<Frame>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        program: &'a Program,
        globals: &'a mut Scope,
        bindings: &'a dyn HostBindings,
    ) -> Self {
        Self::with_globals(program, Globals::Exclusive(globals), bindings)
    }

    /// Interpreter over globals that other threads may read and write
    /// between this interpreter's accesses.
    ///
    /// The lock is held for single reads and writes only, never across a
    /// statement or host call.
    pub fn shared(
        program: &'a Program,
        globals: &'a Mutex<Scope>,
        bindings: &'a dyn HostBindings,
    ) -> Self {
        Self::with_globals(program, Globals::Shared(globals), bindings)
    }

    fn with_globals(
        program: &'a Program,
        globals: Globals<'a>,
        bindings: &'a dyn HostBindings,
    ) -> Self {
        Self {
            program,
            globals,
            bindings,
            tracer: None,
            frames: Vec::new(),
        }
    }

    pub fn with_tracer(mut self, tracer: &'a mut dyn Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Runs the program's top-level statements.
    pub fn run(&mut self) -> Result<(), ExecError> {
        let program = self.program;
        self.frames.push(Frame {
            function: MAIN_FRAME.to_string(),
            line: 0,
            locals: None,
        });
        let result = self.exec_block(program.body());
        self.frames.pop();
        result.map(|_| ())
    }

    /// Calls a top-level function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let Some(function) = self.program.function(name).cloned() else {
            return Err(self.raise(format!("undefined function `{name}`")));
        };
        self.call_function(&function, args)
    }

    fn raise(&self, message: impl Into<String>) -> ExecError {
        let file = self.program.filename();
        ExecError::Raised(RuntimeError {
            message: message.into(),
            frames: self
                .frames
                .iter()
                .map(|frame| TraceFrame {
                    file: file.to_string(),
                    line: frame.line,
                    function: frame.function.clone(),
                })
                .collect(),
        })
    }

    fn trace(&mut self, line: usize) -> Result<(), ExecError> {
        let depth = self.frames.len();
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
        if let Some(tracer) = self.tracer.as_mut() {
            tracer
                .on_line(self.program.filename(), line, depth)
                .map_err(|_| ExecError::Halted)?;
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ExecError> {
        for stmt in stmts {
            self.trace(stmt.line)?;
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ExecError> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                self.declare(name, value);
            }
            StmtKind::Assign(name, expr) => {
                let value = self.eval(expr)?;
                self.assign(name, value)?;
            }
            StmtKind::Print(expr) => {
                let value = self.eval(expr)?;
                self.bindings.print(&value.to_string());
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            StmtKind::While(condition, body) => loop {
                if !self.eval(condition)?.is_truthy() {
                    break;
                }
                if let Flow::Return(value) = self.exec_block(body)? {
                    return Ok(Flow::Return(value));
                }
                self.trace(stmt.line)?;
            },
            StmtKind::FnDef(_) => {}
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(expr) => {
                let value = self.eval(expr)?;
                return Err(self.raise(value.to_string()));
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn declare(&mut self, name: &str, value: Value) {
        match self.frames.last_mut().and_then(|frame| frame.locals.as_mut()) {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => self.globals.declare(name, value),
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), ExecError> {
        if let Some(slot) = self
            .frames
            .last_mut()
            .and_then(|frame| frame.locals.as_mut())
            .and_then(|locals| locals.get_mut(name))
        {
            *slot = value;
            return Ok(());
        }
        if self.globals.assign(name, value) {
            return Ok(());
        }
        Err(self.raise(format!("assignment to undefined variable `{name}`")))
    }

    fn lookup(&self, name: &str) -> Result<Value, ExecError> {
        let local = self
            .frames
            .last()
            .and_then(|frame| frame.locals.as_ref())
            .and_then(|locals| locals.get(name))
            .cloned();
        match local.or_else(|| self.globals.get(name)) {
            Some(value) => Ok(value),
            None => Err(self.raise(format!("undefined variable `{name}`"))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExecError> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| self.raise("integer overflow")),
                    (UnaryOp::Neg, other) => {
                        Err(self.raise(format!("cannot negate {}", other.type_name())))
                    }
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.dispatch_call(name, values)
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value, ExecError> {
        use Value::{Int, Str};
        let overflow = || self.raise("integer overflow");
        match (op, left, right) {
            (BinaryOp::Eq, l, r) => Ok(Value::Bool(l == r)),
            (BinaryOp::Ne, l, r) => Ok(Value::Bool(l != r)),
            (BinaryOp::Add, Int(l), Int(r)) => l.checked_add(r).map(Int).ok_or_else(overflow),
            (BinaryOp::Add, Str(l), Str(r)) => Ok(Str(l + &r)),
            (BinaryOp::Sub, Int(l), Int(r)) => l.checked_sub(r).map(Int).ok_or_else(overflow),
            (BinaryOp::Mul, Int(l), Int(r)) => l.checked_mul(r).map(Int).ok_or_else(overflow),
            (BinaryOp::Div | BinaryOp::Rem, Int(_), Int(0)) => Err(self.raise("division by zero")),
            (BinaryOp::Div, Int(l), Int(r)) => l.checked_div(r).map(Int).ok_or_else(overflow),
            (BinaryOp::Rem, Int(l), Int(r)) => l.checked_rem(r).map(Int).ok_or_else(overflow),
            (BinaryOp::Lt, Int(l), Int(r)) => Ok(Value::Bool(l < r)),
            (BinaryOp::Le, Int(l), Int(r)) => Ok(Value::Bool(l <= r)),
            (BinaryOp::Gt, Int(l), Int(r)) => Ok(Value::Bool(l > r)),
            (BinaryOp::Ge, Int(l), Int(r)) => Ok(Value::Bool(l >= r)),
            (BinaryOp::Lt, Str(l), Str(r)) => Ok(Value::Bool(l < r)),
            (BinaryOp::Le, Str(l), Str(r)) => Ok(Value::Bool(l <= r)),
            (BinaryOp::Gt, Str(l), Str(r)) => Ok(Value::Bool(l > r)),
            (BinaryOp::Ge, Str(l), Str(r)) => Ok(Value::Bool(l >= r)),
            (op, l, r) => Err(self.raise(format!(
                "unsupported operands for {op:?}: {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    fn dispatch_call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        if let Some(function) = self.program.function(name).cloned() {
            return self.call_function(&function, args);
        }
        if let Some(result) = self.builtin(name, &args) {
            return result;
        }
        match self.bindings.call(name, &args) {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(self.raise(message)),
            None => Err(self.raise(format!("undefined function `{name}`"))),
        }
    }

    fn builtin(&self, name: &str, args: &[Value]) -> Option<Result<Value, ExecError>> {
        let result = match (name, args) {
            ("len", [Value::Str(s)]) => Ok(Value::Int(s.chars().count() as i64)),
            ("str", [value]) => Ok(Value::Str(value.to_string())),
            ("type", [value]) => Ok(Value::from(value.type_name())),
            ("int", [Value::Int(n)]) => Ok(Value::Int(*n)),
            ("int", [Value::Bool(b)]) => Ok(Value::Int(i64::from(*b))),
            ("int", [Value::Str(s)]) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.raise(format!("invalid integer literal `{s}`"))),
            ("len" | "str" | "type" | "int", _) => Err(self.raise(format!(
                "invalid arguments for builtin `{name}`"
            ))),
            _ => return None,
        };
        Some(result)
    }

    fn call_function(
        &mut self,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, ExecError> {
        if args.len() != function.params.len() {
            return Err(self.raise(format!(
                "`{}` expects {} argument(s), got {}",
                function.name,
                function.params.len(),
                args.len()
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.raise("maximum call depth exceeded"));
        }
        let locals = function.params.iter().cloned().zip(args).collect::<Scope>();
        self.frames.push(Frame {
            function: function.name.clone(),
            line: function.line,
            locals: Some(locals),
        });
        let result = self.exec_block(&function.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Interpreter, Scope};
    use crate::script::{compile, ExecError, Halt, HostBindings, Tracer, Value};
    use parking_lot::Mutex;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Capture {
        printed: RefCell<Vec<String>>,
    }

    impl HostBindings for Capture {
        fn print(&self, text: &str) {
            self.printed.borrow_mut().push(text.to_string());
        }

        fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
            match name {
                "shout" => Some(Ok(Value::Str(format!("{}!", args[0])))),
                _ => None,
            }
        }
    }

    struct LineLog {
        lines: Vec<(usize, usize)>,
        halt_at: Option<usize>,
    }

    impl Tracer for LineLog {
        fn on_line(&mut self, _file: &str, line: usize, depth: usize) -> Result<(), Halt> {
            self.lines.push((line, depth));
            if self.halt_at == Some(line) {
                return Err(Halt);
            }
            Ok(())
        }
    }

    fn run(source: &str) -> (Result<(), ExecError>, Vec<String>) {
        let program = compile(source, "t.sed").expect("compile");
        let bindings = Capture::default();
        let mut globals = Scope::new();
        let result = Interpreter::new(&program, &mut globals, &bindings).run();
        (result, bindings.printed.into_inner())
    }

    #[test]
    fn runs_loops_functions_and_host_calls() {
        let source = "\
fn fact(n)
  if n <= 1
    return 1
  end
  return n * fact(n - 1)
end
let i = 0
while i < 3
  i = i + 1
end
print fact(5)
print shout(\"hi\") + str(i)
";
        let (result, printed) = run(source);
        result.expect("program should finish");
        assert_eq!(printed, vec!["120".to_string(), "hi!3".to_string()]);
    }

    #[test]
    fn raise_produces_trace_with_innermost_frame_last() {
        let source = "fn boom()\n  raise \"bad thing\"\nend\nboom()\n";
        let (result, _) = run(source);
        let Err(ExecError::Raised(err)) = result else {
            panic!("expected raised error");
        };
        assert_eq!(err.message, "bad thing");
        assert_eq!(err.line(), Some(2));
        let trace = err.trace_text();
        assert!(trace.starts_with("error: bad thing"));
        assert!(trace.contains("at boom (t.sed:2)"));
        assert!(trace.contains("at <main> (t.sed:4)"));
    }

    #[test]
    fn runtime_faults_are_errors_not_panics() {
        for source in ["print 1 / 0", "print missing", "print \"a\" - 1", "x = 1", "nope()"] {
            let (result, _) = run(source);
            assert!(
                matches!(result, Err(ExecError::Raised(_))),
                "`{source}` should raise"
            );
        }
    }

    #[test]
    fn unbounded_recursion_hits_depth_limit() {
        let (result, _) = run("fn f(n)\n  return f(n + 1)\nend\nf(0)\n");
        let Err(ExecError::Raised(err)) = result else {
            panic!("expected raised error");
        };
        assert!(err.message.contains("call depth"));
    }

    #[test]
    fn tracer_sees_every_line_with_call_depth_and_can_halt() {
        let program = compile("fn f()\n  print 1\nend\nf()\nprint 2\n", "t.sed").expect("compile");
        let bindings = Capture::default();
        let mut globals = Scope::new();
        let mut tracer = LineLog {
            lines: Vec::new(),
            halt_at: Some(5),
        };
        let result = Interpreter::new(&program, &mut globals, &bindings)
            .with_tracer(&mut tracer)
            .run();
        assert_eq!(result, Err(ExecError::Halted));
        assert_eq!(tracer.lines, vec![(1, 1), (4, 1), (2, 2), (5, 1)]);
        assert_eq!(bindings.printed.into_inner(), vec!["1".to_string()]);
    }

    #[test]
    fn globals_persist_across_function_calls() {
        let source = "let count = 0\nfn bump()\n  count = count + 1\n  return count\nend\n";
        let program = compile(source, "t.sed").expect("compile");
        let bindings = Capture::default();
        let mut globals = Scope::new();
        Interpreter::new(&program, &mut globals, &bindings)
            .run()
            .expect("top level");
        Interpreter::new(&program, &mut globals, &bindings)
            .call("bump", vec![])
            .expect("first call");
        let value = Interpreter::new(&program, &mut globals, &bindings)
            .call("bump", vec![])
            .expect("second call");
        assert_eq!(value, Value::Int(2));
    }

    /// Host function that reads the shared globals while a call is running.
    struct Peek<'a> {
        globals: &'a Mutex<Scope>,
    }

    impl HostBindings for Peek<'_> {
        fn print(&self, _text: &str) {}

        fn call(&self, name: &str, _args: &[Value]) -> Option<Result<Value, String>> {
            if name != "peek" {
                return None;
            }
            Some(Ok(self.globals.lock().get("x").cloned().unwrap_or_default()))
        }
    }

    #[test]
    fn shared_globals_are_not_locked_across_host_calls() {
        let program = compile(
            "let x = 1\nfn bump()\n  x = x + 1\n  return peek()\nend\n",
            "t.sed",
        )
        .expect("compile");
        let globals = Mutex::new(Scope::new());
        let bindings = Peek { globals: &globals };
        Interpreter::shared(&program, &globals, &bindings)
            .run()
            .expect("top level");
        let seen = Interpreter::shared(&program, &globals, &bindings)
            .call("bump", vec![])
            .expect("bump");
        assert_eq!(seen, Value::Int(2));
        assert_eq!(globals.lock().get("x"), Some(&Value::Int(2)));
    }
}

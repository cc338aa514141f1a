//! Block parser producing the executable program tree.

use super::lexer::{tokenize, SourceLine, Symbol, Token};
use super::value::Value;
use super::SyntaxError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Blocks and sub-expressions nested deeper than this are a syntax error,
/// so neither the parser nor the interpreter can exhaust the stack.
pub const MAX_NESTING_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "let", "if", "elif", "else", "end", "while", "fn", "return", "raise", "print", "and", "or",
    "not", "true", "false", "nil",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    Print(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    While(Expr, Vec<Stmt>),
    /// Function definitions are hoisted at compile time; the statement only
    /// marks the definition line for tracing.
    FnDef(String),
    Return(Option<Expr>),
    Raise(Expr),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

/// A compiled script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    filename: String,
    body: Vec<Stmt>,
    functions: BTreeMap<String, Arc<Function>>,
}

impl Program {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Sorted names of all top-level functions.
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }
}

/// Compiles `source`, attributing diagnostics to `filename`.
pub fn compile(source: &str, filename: &str) -> Result<Program, SyntaxError> {
    let lines = tokenize(source, filename)?;
    let mut parser = Parser {
        filename,
        lines: &lines,
        index: 0,
        depth: 0,
        functions: BTreeMap::new(),
    };
    let (body, terminator) = parser.block(&[], true)?;
    if let Some((word, line)) = terminator {
        return Err(SyntaxError::new(filename, line, format!("unexpected `{word}`")));
    }
    Ok(Program {
        filename: filename.to_string(),
        body,
        functions: parser.functions,
    })
}

struct Parser<'a> {
    filename: &'a str,
    lines: &'a [SourceLine],
    index: usize,
    /// Open blocks around the line being parsed.
    depth: usize,
    functions: BTreeMap<String, Arc<Function>>,
}

impl Parser<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.filename, line, message)
    }

    /// Parses statements until one of `terminators` opens a line.
    ///
    /// Returns the terminator keyword and its line, or `None` at end of input.
    fn block(
        &mut self,
        terminators: &[&str],
        top_level: bool,
    ) -> Result<(Vec<Stmt>, Option<(String, usize)>), SyntaxError> {
        if self.depth >= MAX_NESTING_DEPTH {
            let opened_at = self
                .index
                .checked_sub(1)
                .map_or(1, |i| self.lines[i].number);
            return Err(self.error(opened_at, "nesting too deep"));
        }
        self.depth += 1;
        let result = self.statements(terminators, top_level);
        self.depth -= 1;
        result
    }

    fn statements(
        &mut self,
        terminators: &[&str],
        top_level: bool,
    ) -> Result<(Vec<Stmt>, Option<(String, usize)>), SyntaxError> {
        let lines = self.lines;
        let mut body = Vec::new();
        while let Some(line) = lines.get(self.index) {
            if let Some(Token::Ident(word)) = line.tokens.first() {
                if terminators.contains(&word.as_str()) || is_block_keyword(word) {
                    return Ok((body, Some((word.clone(), line.number))));
                }
            }
            self.index += 1;
            let stmt = self.statement(line, top_level)?;
            body.push(stmt);
        }
        Ok((body, None))
    }

    fn finish_keyword_line(&mut self, line: usize) -> Result<(), SyntaxError> {
        let current = &self.lines[self.index];
        if current.tokens.len() != 1 {
            return Err(self.error(line, "unexpected tokens after keyword"));
        }
        self.index += 1;
        Ok(())
    }

    fn statement(&mut self, line: &SourceLine, top_level: bool) -> Result<Stmt, SyntaxError> {
        let number = line.number;
        let tokens = line.tokens.as_slice();
        let keyword = match tokens.first() {
            Some(Token::Ident(word)) => word.as_str(),
            _ => "",
        };
        let kind = match keyword {
            "let" => {
                let (name, value) = self.binding(&tokens[1..], number)?;
                StmtKind::Let(name, value)
            }
            "print" => StmtKind::Print(self.expression(&tokens[1..], number)?),
            "raise" => StmtKind::Raise(self.expression(&tokens[1..], number)?),
            "return" => {
                if tokens.len() == 1 {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression(&tokens[1..], number)?))
                }
            }
            "while" => {
                let condition = self.expression(&tokens[1..], number)?;
                let (body, terminator) = self.block(&["end"], false)?;
                self.close_block(terminator, number, "while")?;
                StmtKind::While(condition, body)
            }
            "if" => self.if_statement(&tokens[1..], number)?,
            "fn" => {
                if !top_level {
                    return Err(self.error(number, "functions may only be defined at top level"));
                }
                self.function(&tokens[1..], number)?
            }
            _ => {
                if let [Token::Ident(name), Token::Sym(Symbol::Assign), rest @ ..] = tokens {
                    self.check_name(name, number)?;
                    StmtKind::Assign(name.clone(), self.expression(rest, number)?)
                } else {
                    StmtKind::Expr(self.expression(tokens, number)?)
                }
            }
        };
        Ok(Stmt { line: number, kind })
    }

    fn close_block(
        &mut self,
        terminator: Option<(String, usize)>,
        opened_at: usize,
        what: &str,
    ) -> Result<(), SyntaxError> {
        match terminator {
            Some((word, line)) if word == "end" => self.finish_keyword_line(line),
            Some((word, line)) => Err(self.error(line, format!("unexpected `{word}` in {what}"))),
            None => Err(self.error(opened_at, format!("`{what}` is missing `end`"))),
        }
    }

    fn if_statement(
        &mut self,
        condition: &[Token],
        number: usize,
    ) -> Result<StmtKind, SyntaxError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut condition = self.expression(condition, number)?;
        loop {
            let (body, terminator) = self.block(&["elif", "else", "end"], false)?;
            branches.push((condition, body));
            let Some((word, line)) = terminator else {
                return Err(self.error(number, "`if` is missing `end`"));
            };
            match word.as_str() {
                "elif" => {
                    let tokens = self.lines[self.index].tokens.clone();
                    self.index += 1;
                    condition = self.expression(&tokens[1..], line)?;
                }
                "else" => {
                    self.finish_keyword_line(line)?;
                    let (body, terminator) = self.block(&["end"], false)?;
                    otherwise = Some(body);
                    self.close_block(terminator, line, "else")?;
                    break;
                }
                "end" => {
                    self.finish_keyword_line(line)?;
                    break;
                }
                other => return Err(self.error(line, format!("unexpected `{other}` in if"))),
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn function(&mut self, tokens: &[Token], number: usize) -> Result<StmtKind, SyntaxError> {
        let (name, rest) = match tokens {
            [Token::Ident(name), Token::Sym(Symbol::LParen), rest @ ..] => (name.clone(), rest),
            _ => return Err(self.error(number, "expected `fn name(params)`")),
        };
        self.check_name(&name, number)?;
        let mut params = Vec::new();
        let mut cursor = rest;
        loop {
            match cursor {
                [Token::Sym(Symbol::RParen)] if params.is_empty() => break,
                [Token::Ident(param), Token::Sym(Symbol::RParen)] => {
                    self.check_name(param, number)?;
                    params.push(param.clone());
                    break;
                }
                [Token::Ident(param), Token::Sym(Symbol::Comma), tail @ ..] => {
                    self.check_name(param, number)?;
                    params.push(param.clone());
                    cursor = tail;
                }
                _ => return Err(self.error(number, "malformed parameter list")),
            }
        }
        if params.iter().enumerate().any(|(i, p)| params[..i].contains(p)) {
            return Err(self.error(number, format!("duplicate parameter in `{name}`")));
        }
        if self.functions.contains_key(&name) {
            return Err(self.error(number, format!("function `{name}` is already defined")));
        }
        let (body, terminator) = self.block(&["end"], false)?;
        self.close_block(terminator, number, "fn")?;
        self.functions.insert(
            name.clone(),
            Arc::new(Function {
                name: name.clone(),
                params,
                body,
                line: number,
            }),
        );
        Ok(StmtKind::FnDef(name))
    }

    fn binding(&self, tokens: &[Token], number: usize) -> Result<(String, Expr), SyntaxError> {
        match tokens {
            [Token::Ident(name), Token::Sym(Symbol::Assign), rest @ ..] => {
                self.check_name(name, number)?;
                Ok((name.clone(), self.expression(rest, number)?))
            }
            _ => Err(self.error(number, "expected `let name = value`")),
        }
    }

    fn check_name(&self, name: &str, number: usize) -> Result<(), SyntaxError> {
        if RESERVED.contains(&name) {
            return Err(self.error(number, format!("`{name}` is a reserved word")));
        }
        Ok(())
    }

    fn expression(&self, tokens: &[Token], number: usize) -> Result<Expr, SyntaxError> {
        if tokens.is_empty() {
            return Err(self.error(number, "expected an expression"));
        }
        let mut cursor = ExprCursor {
            tokens,
            pos: 0,
            depth: self.depth,
            parser: self,
            line: number,
        };
        let expr = cursor.or()?;
        if cursor.pos != tokens.len() {
            return Err(self.error(number, "unexpected trailing tokens"));
        }
        Ok(expr)
    }
}

fn is_block_keyword(word: &str) -> bool {
    matches!(word, "end" | "elif" | "else")
}

struct ExprCursor<'t, 'p> {
    tokens: &'t [Token],
    pos: usize,
    /// Enclosing blocks plus open sub-expressions.
    depth: usize,
    parser: &'p Parser<'p>,
    line: usize,
}

impl ExprCursor<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_sym(&mut self, sym: Symbol) -> bool {
        if self.peek() == Some(&Token::Sym(sym)) {
            self.pos += 1;
            return true;
        }
        false
    }

    /// Runs `parse` one nesting level deeper.
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.parser.error(self.line, "nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and()?;
        while self.eat_word("or") {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not()?;
        while self.eat_word("and") {
            let right = self.not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_word("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.nested(Self::not)?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Sym(Symbol::Eq)) => BinaryOp::Eq,
            Some(Token::Sym(Symbol::Ne)) => BinaryOp::Ne,
            Some(Token::Sym(Symbol::Lt)) => BinaryOp::Lt,
            Some(Token::Sym(Symbol::Le)) => BinaryOp::Le,
            Some(Token::Sym(Symbol::Gt)) => BinaryOp::Gt,
            Some(Token::Sym(Symbol::Ge)) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Sym(Symbol::Plus)) => BinaryOp::Add,
                Some(Token::Sym(Symbol::Minus)) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Sym(Symbol::Star)) => BinaryOp::Mul,
                Some(Token::Sym(Symbol::Slash)) => BinaryOp::Div,
                Some(Token::Sym(Symbol::Percent)) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_sym(Symbol::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::unary)?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.parser.error(self.line, "expected an expression"))?;
        self.pos += 1;
        match token {
            Token::Int(value) => Ok(Expr::Lit(Value::Int(value))),
            Token::Str(value) => Ok(Expr::Lit(Value::Str(value))),
            Token::Sym(Symbol::LParen) => {
                let inner = self.nested(Self::or)?;
                if !self.eat_sym(Symbol::RParen) {
                    return Err(self.parser.error(self.line, "expected `)`"));
                }
                Ok(inner)
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "nil" => Ok(Expr::Lit(Value::Nil)),
                _ if RESERVED.contains(&word.as_str()) => Err(self
                    .parser
                    .error(self.line, format!("unexpected `{word}`"))),
                _ => {
                    if self.eat_sym(Symbol::LParen) {
                        let args = self.arguments()?;
                        Ok(Expr::Call(word, args))
                    } else {
                        Ok(Expr::Var(word))
                    }
                }
            },
            Token::Sym(sym) => Err(self
                .parser
                .error(self.line, format!("unexpected symbol {sym:?}"))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if self.eat_sym(Symbol::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::or)?);
            if self.eat_sym(Symbol::RParen) {
                return Ok(args);
            }
            if !self.eat_sym(Symbol::Comma) {
                return Err(self.parser.error(self.line, "expected `,` or `)`"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{compile, BinaryOp, Expr, StmtKind, MAX_NESTING_DEPTH};
    use crate::script::Value;

    #[test]
    fn hoists_functions_and_keeps_definition_line() {
        let program = compile("print 1\nfn greet(name)\n  print name\nend\n", "t.sed")
            .expect("compile");
        assert!(program.has_function("greet"));
        assert_eq!(program.function("greet").expect("greet").line, 2);
        assert_eq!(program.body().len(), 2);
        assert_eq!(program.body()[1].kind, StmtKind::FnDef("greet".to_string()));
    }

    #[test]
    fn respects_operator_precedence() {
        let program = compile("let x = 1 + 2 * 3", "t.sed").expect("compile");
        let StmtKind::Let(_, expr) = &program.body()[0].kind else {
            panic!("expected let");
        };
        assert_eq!(
            *expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Lit(Value::Int(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Lit(Value::Int(2))),
                    Box::new(Expr::Lit(Value::Int(3))),
                )),
            )
        );
    }

    #[test]
    fn parses_if_elif_else_chain() {
        let source = "if x == 1\n  print 1\nelif x == 2\n  print 2\nelse\n  print 3\nend";
        let program = compile(source, "t.sed").expect("compile");
        let StmtKind::If {
            branches,
            otherwise,
        } = &program.body()[0].kind
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn reports_missing_end_at_opening_line() {
        let err = compile("let a = 1\nwhile a\n  a = a - 1\n", "t.sed").expect_err("no end");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("end"));
    }

    #[test]
    fn rejects_nested_functions_and_stray_end() {
        let nested = compile("fn a()\n  fn b()\n  end\nend", "t.sed").expect_err("nested fn");
        assert_eq!(nested.line, 2);
        let stray = compile("print 1\nend", "t.sed").expect_err("stray end");
        assert_eq!(stray.line, 2);
    }

    #[test]
    fn deep_parentheses_are_a_syntax_error() {
        let depth = 50_000;
        let source = format!("print {}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = compile(&source, "t.sed").expect_err("too deep");
        assert_eq!(err.line, 1);
        assert!(err.message.contains("nesting too deep"));

        let unary = format!("print {}1", "-".repeat(depth));
        assert!(compile(&unary, "t.sed").is_err());
    }

    #[test]
    fn deep_blocks_are_a_syntax_error() {
        let depth = MAX_NESTING_DEPTH + 1;
        let source = format!(
            "{}print 1\n{}",
            "while true\n".repeat(depth),
            "end\n".repeat(depth)
        );
        let err = compile(&source, "t.sed").expect_err("too deep");
        assert!(err.message.contains("nesting too deep"));
        assert_eq!(err.line, MAX_NESTING_DEPTH);
    }

    #[test]
    fn moderate_nesting_still_compiles() {
        let parens = format!("print {}1{}", "(".repeat(20), ")".repeat(20));
        compile(&parens, "t.sed").expect("twenty parens");
        let blocks = format!(
            "{}print 1\n{}",
            "if true\n".repeat(20),
            "end\n".repeat(20)
        );
        compile(&blocks, "t.sed").expect("twenty blocks");
    }
}

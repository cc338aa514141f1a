//! Line-oriented tokenizer for sedit scripts.

use super::SyntaxError;
use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^(?:(?P<num>[0-9]+)"#,
        r#"|(?P<str>"(?:[^"\\]|\\.)*")"#,
        r#"|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)"#,
        r#"|(?P<sym>==|!=|<=|>=|[-+*/%()<>=,])"#,
        r#"|(?P<comment>#.*))"#,
    ))
    .expect("valid token regex")
});

/// Punctuation and operator symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Symbol {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "+" => Self::Plus,
            "-" => Self::Minus,
            "*" => Self::Star,
            "/" => Self::Slash,
            "%" => Self::Percent,
            "(" => Self::LParen,
            ")" => Self::RParen,
            "," => Self::Comma,
            "=" => Self::Assign,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Sym(Symbol),
}

/// Tokens of one non-blank source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number in the source file.
    pub number: usize,
    pub tokens: Vec<Token>,
}

/// Splits `source` into token lines, dropping blank and comment-only lines.
pub fn tokenize(source: &str, filename: &str) -> Result<Vec<SourceLine>, SyntaxError> {
    let mut lines = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;
        let tokens = tokenize_line(raw, filename, number)?;
        if !tokens.is_empty() {
            lines.push(SourceLine { number, tokens });
        }
    }
    Ok(lines)
}

fn tokenize_line(raw: &str, filename: &str, number: usize) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        let Some(caps) = TOKEN_RE.captures(rest) else {
            let bad = rest.chars().next().unwrap_or(' ');
            return Err(SyntaxError::new(
                filename,
                number,
                format!("unexpected character `{bad}`"),
            ));
        };
        let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if caps.name("comment").is_some() {
            break;
        }
        if let Some(num) = caps.name("num") {
            let value = num.as_str().parse::<i64>().map_err(|_| {
                SyntaxError::new(
                    filename,
                    number,
                    format!("integer literal too large: {}", num.as_str()),
                )
            })?;
            tokens.push(Token::Int(value));
        } else if let Some(text) = caps.name("str") {
            tokens.push(Token::Str(unescape(text.as_str(), filename, number)?));
        } else if let Some(ident) = caps.name("ident") {
            tokens.push(Token::Ident(ident.as_str().to_string()));
        } else if let Some(sym) = caps.name("sym").and_then(|m| Symbol::parse(m.as_str())) {
            tokens.push(Token::Sym(sym));
        }
        rest = rest[matched.len()..].trim_start();
    }
    Ok(tokens)
}

fn unescape(quoted: &str, filename: &str, number: usize) -> Result<String, SyntaxError> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(SyntaxError::new(
                    filename,
                    number,
                    format!("unknown escape `\\{other}`"),
                ))
            }
            None => return Err(SyntaxError::new(filename, number, "dangling escape")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{tokenize, Symbol, Token};

    #[test]
    fn skips_blank_and_comment_lines_but_keeps_numbers() {
        let lines = tokenize("\n# header\nlet x = 1 # trailing\n", "t.sed").expect("tokenize");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 3);
        assert_eq!(
            lines[0].tokens,
            vec![
                Token::Ident("let".to_string()),
                Token::Ident("x".to_string()),
                Token::Sym(Symbol::Assign),
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn unescapes_string_literals() {
        let lines = tokenize(r#"print "a\"b\n""#, "t.sed").expect("tokenize");
        assert_eq!(lines[0].tokens[1], Token::Str("a\"b\n".to_string()));
    }

    #[test]
    fn rejects_unknown_characters_with_line_number() {
        let err = tokenize("let a = 1\nlet b = $", "t.sed").expect_err("`$` is not a token");
        assert_eq!(err.line, 2);
        assert!(err.message.contains('$'));
    }
}

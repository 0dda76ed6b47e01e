//! Parser for the small `SELECT` surface of the reference host.
//!
//! Supported statements:
//! - `SELECT <expr> [[AS] alias], ...` where an expression is a literal
//!   (integer, float, `'string'`, `TRUE`, `FALSE`, `NULL`) or a function call
//! - `SELECT * FROM range(<n>)`
//! - `SET ...`, `BEGIN`, `COMMIT`, `ROLLBACK`, accepted and ignored

use crate::bridge::{EngineError, Value};

// Deepest function-call nesting accepted in one expression
const MAX_EXPR_DEPTH: usize = 64;

/// Parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Projection without a FROM clause
    Select(Vec<SelectItem>),
    /// `SELECT * FROM range(n)`
    Range(i64),
    /// Session/transaction command reported with its tag only
    Command(&'static str),
}

/// One projected expression
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// Expression
    pub expr: Expr,
    /// `AS` alias
    pub alias: Option<String>,
}

/// Scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Literal(Value),
    /// Function call
    Call {
        /// Lower-cased function name
        name: String,
        /// Arguments
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    QuotedIdent(String),
    Integer(i64),
    Float(f64),
    String(String),
    LParen,
    RParen,
    Comma,
    Star,
    Minus,
    Semicolon,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) | Token::QuotedIdent(s) => s.clone(),
            Token::Integer(n) => n.to_string(),
            Token::Float(f) => f.to_string(),
            Token::String(s) => format!("'{}'", s),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Star => "*".into(),
            Token::Minus => "-".into(),
            Token::Semicolon => ";".into(),
            Token::Eof => String::new(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }
}

fn syntax_error_at(token: &Token) -> EngineError {
    match token {
        Token::Eof => EngineError::syntax("syntax error at end of input"),
        other => EngineError::syntax(format!(
            "syntax error at or near \"{}\"",
            other.describe()
        )),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '-' if input[start..].starts_with("--") => {
                while let Some((_, c)) = chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | ')' | ',' | '*' | '-' | ';' => {
                chars.next();
                tokens.push(match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    '*' => Token::Star,
                    '-' => Token::Minus,
                    _ => Token::Semicolon,
                });
            }
            '\'' | '"' => {
                chars.next();
                let quote = ch;
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, c)) if c == quote => {
                            // Doubled quote is an escaped quote
                            if chars.peek().map(|&(_, c)| c) == Some(quote) {
                                chars.next();
                                text.push(quote);
                            } else {
                                break;
                            }
                        }
                        Some((_, c)) => text.push(c),
                        None => {
                            return Err(EngineError::syntax(if quote == '\'' {
                                "unterminated quoted string at or near \"'\""
                            } else {
                                "unterminated quoted identifier at or near \"\"\""
                            }))
                        }
                    }
                }
                tokens.push(if quote == '\'' {
                    Token::String(text)
                } else {
                    Token::QuotedIdent(text)
                });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &input[start..end];
                let token = match text.parse::<i64>() {
                    Ok(n) => Token::Integer(n),
                    Err(_) => text.parse::<f64>().map(Token::Float).map_err(|_| {
                        EngineError::syntax(format!(
                            "trailing junk after numeric literal at or near \"{}\"",
                            text
                        ))
                    })?,
                };
                tokens.push(token);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[start..end].to_string()));
            }
            other => {
                return Err(EngineError::syntax(format!(
                    "syntax error at or near \"{}\"",
                    other
                )))
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

static EOF: Token = Token::Eof;

/// Recursive-descent parser over a token vector
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&EOF)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), EngineError> {
        if self.consume(token) {
            Ok(())
        } else {
            Err(syntax_error_at(self.peek()))
        }
    }

    fn statement(&mut self) -> Result<Statement, EngineError> {
        let commands = [("begin", "BEGIN"), ("commit", "COMMIT"), ("rollback", "ROLLBACK")];
        for (keyword, tag) in commands {
            if self.consume_keyword(keyword) {
                self.consume_keyword("transaction");
                return Ok(Statement::Command(tag));
            }
        }

        if !self.consume_keyword("select") {
            return Err(syntax_error_at(self.peek()));
        }

        if self.consume(&Token::Star) {
            if !self.consume_keyword("from") {
                return Err(syntax_error_at(self.peek()));
            }
            return self.range();
        }

        let mut items = vec![self.select_item()?];
        while self.consume(&Token::Comma) {
            items.push(self.select_item()?);
        }
        Ok(Statement::Select(items))
    }

    fn range(&mut self) -> Result<Statement, EngineError> {
        match self.next() {
            Token::Ident(name) if name.eq_ignore_ascii_case("range") => {}
            Token::Ident(name) => {
                return Err(EngineError::new(
                    crate::protocol::sql_state::UNDEFINED_FUNCTION,
                    format!("table function {} does not exist", name.to_lowercase()),
                ))
            }
            other => return Err(syntax_error_at(&other)),
        }
        self.expect(&Token::LParen)?;
        let count = match self.next() {
            Token::Integer(n) => n,
            other => return Err(syntax_error_at(&other)),
        };
        self.expect(&Token::RParen)?;
        Ok(Statement::Range(count))
    }

    fn select_item(&mut self) -> Result<SelectItem, EngineError> {
        let expr = self.expr()?;
        let alias = if self.consume_keyword("as") {
            Some(self.identifier()?)
        } else {
            let bare_alias = match self.peek() {
                Token::Ident(s) => !s.eq_ignore_ascii_case("from"),
                Token::QuotedIdent(_) => true,
                _ => false,
            };
            if bare_alias {
                Some(self.identifier()?)
            } else {
                None
            }
        };
        Ok(SelectItem { expr, alias })
    }

    fn identifier(&mut self) -> Result<String, EngineError> {
        match self.next() {
            Token::Ident(s) => Ok(s.to_lowercase()),
            Token::QuotedIdent(s) => Ok(s),
            other => Err(syntax_error_at(&other)),
        }
    }

    fn expr(&mut self) -> Result<Expr, EngineError> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(EngineError::statement_too_complex());
        }
        self.depth += 1;
        let expr = self.primary();
        self.depth -= 1;
        expr
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        match self.next() {
            Token::Integer(n) => Ok(Expr::Literal(integer(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float8(f))),
            Token::String(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Minus => match self.next() {
                Token::Integer(n) => Ok(Expr::Literal(integer(-n))),
                Token::Float(f) => Ok(Expr::Literal(Value::Float8(-f))),
                other => Err(syntax_error_at(&other)),
            },
            Token::Ident(word) if word.eq_ignore_ascii_case("true") => {
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("false") => {
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("null") => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => {
                if !self.consume(&Token::LParen) {
                    return Err(EngineError::new(
                        crate::protocol::sql_state::UNDEFINED_COLUMN,
                        format!("column \"{}\" does not exist", name.to_lowercase()),
                    ));
                }
                let mut args = Vec::new();
                if !self.consume(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.consume(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Call {
                    name: name.to_lowercase(),
                    args,
                })
            }
            other => Err(syntax_error_at(&other)),
        }
    }
}

/// Integer literals are `integer` when they fit, `bigint` otherwise
fn integer(n: i64) -> Value {
    match i32::try_from(n) {
        Ok(v) => Value::Int4(v),
        Err(_) => Value::Int8(n),
    }
}

/// Parse one statement (an optional trailing `;` is allowed)
pub fn parse(sql: &str) -> Result<Statement, EngineError> {
    // Parameters are not tracked, so the body of a SET is never tokenized
    let keyword = sql
        .trim_start()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("");
    if keyword.eq_ignore_ascii_case("set") {
        return Ok(Statement::Command("SET"));
    }

    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
        depth: 0,
    };
    let statement = parser.statement()?;
    parser.consume(&Token::Semicolon);
    match parser.peek() {
        Token::Eof => Ok(statement),
        other => Err(syntax_error_at(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    #[test]
    fn test_function_call_with_alias() {
        let stmt = parse("SELECT duckdb_pgwire('Sam') AS greeting;").unwrap();
        assert_eq!(
            stmt,
            Statement::Select(vec![SelectItem {
                expr: call("duckdb_pgwire", vec![Expr::Literal(Value::from("Sam"))]),
                alias: Some("greeting".into()),
            }])
        );
    }

    #[test]
    fn test_literals() {
        let sql = "select 1, -2.5, 'it''s', true, null, 3000000000";
        let Statement::Select(items) = parse(sql).unwrap() else {
            panic!("expected select");
        };
        let values: Vec<_> = items
            .into_iter()
            .map(|item| match item.expr {
                Expr::Literal(v) => v,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Int4(1),
                Value::Float8(-2.5),
                Value::from("it's"),
                Value::Bool(true),
                Value::Null,
                Value::Int8(3_000_000_000),
            ]
        );
    }

    #[test]
    fn test_range() {
        assert_eq!(parse("SELECT * FROM range(10)").unwrap(), Statement::Range(10));
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            parse("SET application_name = 'psql'").unwrap(),
            Statement::Command("SET")
        );
        assert_eq!(parse("BEGIN").unwrap(), Statement::Command("BEGIN"));
        assert_eq!(
            parse("set extra_float_digits = 3;").unwrap(),
            Statement::Command("SET")
        );
        assert_eq!(
            parse("SET search_path TO public, pg_catalog").unwrap(),
            Statement::Command("SET")
        );
        // Only the leading keyword counts
        assert!(parse("SETTINGS = 1").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| {
            format!("SELECT {}1{}", "f(".repeat(depth), ")".repeat(depth))
        };
        assert!(parse(&nested(MAX_EXPR_DEPTH - 1)).is_ok());

        let err = parse(&nested(MAX_EXPR_DEPTH)).unwrap_err();
        assert_eq!(err.code(), crate::protocol::sql_state::STATEMENT_TOO_COMPLEX);

        let err = parse(&nested(50_000)).unwrap_err();
        assert_eq!(err.code(), crate::protocol::sql_state::STATEMENT_TOO_COMPLEX);
        assert_eq!(err.message(), "stack depth limit exceeded");
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("SELEC 1").unwrap_err();
        assert_eq!(err.code(), crate::protocol::sql_state::SYNTAX_ERROR);
        assert_eq!(err.message(), "syntax error at or near \"SELEC\"");

        let err = parse("SELECT foo(1").unwrap_err();
        assert_eq!(err.message(), "syntax error at end of input");

        assert!(parse("SELECT 'open").is_err());
    }

    #[test]
    fn test_bare_identifier_is_unknown_column() {
        let err = parse("SELECT x").unwrap_err();
        assert_eq!(err.code(), crate::protocol::sql_state::UNDEFINED_COLUMN);
    }
}

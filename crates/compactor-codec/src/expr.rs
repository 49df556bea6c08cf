//! Predicate expressions
//!
//! Function-valued configuration travels across the process boundary as a
//! closure-shaped expression, e.g. `|comment| matches(comment.text, "@license")`.
//! An expression is compiled on the receiving side: parsed, checked for
//! identifiers that are not parameters (those would have been captured from
//! the sender's scope and cannot be reconstructed), and then evaluated
//! against a JSON context, one field per parameter.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Builtin functions callable inside an expression body.
const BUILTINS: &[&str] = &["matches", "contains", "starts_with", "ends_with", "len"];

/// Errors from compiling or evaluating a predicate expression.
#[derive(Debug, Clone, Error)]
pub enum ExprError {
    /// A character the tokenizer does not understand.
    #[error("unexpected character `{0}` at offset {1}")]
    UnexpectedChar(char, usize),
    /// A string literal with no closing quote.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// A numeric literal that does not parse.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// The parser expected one construct and found another.
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    /// The expression ended mid-construct.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// `this` and `eval` have no meaning in a transported function.
    #[error("`{0}` is not allowed in a transported function")]
    Disallowed(String),
    /// A closure inside the expression body.
    #[error("nested closures are not allowed in a transported function")]
    NestedClosure,
    /// An identifier that is neither a parameter nor a builtin.
    #[error("unknown identifier `{0}`")]
    FreeIdentifier(String),
    /// A call to a function outside the builtin set.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// A builtin called with the wrong number of arguments.
    #[error("`{func}` expects {expected} argument(s), got {got}")]
    Arity {
        func: String,
        expected: usize,
        got: usize,
    },
    /// A builtin called with an argument of the wrong type.
    #[error("`{func}` expects {expected}, got {got}")]
    Argument {
        func: String,
        expected: &'static str,
        got: &'static str,
    },
    /// A `matches` call whose pattern argument does not compile.
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// An ordering comparison between values that have no ordering.
    #[error("cannot compare {lhs} and {rhs}")]
    Comparison {
        lhs: &'static str,
        rhs: &'static str,
    },
    /// A non-boolean value where a boolean was required.
    #[error("expected a boolean, got {0}")]
    NotBoolean(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    PipePipe,
    AmpAmp,
    Bang,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Pipe => write!(f, "`|`"),
            Token::PipePipe => write!(f, "`||`"),
            Token::AmpAmp => write!(f, "`&&`"),
            Token::Bang => write!(f, "`!`"),
            Token::Eq => write!(f, "`==`"),
            Token::Ne => write!(f, "`!=`"),
            Token::Lt => write!(f, "`<`"),
            Token::Le => write!(f, "`<=`"),
            Token::Gt => write!(f, "`>`"),
            Token::Ge => write!(f, "`>=`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Comma => write!(f, "`,`"),
            Token::Dot => write!(f, "`.`"),
            Token::Ident(name) => write!(f, "`{name}`"),
            Token::Number(n) => write!(f, "`{n}`"),
            Token::Str(s) => write!(f, "`\"{s}\"`"),
            Token::True => write!(f, "`true`"),
            Token::False => write!(f, "`false`"),
            Token::Null => write!(f, "`null`"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {}
            '|' => {
                if chars.next_if(|&(_, n)| n == '|').is_some() {
                    tokens.push(Token::PipePipe);
                } else {
                    tokens.push(Token::Pipe);
                }
            }
            '&' => {
                if chars.next_if(|&(_, n)| n == '&').is_some() {
                    tokens.push(Token::AmpAmp);
                } else {
                    return Err(ExprError::UnexpectedChar('&', pos));
                }
            }
            '!' => {
                if chars.next_if(|&(_, n)| n == '=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '=' => {
                if chars.next_if(|&(_, n)| n == '=').is_some() {
                    tokens.push(Token::Eq);
                } else {
                    return Err(ExprError::UnexpectedChar('=', pos));
                }
            }
            '<' => {
                if chars.next_if(|&(_, n)| n == '=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                if chars.next_if(|&(_, n)| n == '=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '.' => tokens.push(Token::Dot),
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, ch)) if ch == quote => break,
                        Some((esc_pos, '\\')) => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, 'r')) => text.push('\r'),
                            Some((_, ch @ ('\\' | '\'' | '"' | '/'))) => text.push(ch),
                            Some((_, ch)) => {
                                return Err(ExprError::UnexpectedChar(ch, esc_pos + 1))
                            }
                            None => return Err(ExprError::UnterminatedString),
                        },
                        Some((_, ch)) => text.push(ch),
                        None => return Err(ExprError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '0'..='9' => {
                let mut text = String::from(c);
                while let Some(&(_, n)) = chars.peek() {
                    if n.is_ascii_digit() || n == '.' {
                        text.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::from(c);
                while let Some(&(_, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match name.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(name),
                });
            }
            c => return Err(ExprError::UnexpectedChar(c, pos)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    /// A dotted path; the first segment must name a parameter.
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ExprError> {
        let found = self.next()?;
        if found == token {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                expected: expected.to_string(),
                found: found.to_string(),
            })
        }
    }

    /// `|a, b| body` or `|| body` for a parameterless function.
    fn parse_params(&mut self) -> Result<Vec<String>, ExprError> {
        if self.eat(&Token::PipePipe) {
            return Ok(Vec::new());
        }
        self.expect(Token::Pipe, "`|` opening the parameter list")?;
        let mut params = Vec::new();
        if self.eat(&Token::Pipe) {
            return Ok(params);
        }
        loop {
            match self.next()? {
                Token::Ident(name) => params.push(name),
                found => {
                    return Err(ExprError::UnexpectedToken {
                        expected: "a parameter name".to_string(),
                        found: found.to_string(),
                    })
                }
            }
            match self.next()? {
                Token::Comma => {}
                Token::Pipe => break,
                found => {
                    return Err(ExprError::UnexpectedToken {
                        expected: "`,` or `|`".to_string(),
                        found: found.to_string(),
                    })
                }
            }
        }
        Ok(params)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::PipePipe) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::AmpAmp) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_unary()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next()? {
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Number(n) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            )),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Pipe | Token::PipePipe => Err(ExprError::NestedClosure),
            Token::Ident(name) if name == "this" || name == "eval" => {
                Err(ExprError::Disallowed(name))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            match self.next()? {
                                Token::Comma => {}
                                Token::RParen => break,
                                found => {
                                    return Err(ExprError::UnexpectedToken {
                                        expected: "`,` or `)`".to_string(),
                                        found: found.to_string(),
                                    })
                                }
                            }
                        }
                    }
                    return Ok(Expr::Call { func: name, args });
                }
                let mut path = vec![name];
                while self.eat(&Token::Dot) {
                    match self.next()? {
                        Token::Ident(segment) => path.push(segment),
                        found => {
                            return Err(ExprError::UnexpectedToken {
                                expected: "a field name".to_string(),
                                found: found.to_string(),
                            })
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            found => Err(ExprError::UnexpectedToken {
                expected: "an expression".to_string(),
                found: found.to_string(),
            }),
        }
    }
}

/// Reject identifiers that are neither parameters nor builtins.
///
/// Anything else would have been captured from the sender's scope, and
/// captured state does not survive cross-process transport.
fn check_identifiers(expr: &Expr, params: &[String]) -> Result<(), ExprError> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Path(path) => {
            if params.iter().any(|p| p == &path[0]) {
                Ok(())
            } else {
                Err(ExprError::FreeIdentifier(path[0].clone()))
            }
        }
        Expr::Not(operand) => check_identifiers(operand, params),
        Expr::Binary { lhs, rhs, .. } => {
            check_identifiers(lhs, params)?;
            check_identifiers(rhs, params)
        }
        Expr::Call { func, args } => {
            if !BUILTINS.contains(&func.as_str()) {
                return Err(ExprError::UnknownFunction(func.clone()));
            }
            for arg in args {
                check_identifiers(arg, params)?;
            }
            Ok(())
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn expect_bool(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ExprError::NotBoolean(type_name(other))),
    }
}

fn expect_str<'a>(func: &str, value: &'a Value) -> Result<&'a str, ExprError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ExprError::Argument {
            func: func.to_string(),
            expected: "a string",
            got: type_name(other),
        }),
    }
}

/// Integer and float representations of the same number compare equal.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn eval(expr: &Expr, env: &BTreeMap<String, Value>) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => {
            // Missing fields resolve to null so shape probes stay cheap.
            let mut current = env.get(&path[0]).cloned().unwrap_or(Value::Null);
            for segment in &path[1..] {
                current = current.get(segment).cloned().unwrap_or(Value::Null);
            }
            Ok(current)
        }
        Expr::Not(operand) => {
            let value = eval(operand, env)?;
            Ok(Value::Bool(!expect_bool(&value)?))
        }
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                if !expect_bool(&eval(lhs, env)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(&eval(rhs, env)?)?))
            }
            BinaryOp::Or => {
                if expect_bool(&eval(lhs, env)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(&eval(rhs, env)?)?))
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&eval(lhs, env)?, &eval(rhs, env)?))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&eval(lhs, env)?, &eval(rhs, env)?))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let left = eval(lhs, env)?;
                let right = eval(rhs, env)?;
                let ordering = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a
                        .as_f64()
                        .partial_cmp(&b.as_f64())
                        .ok_or(ExprError::Comparison {
                            lhs: "a number",
                            rhs: "a number",
                        })?,
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    (l, r) => {
                        return Err(ExprError::Comparison {
                            lhs: type_name(l),
                            rhs: type_name(r),
                        })
                    }
                };
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }
        },
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env)?);
            }
            call_builtin(func, &values)
        }
    }
}

fn call_builtin(func: &str, args: &[Value]) -> Result<Value, ExprError> {
    let arity = |expected: usize| -> Result<(), ExprError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExprError::Arity {
                func: func.to_string(),
                expected,
                got: args.len(),
            })
        }
    };

    match func {
        "matches" => {
            arity(2)?;
            let text = expect_str(func, &args[0])?;
            let pattern = expect_str(func, &args[1])?;
            let regex = regex::Regex::new(pattern).map_err(|source| ExprError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            Ok(Value::Bool(regex.is_match(text)))
        }
        "contains" => {
            arity(2)?;
            let haystack = expect_str(func, &args[0])?;
            let needle = expect_str(func, &args[1])?;
            Ok(Value::Bool(haystack.contains(needle)))
        }
        "starts_with" => {
            arity(2)?;
            let text = expect_str(func, &args[0])?;
            let prefix = expect_str(func, &args[1])?;
            Ok(Value::Bool(text.starts_with(prefix)))
        }
        "ends_with" => {
            arity(2)?;
            let text = expect_str(func, &args[0])?;
            let suffix = expect_str(func, &args[1])?;
            Ok(Value::Bool(text.ends_with(suffix)))
        }
        "len" => {
            arity(1)?;
            let length = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                other => {
                    return Err(ExprError::Argument {
                        func: func.to_string(),
                        expected: "a string or array",
                        got: type_name(other),
                    })
                }
            };
            Ok(serde_json::Number::from_f64(length as f64).map_or(Value::Null, Value::Number))
        }
        _ => Err(ExprError::UnknownFunction(func.to_string())),
    }
}

/// A compiled predicate expression.
///
/// Compilation checks the whole body up front: syntax, disallowed
/// constructs, and free identifiers all fail here rather than at the first
/// invocation.
#[derive(Debug, Clone)]
pub struct PredicateExpr {
    source: String,
    params: Vec<String>,
    body: Expr,
}

impl PredicateExpr {
    /// Compile `|params| body` source text.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let params = parser.parse_params()?;
        let body = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(ExprError::UnexpectedToken {
                expected: "end of expression".to_string(),
                found: extra.to_string(),
            });
        }
        check_identifiers(&body, &params)?;
        Ok(Self {
            source: source.to_string(),
            params,
            body,
        })
    }

    /// The source text the expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Declared parameter names, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Invoke with positional arguments. Missing arguments bind to null.
    pub fn call(&self, args: &[Value]) -> Result<Value, ExprError> {
        let mut env = BTreeMap::new();
        for (index, param) in self.params.iter().enumerate() {
            env.insert(
                param.clone(),
                args.get(index).cloned().unwrap_or(Value::Null),
            );
        }
        eval(&self.body, &env)
    }

    /// Invoke and require a boolean result.
    pub fn test(&self, args: &[Value]) -> Result<bool, ExprError> {
        expect_bool(&self.call(args)?)
    }
}

impl PartialEq for PredicateExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compiles_and_evaluates_comparison() {
        let expr = PredicateExpr::compile("|comment| comment.line > 2").unwrap();
        assert!(expr.test(&[json!({ "line": 3 })]).unwrap());
        assert!(!expr.test(&[json!({ "line": 1 })]).unwrap());
    }

    #[test]
    fn test_integer_context_equals_float_literal() {
        let expr = PredicateExpr::compile("|c| c.line == 2").unwrap();
        assert!(expr.test(&[json!({ "line": 2 })]).unwrap());
    }

    #[test]
    fn test_boolean_operators_short_circuit() {
        let expr =
            PredicateExpr::compile("|c| c.kind == 'block' && contains(c.text, '@license')")
                .unwrap();
        assert!(expr
            .test(&[json!({ "kind": "block", "text": "/* @license MIT */" })])
            .unwrap());
        // kind mismatch must not evaluate the contains() on a null text
        assert!(!expr.test(&[json!({ "kind": "line" })]).unwrap());
    }

    #[test]
    fn test_matches_builtin() {
        let expr = PredicateExpr::compile("|w| matches(w, 'foo|bar')").unwrap();
        assert!(expr.test(&[json!("a bar here")]).unwrap());
        assert!(!expr.test(&[json!("nothing")]).unwrap());
    }

    #[test]
    fn test_string_builtins() {
        let expr = PredicateExpr::compile(
            "|s| starts_with(s, 'a') && ends_with(s, 'z') && len(s) >= 3",
        )
        .unwrap();
        assert!(expr.test(&[json!("abz")]).unwrap());
        assert!(!expr.test(&[json!("az")]).unwrap());
    }

    #[test]
    fn test_parameterless_function() {
        let expr = PredicateExpr::compile("|| true").unwrap();
        assert!(expr.test(&[]).unwrap());
    }

    #[test]
    fn test_missing_argument_binds_null() {
        let expr = PredicateExpr::compile("|a, b| b == null").unwrap();
        assert!(expr.test(&[json!(1)]).unwrap());
    }

    #[test]
    fn test_missing_field_resolves_null() {
        let expr = PredicateExpr::compile("|c| c.absent.deeper == null").unwrap();
        assert!(expr.test(&[json!({})]).unwrap());
    }

    #[test]
    fn test_free_identifier_rejected_at_compile() {
        let err = PredicateExpr::compile("|c| c.line > threshold").unwrap_err();
        assert!(matches!(err, ExprError::FreeIdentifier(name) if name == "threshold"));
    }

    #[test]
    fn test_this_and_eval_rejected() {
        assert!(matches!(
            PredicateExpr::compile("|c| this == c").unwrap_err(),
            ExprError::Disallowed(name) if name == "this"
        ));
        assert!(matches!(
            PredicateExpr::compile("|c| eval('c')").unwrap_err(),
            ExprError::Disallowed(name) if name == "eval"
        ));
    }

    #[test]
    fn test_nested_closure_rejected() {
        let err = PredicateExpr::compile("|c| (|x| x)").unwrap_err();
        assert!(matches!(err, ExprError::NestedClosure));
    }

    #[test]
    fn test_unknown_function_rejected_at_compile() {
        let err = PredicateExpr::compile("|c| shout(c)").unwrap_err();
        assert!(matches!(err, ExprError::UnknownFunction(name) if name == "shout"));
    }

    #[test]
    fn test_syntax_error_reports_token() {
        let err = PredicateExpr::compile("|c| c ==").unwrap_err();
        assert!(matches!(err, ExprError::UnexpectedEnd));
    }

    #[test]
    fn test_non_boolean_condition_is_an_error() {
        let expr = PredicateExpr::compile("|c| c.text").unwrap();
        let err = expr.test(&[json!({ "text": "hi" })]).unwrap_err();
        assert!(matches!(err, ExprError::NotBoolean("a string")));
    }

    #[test]
    fn test_grouping_and_negation() {
        let expr = PredicateExpr::compile("|c| !(c.line > 10 || c.kind == 'line')").unwrap();
        assert!(expr.test(&[json!({ "line": 2, "kind": "block" })]).unwrap());
        assert!(!expr.test(&[json!({ "line": 20, "kind": "block" })]).unwrap());
    }

    #[test]
    fn test_escapes_in_string_literals() {
        let expr = PredicateExpr::compile(r#"|s| s == "a\"b""#).unwrap();
        assert!(expr.test(&[json!("a\"b")]).unwrap());
    }
}

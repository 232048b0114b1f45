// SPDX-License-Identifier: GPL-2.0-or-later

//! Inline helper expressions embedded in template text.
//!
//! Evaluation is two-pass: placeholders are substituted first, then any
//! remaining `{{...}}` block that parses as a helper expression (integer
//! arithmetic, string literals, helper function calls) is evaluated in
//! place. Blocks that do not parse are left untouched so the unresolved
//! variable check catches them before anything goes on the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lazy_regex::{lazy_regex, Lazy};
use rand::Rng;
use regex::Regex;
use thiserror::Error;

use super::{replacer, Variables};

static UNRESOLVED: Lazy<Regex> =
    lazy_regex!(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|§\s*([A-Za-z_][A-Za-z0-9_]*)\s*§");

static EXPRESSION: Lazy<Regex> = lazy_regex!(r"\{\{([^{}]+)\}\}");

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("unresolved variables found: {0}")]
    UnresolvedVariables(String),
    #[error("could not evaluate helper expression {expression}: {reason}")]
    Helper { expression: String, reason: String },
}

/// Returns an error if any placeholder token survives in `text`.
pub fn contains_unresolved_variables(text: &str) -> Result<(), ExpressionError> {
    contains_variables_with_ignore_list(&[], text)
}

/// Like [`contains_unresolved_variables`], but names on the ignore list
/// are allowed to remain (they are filled in later, e.g. by request
/// signing).
pub fn contains_variables_with_ignore_list(
    ignore: &[&str],
    text: &str,
) -> Result<(), ExpressionError> {
    let mut unresolved = Vec::new();
    for caps in UNRESOLVED.captures_iter(text) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if !ignore.contains(&name) && !unresolved.iter().any(|n| n == name) {
            unresolved.push(name.to_string());
        }
    }
    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(ExpressionError::UnresolvedVariables(unresolved.join(", ")))
    }
}

/// Substitutes placeholders and evaluates helper expressions in `text`.
pub fn evaluate(text: &str, vars: &Variables) -> Result<String, ExpressionError> {
    let substituted = replacer::replace(text, vars);
    let mut out = String::with_capacity(substituted.len());
    let mut last = 0;
    for caps in EXPRESSION.captures_iter(&substituted) {
        let whole = caps.get(0).unwrap();
        let inner = caps.get(1).unwrap().as_str();
        out.push_str(&substituted[last..whole.start()]);
        match Parser::new(inner).parse() {
            Ok(expr) => match expr.eval() {
                Ok(value) => out.push_str(&value.to_string()),
                Err(reason) => {
                    return Err(ExpressionError::Helper {
                        expression: inner.trim().to_string(),
                        reason,
                    });
                }
            },
            // not a helper expression, keep the token for the
            // unresolved variable check
            Err(_) => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&substituted[last..]);
    Ok(out)
}

/// Byte-level variant of [`evaluate`]. Data that is not valid UTF-8 only
/// receives placeholder substitution.
pub fn evaluate_bytes(data: &[u8], vars: &Variables) -> Result<Vec<u8>, ExpressionError> {
    match std::str::from_utf8(data) {
        Ok(text) => evaluate(text, vars).map(String::into_bytes),
        Err(_) => Ok(replacer::replace_bytes(data, vars)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Binary {
        op: char,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn eval(&self) -> Result<Value, String> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Binary { op, left, right } => {
                let left = left.eval()?;
                let right = right.eval()?;
                match (op, left, right) {
                    ('+', Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                    ('+', a, b) => Ok(Value::Str(format!("{a}{b}"))),
                    ('-', Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
                    ('*', Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
                    ('/', Value::Int(_), Value::Int(0)) => Err("division by zero".to_string()),
                    ('/', Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
                    (op, a, b) => Err(format!("operator {op} not defined for {a:?} and {b:?}")),
                }
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|a| a.eval())
                    .collect::<Result<Vec<_>, _>>()?;
                call_helper(name, &args)
            }
        }
    }
}

fn call_helper(name: &str, args: &[Value]) -> Result<Value, String> {
    let str_arg = |idx: usize| -> Result<String, String> {
        args.get(idx)
            .map(Value::to_string)
            .ok_or_else(|| format!("{name} misses argument {}", idx + 1))
    };
    let int_arg = |idx: usize| -> Result<i64, String> {
        match args.get(idx) {
            Some(Value::Int(n)) => Ok(*n),
            Some(other) => Err(format!("{name} expects an integer, got {other:?}")),
            None => Err(format!("{name} misses argument {}", idx + 1)),
        }
    };
    match name {
        "to_lower" => Ok(Value::Str(str_arg(0)?.to_lowercase())),
        "to_upper" => Ok(Value::Str(str_arg(0)?.to_uppercase())),
        "trim" => Ok(Value::Str(str_arg(0)?.trim().to_string())),
        "len" => Ok(Value::Int(str_arg(0)?.len() as i64)),
        "concat" => Ok(Value::Str(
            args.iter().map(Value::to_string).collect::<String>(),
        )),
        "contains" => Ok(Value::Bool(str_arg(0)?.contains(&str_arg(1)?))),
        "replace" => Ok(Value::Str(
            str_arg(0)?.replace(&str_arg(1)?, &str_arg(2)?),
        )),
        "base64" => Ok(Value::Str(BASE64.encode(str_arg(0)?))),
        "base64_decode" => {
            let decoded = BASE64
                .decode(str_arg(0)?)
                .map_err(|e| format!("invalid base64: {e}"))?;
            Ok(Value::Str(String::from_utf8_lossy(&decoded).into_owned()))
        }
        "hex_encode" => Ok(Value::Str(hex::encode(str_arg(0)?))),
        "hex_decode" => {
            let decoded =
                hex::decode(str_arg(0)?).map_err(|e| format!("invalid hex: {e}"))?;
            Ok(Value::Str(String::from_utf8_lossy(&decoded).into_owned()))
        }
        "md5" => Ok(Value::Str(format!("{:x}", md5::compute(str_arg(0)?)))),
        "rand_int" => {
            let min = int_arg(0)?;
            let max = int_arg(1)?;
            if min >= max {
                return Err("rand_int expects min < max".to_string());
            }
            Ok(Value::Int(rand::thread_rng().gen_range(min..=max)))
        }
        _ => Err(format!("unknown helper function {name}")),
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, String> {
        let expr = self.expression()?;
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(format!("trailing input in expression: {}", self.input));
        }
        // a bare identifier or literal string is not an expression,
        // demand at least one operator or call
        match expr {
            Expr::Literal(Value::Str(_)) => Err("bare literal".to_string()),
            _ => Ok(expr),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, wanted: char) -> Result<(), String> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            other => Err(format!("expected {wanted}, got {other:?}")),
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(op @ ('+' | '-')) => {
                    self.bump();
                    let right = self.term()?;
                    left = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(op @ ('*' | '/')) => {
                    self.bump();
                    let right = self.factor()?;
                    left = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                _ => return Ok(left),
            }
        }
    }

    fn factor(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let expr = self.expression()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some(q @ ('"' | '\'')) => {
                self.bump();
                let mut value = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == q => break,
                        Some('\\') => match self.bump() {
                            Some('n') => value.push('\n'),
                            Some('r') => value.push('\r'),
                            Some('t') => value.push('\t'),
                            Some(c) => value.push(c),
                            None => return Err("unterminated string".to_string()),
                        },
                        Some(c) => value.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                Ok(Expr::Literal(Value::Str(value)))
            }
            Some(c) if c.is_ascii_digit() => {
                let mut n = 0i64;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    n = n
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(self.bump().unwrap() as i64 - '0' as i64))
                        .ok_or("integer overflow")?;
                }
                Ok(Expr::Literal(Value::Int(n)))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.bump();
                    let mut args = Vec::new();
                    self.skip_ws();
                    if self.peek() != Some(')') {
                        loop {
                            args.push(self.expression()?);
                            self.skip_ws();
                            match self.peek() {
                                Some(',') => {
                                    self.bump();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(')')?;
                    Ok(Expr::Call { name, args })
                } else {
                    // bare identifier, an unsubstituted variable
                    Err(format!("not an expression: {name}"))
                }
            }
            other => Err(format!("unexpected input {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        [("Host", "Example.COM"), ("Port", "8080")]
            .into_iter()
            .collect()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(evaluate("{{2+2*10}}", &vars()).unwrap(), "22");
        assert_eq!(evaluate("{{(2+2)*10}}", &vars()).unwrap(), "40");
    }

    #[test]
    fn helper_functions() {
        let vars = vars();
        assert_eq!(
            evaluate("{{to_lower(\"{{Host}}\")}}", &vars).unwrap(),
            "example.com"
        );
        assert_eq!(evaluate("{{base64('ab')}}", &vars).unwrap(), "YWI=");
        assert_eq!(evaluate("{{hex_encode('ab')}}", &vars).unwrap(), "6162");
        assert_eq!(evaluate("{{len('abcd')}}", &vars).unwrap(), "4");
    }

    #[test]
    fn unresolved_token_is_kept() {
        let out = evaluate("{{missing}}/x", &vars()).unwrap();
        assert_eq!(out, "{{missing}}/x");
        assert!(contains_unresolved_variables(&out).is_err());
    }

    #[test]
    fn ignore_list_allows_named_placeholders() {
        let text = "GET /{{region}} HTTP/1.1";
        assert!(contains_unresolved_variables(text).is_err());
        assert!(contains_variables_with_ignore_list(&["region"], text).is_ok());
    }

    #[test]
    fn helper_failure_is_an_error() {
        assert!(evaluate("{{hex_decode('zz')}}", &vars()).is_err());
    }

    #[test]
    fn non_utf8_data_gets_substitution_only() {
        let vars: Variables = [("v", "ok")].into_iter().collect();
        let data = b"\xff{{v}}".to_vec();
        assert_eq!(evaluate_bytes(&data, &vars).unwrap(), b"\xffok".to_vec());
    }
}

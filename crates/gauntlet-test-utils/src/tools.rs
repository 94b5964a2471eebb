//! Fixture tools with known, deterministic behavior

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use gauntlet_core::Tool;
use gauntlet_schema::{Schema, TypedSchema};
use serde_json::{json, Value};

/// Evaluates arithmetic expressions: `{"expression": "2+2"}` -> `{"result": 4}`.
///
/// Supports `+ - * /` with the usual precedence and parentheses, enough for
/// scenario tests without pulling in an expression crate.
#[derive(Debug, Clone, Copy)]
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "evaluate an arithmetic expression"
    }

    fn input_schema(&self) -> Schema {
        Schema::Typed(
            TypedSchema::object()
                .required("expression", TypedSchema::String)
                .build(),
        )
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let expression = input["expression"]
            .as_str()
            .ok_or("expression must be a string")?;
        let result = eval(expression)?;
        // Integers come back as integers so assertions stay exact.
        if result.fract() == 0.0 && result.abs() < 1e15 {
            Ok(json!({ "result": result as i64 }))
        } else {
            Ok(json!({ "result": result }))
        }
    }
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "return the input unchanged"
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        Ok(input)
    }
}

/// Fails a configured number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyTool {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyTool {
    /// A tool that fails its first `failures` invocations.
    #[must_use]
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    /// Invocations so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "fails a configured number of times, then succeeds"
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(format!("transient failure {}", call + 1))
        } else {
            Ok(json!({ "ok": true, "echo": input }))
        }
    }
}

/// Recursive-descent evaluation over `+ - * /` and parentheses.
fn eval(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut pos = 0;
    let value = parse_sum(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected trailing input in \"{expression}\""));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("bad number \"{literal}\""))?;
                tokens.push(Token::Number(number));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_sum(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_product(tokens, pos)?;
    while let Some(op) = tokens.get(*pos) {
        match op {
            Token::Plus => {
                *pos += 1;
                value += parse_product(tokens, pos)?;
            }
            Token::Minus => {
                *pos += 1;
                value -= parse_product(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_product(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_atom(tokens, pos)?;
    while let Some(op) = tokens.get(*pos) {
        match op {
            Token::Star => {
                *pos += 1;
                value *= parse_atom(tokens, pos)?;
            }
            Token::Slash => {
                *pos += 1;
                let divisor = parse_atom(tokens, pos)?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some(Token::Number(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Token::Minus) => {
            *pos += 1;
            Ok(-parse_atom(tokens, pos)?)
        }
        Some(Token::Open) => {
            *pos += 1;
            let value = parse_sum(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::Close) => {
                    *pos += 1;
                    Ok(value)
                }
                _ => Err("unbalanced parentheses".to_string()),
            }
        }
        _ => Err("expected a number".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calculator_handles_precedence() {
        let out = CalculatorTool
            .execute(json!({"expression": "2+3*4"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"result": 14}));
    }

    #[tokio::test]
    async fn calculator_handles_parentheses_and_negatives() {
        let out = CalculatorTool
            .execute(json!({"expression": "(2+3)*-2"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"result": -10}));
    }

    #[tokio::test]
    async fn calculator_rejects_garbage() {
        assert!(CalculatorTool
            .execute(json!({"expression": "2+"}))
            .await
            .is_err());
        assert!(CalculatorTool
            .execute(json!({"expression": "1/0"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn flaky_fails_then_succeeds() {
        let tool = FlakyTool::new(2);
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({})).await.is_ok());
        assert_eq!(tool.calls(), 3);
    }

    #[tokio::test]
    async fn echo_is_identity() {
        let input = json!({"a": [1, 2, 3]});
        assert_eq!(EchoTool.execute(input.clone()).await.unwrap(), input);
    }
}

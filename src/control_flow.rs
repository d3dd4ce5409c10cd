//! Condition / Switch / ForEach evaluators.
//!
//! No teacher equivalent exists (the grounding engine's `do` blocks have no
//! boolean conditionals or fan-out), so the condition grammar below is a
//! small hand-rolled recursive-descent parser rather than adapted from any
//! source file.

use crate::model::TemplateContext;
use crate::template;
use serde_json::Value;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("condition expression error: {message}"))]
    Condition { message: String },

    #[snafu(display("switch value did not match any case and no default was provided"))]
    SwitchNoMatch,

    #[snafu(display("template error: {source}"))]
    Template { source: crate::template::Error },
}

impl From<crate::template::Error> for Error {
    fn from(source: crate::template::Error) -> Self {
        Error::Template { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct ConditionOutcome {
    pub should_execute: bool,
    pub evaluated_expression: String,
}

/// Resolve every `{{…}}` in `if_expr` against `ctx`, then evaluate the
/// resulting boolean expression.
pub async fn evaluate_condition(if_expr: &str, ctx: &TemplateContext) -> Result<ConditionOutcome> {
    let resolved = template::resolve(if_expr, ctx).await?;
    let value = parse_bool_expr(&resolved)?;
    Ok(ConditionOutcome { should_execute: value, evaluated_expression: resolved })
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Bool(bool),
    Number(f64),
    Str(String),
    Null,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Lit(Literal),
    And,
    Or,
    Not,
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { chars: input.chars().peekable() }
    }

    fn tokenize(mut self) -> std::result::Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            match c {
                '&' => {
                    self.chars.next();
                    if self.chars.next() != Some('&') {
                        return Err("expected '&&'".to_string());
                    }
                    tokens.push(Token::And);
                }
                '|' => {
                    self.chars.next();
                    if self.chars.next() != Some('|') {
                        return Err("expected '||'".to_string());
                    }
                    tokens.push(Token::Or);
                }
                '!' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Ne);
                    } else {
                        tokens.push(Token::Not);
                    }
                }
                '=' => {
                    self.chars.next();
                    if self.chars.next() != Some('=') {
                        return Err("expected '=='".to_string());
                    }
                    tokens.push(Token::Eq);
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Gte);
                    } else {
                        tokens.push(Token::Gt);
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Lte);
                    } else {
                        tokens.push(Token::Lt);
                    }
                }
                '\'' | '"' => {
                    let quote = c;
                    self.chars.next();
                    let mut s = String::new();
                    for ch in self.chars.by_ref() {
                        if ch == quote {
                            break;
                        }
                        s.push(ch);
                    }
                    tokens.push(Token::Lit(Literal::Str(s)));
                }
                _ if c.is_ascii_digit() || c == '-' => {
                    let mut s = String::new();
                    s.push(c);
                    self.chars.next();
                    while let Some(&d) = self.chars.peek() {
                        if d.is_ascii_digit() || d == '.' {
                            s.push(d);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    let n: f64 = s.parse().map_err(|_| format!("invalid number literal '{s}'"))?;
                    tokens.push(Token::Lit(Literal::Number(n)));
                }
                _ if c.is_alphabetic() || c == '_' => {
                    let mut s = String::new();
                    while let Some(&d) = self.chars.peek() {
                        if d.is_alphanumeric() || d == '_' {
                            s.push(d);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    match s.as_str() {
                        "true" => tokens.push(Token::Lit(Literal::Bool(true))),
                        "false" => tokens.push(Token::Lit(Literal::Bool(false))),
                        "null" => tokens.push(Token::Lit(Literal::Null)),
                        other => tokens.push(Token::Lit(Literal::Str(other.to_string()))),
                    }
                }
                other => return Err(format!("unexpected character '{other}' in condition expression")),
            }
        }
        Ok(tokens)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let rhs = self.parse_and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let rhs = self.parse_unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn parse_unary(&mut self) -> std::result::Result<bool, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            return Ok(!self.parse_unary()?);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> std::result::Result<bool, String> {
        let lhs = self.parse_literal()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(Token::Eq),
            Some(Token::Ne) => Some(Token::Ne),
            Some(Token::Gt) => Some(Token::Gt),
            Some(Token::Lt) => Some(Token::Lt),
            Some(Token::Gte) => Some(Token::Gte),
            Some(Token::Lte) => Some(Token::Lte),
            _ => None,
        };
        match op {
            None => truthy(&lhs),
            Some(op) => {
                self.next();
                let rhs = self.parse_literal()?;
                compare(&lhs, &op, &rhs)
            }
        }
    }

    fn parse_literal(&mut self) -> std::result::Result<Literal, String> {
        match self.next() {
            Some(Token::Lit(lit)) => Ok(lit),
            other => Err(format!("expected a literal, found {other:?}")),
        }
    }
}

fn truthy(lit: &Literal) -> std::result::Result<bool, String> {
    Ok(match lit {
        Literal::Bool(b) => *b,
        Literal::Number(n) => *n != 0.0,
        Literal::Str(s) => !s.is_empty() && s != "false",
        Literal::Null => false,
    })
}

fn compare(lhs: &Literal, op: &Token, rhs: &Literal) -> std::result::Result<bool, String> {
    match op {
        Token::Eq => Ok(literal_eq(lhs, rhs)),
        Token::Ne => Ok(!literal_eq(lhs, rhs)),
        Token::Gt | Token::Lt | Token::Gte | Token::Lte => {
            let (a, b) = match (lhs, rhs) {
                (Literal::Number(a), Literal::Number(b)) => (*a, *b),
                _ => return Err("ordering operators require numeric operands".to_string()),
            };
            Ok(match op {
                Token::Gt => a > b,
                Token::Lt => a < b,
                Token::Gte => a >= b,
                Token::Lte => a <= b,
                _ => unreachable!(),
            })
        }
        _ => unreachable!(),
    }
}

fn literal_eq(lhs: &Literal, rhs: &Literal) -> bool {
    match (lhs, rhs) {
        (Literal::Bool(a), Literal::Bool(b)) => a == b,
        (Literal::Number(a), Literal::Number(b)) => a == b,
        (Literal::Str(a), Literal::Str(b)) => a == b,
        (Literal::Null, Literal::Null) => true,
        _ => false,
    }
}

fn parse_bool_expr(resolved: &str) -> Result<bool> {
    let tokens = Tokenizer::new(resolved)
        .tokenize()
        .map_err(|message| Error::Condition { message })?;
    if tokens.is_empty() {
        return Err(Error::Condition { message: "empty condition expression".to_string() });
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_or().map_err(|message| Error::Condition { message })?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Condition { message: "trailing tokens after condition expression".to_string() });
    }
    Ok(value)
}

/// Resolve `switch.value`, compare case-insensitively against each case's
/// `match` (with `"null"` matching empty/null), first match wins.
pub async fn evaluate_switch(switch: &crate::model::SwitchBlock, ctx: &TemplateContext) -> Result<String> {
    let resolved = template::resolve(&switch.value, ctx).await?;
    let normalized = resolved.trim().to_lowercase();

    for case in &switch.cases {
        let case_match = case.match_value.trim().to_lowercase();
        let matches = if case_match == "null" {
            normalized.is_empty() || normalized == "null"
        } else {
            case_match == normalized
        };
        if matches {
            return Ok(case.task_ref.clone());
        }
    }

    switch.default.clone().ok_or(Error::SwitchNoMatch)
}

/// Fan out `forEach.items` into per-item child contexts sharing the
/// parent's task outputs but carrying fresh `item`/`index` input fields,
/// invoking `body` for each with concurrency bounded by `max_concurrency`
/// (`0` = unlimited).
pub async fn evaluate_for_each<F, Fut, T>(
    for_each: &crate::model::ForEachBlock,
    ctx: &TemplateContext,
    body: F,
) -> Result<Vec<T>>
where
    F: Fn(TemplateContext, usize) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = T> + Send,
    T: Send,
{
    let resolved = template::resolve(&for_each.items, ctx).await?;
    let items = parse_items(&resolved)?;

    let semaphore = if for_each.max_concurrency == 0 {
        None
    } else {
        Some(std::sync::Arc::new(tokio::sync::Semaphore::new(for_each.max_concurrency)))
    };

    let mut futures = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let mut input = match ctx.input().clone() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        input.insert(for_each.item_var.clone(), item);
        input.insert(for_each.index_var.clone(), Value::from(index));
        let child_ctx = ctx.with_input(Value::Object(input));
        let permit = semaphore.clone();
        futures.push(async move {
            let _guard = match &permit {
                Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore not closed")),
                None => None,
            };
            body(child_ctx, index).await
        });
    }

    Ok(futures::future::join_all(futures).await)
}

fn parse_items(resolved: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(resolved).map_err(|e| Error::Condition {
        message: format!("forEach.items did not resolve to a JSON array: {e}"),
    })?;
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Error::Condition {
            message: format!("forEach.items resolved to non-array value: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForEachBlock, SwitchBlock, SwitchCase};

    fn ctx(input: Value) -> TemplateContext {
        TemplateContext::new(input)
    }

    #[tokio::test]
    async fn simple_comparison_is_true() {
        let outcome = evaluate_condition("{{input.age}} >= 18", &ctx(serde_json::json!({"age": 25})))
            .await
            .unwrap();
        assert!(outcome.should_execute);
    }

    #[tokio::test]
    async fn logical_and_short_circuits_correctly() {
        let outcome = evaluate_condition(
            "{{input.active}} == true && {{input.age}} >= 21",
            &ctx(serde_json::json!({"active": true, "age": 18})),
        )
        .await
        .unwrap();
        assert!(!outcome.should_execute);
    }

    #[tokio::test]
    async fn negation_flips_result() {
        let outcome = evaluate_condition("!false", &ctx(serde_json::json!({}))).await.unwrap();
        assert!(outcome.should_execute);
    }

    #[tokio::test]
    async fn switch_matches_case_insensitively() {
        let switch = SwitchBlock {
            value: "{{input.tier}}".to_string(),
            cases: vec![SwitchCase { match_value: "GOLD".to_string(), task_ref: "goldTask".to_string() }],
            default: None,
        };
        let result = evaluate_switch(&switch, &ctx(serde_json::json!({"tier": "gold"}))).await.unwrap();
        assert_eq!(result, "goldTask");
    }

    #[tokio::test]
    async fn switch_falls_back_to_default() {
        let switch = SwitchBlock {
            value: "{{input.tier}}".to_string(),
            cases: vec![SwitchCase { match_value: "gold".to_string(), task_ref: "goldTask".to_string() }],
            default: Some("basicTask".to_string()),
        };
        let result = evaluate_switch(&switch, &ctx(serde_json::json!({"tier": "bronze"}))).await.unwrap();
        assert_eq!(result, "basicTask");
    }

    #[tokio::test]
    async fn switch_without_match_or_default_fails() {
        let switch = SwitchBlock {
            value: "{{input.tier}}".to_string(),
            cases: vec![SwitchCase { match_value: "gold".to_string(), task_ref: "goldTask".to_string() }],
            default: None,
        };
        let err = evaluate_switch(&switch, &ctx(serde_json::json!({"tier": "bronze"}))).await.unwrap_err();
        assert!(matches!(err, Error::SwitchNoMatch));
    }

    #[tokio::test]
    async fn for_each_runs_body_per_item() {
        let for_each = ForEachBlock {
            items: "{{input.items}}".to_string(),
            item_var: "item".to_string(),
            index_var: "index".to_string(),
            max_concurrency: 0,
        };
        let results = evaluate_for_each(&for_each, &ctx(serde_json::json!({"items": [10, 20, 30]})), |c, i| async move {
            (i, c.input().get("item").cloned().unwrap())
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1], (1, serde_json::json!(20)));
    }
}

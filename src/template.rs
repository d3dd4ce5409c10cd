//! Template parser and resolver.
//!
//! The grammar recognized inside `{{ }}` is deliberately narrow —
//! `input.<path>` or `tasks.<id>.output.<path>` — so this module hand-rolls
//! a small scanner/parser rather than reusing a general expression engine:
//! a full jq-style engine speaks a much larger grammar than this one needs,
//! and would risk silently accepting expressions that should be rejected.

use crate::model::TemplateContext;
use regex::Regex;
use serde_json::Value;
use snafu::prelude::*;
use std::sync::LazyLock;
use tracing::trace;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("template parse error: {}", errors.join("; ")))]
    Parse { errors: Vec<String> },

    #[snafu(display("template resolution error: {message}"))]
    Resolution { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\[(\d+)\])?$").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Input,
    TaskOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedExpression {
    pub kind: ExpressionKind,
    pub task_id: Option<String>,
    pub path: Vec<PathSegment>,
    /// Byte range of the whole `{{...}}` substring within the source template.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub expressions: Vec<ParsedExpression>,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Parse every `{{...}}` occurrence in `template`. Identity for templates
/// with no markers (an empty, valid result).
#[must_use]
pub fn parse(template: &str) -> ParseResult {
    let mut expressions = Vec::new();
    let mut errors = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel_start) = template[cursor..].find("{{") {
        let start = cursor + rel_start;
        match template[start + 2..].find("}}") {
            Some(rel_end) => {
                let inner_start = start + 2;
                let inner_end = inner_start + rel_end;
                let end = inner_end + 2;
                let inner = template[inner_start..inner_end].trim();
                match parse_expression(inner) {
                    Ok((kind, task_id, path)) => expressions.push(ParsedExpression {
                        kind,
                        task_id,
                        path,
                        start,
                        end,
                    }),
                    Err(e) => errors.push(format!("invalid expression '{{{{{inner}}}}}': {e}")),
                }
                cursor = end;
            }
            None => {
                errors.push(format!(
                    "unbalanced '{{{{' at offset {start} has no matching '}}}}'"
                ));
                break;
            }
        }
    }

    ParseResult {
        valid: errors.is_empty(),
        expressions,
        errors,
    }
}

fn parse_expression(
    inner: &str,
) -> std::result::Result<(ExpressionKind, Option<String>, Vec<PathSegment>), String> {
    let mut parts = inner.split('.');
    let root = parts.next().filter(|s| !s.is_empty()).ok_or("empty expression")?;

    match root {
        "input" => {
            let rest: Vec<&str> = parts.collect();
            let path = parse_segments(&rest)?;
            Ok((ExpressionKind::Input, None, path))
        }
        "tasks" => {
            let task_id = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or("expected a task id after 'tasks.'")?
                .to_string();
            match parts.next() {
                Some("output") => {
                    let rest: Vec<&str> = parts.collect();
                    let path = parse_segments(&rest)?;
                    Ok((ExpressionKind::TaskOutput, Some(task_id), path))
                }
                _ => Err(format!(
                    "expected 'tasks.{task_id}.output[.path]', got '{inner}'"
                )),
            }
        }
        other => Err(format!(
            "expression must start with 'input' or 'tasks', got '{other}'"
        )),
    }
}

fn parse_segments(parts: &[&str]) -> std::result::Result<Vec<PathSegment>, String> {
    parts
        .iter()
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let caps = SEGMENT_RE
                .captures(segment)
                .ok_or_else(|| format!("invalid path segment '{segment}'"))?;
            let name = caps[1].to_string();
            let index = caps
                .get(3)
                .map(|m| m.as_str().parse::<usize>().expect("digits"));
            Ok(PathSegment { name, index })
        })
        .collect()
}

fn navigate(root: &Value, path: &[PathSegment]) -> Option<Value> {
    let mut current = root.clone();
    for segment in path {
        current = current.as_object()?.get(&segment.name)?.clone();
        if let Some(index) = segment.index {
            current = current.as_array()?.get(index)?.clone();
        }
    }
    Some(current)
}

/// Resolved scalars use their canonical textual form; objects and arrays are
/// JSON-serialized. Downstream code re-parses strings starting with `{` or
/// `[` to recover structured values during input merging.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

async fn resolve_value(expr: &ParsedExpression, ctx: &TemplateContext) -> Result<Value> {
    match expr.kind {
        ExpressionKind::Input => navigate(ctx.input(), &expr.path).context(ResolutionSnafu {
            message: format!("missing input field at path {:?}", expr.path),
        }),
        ExpressionKind::TaskOutput => {
            let task_id = expr.task_id.as_deref().unwrap_or_default();
            let output = ctx.get_output(task_id).await.context(ResolutionSnafu {
                message: format!("task '{task_id}' has not completed"),
            })?;
            if expr.path.is_empty() {
                Ok(output)
            } else {
                navigate(&output, &expr.path).context(ResolutionSnafu {
                    message: format!("missing field at path {:?} in task '{task_id}' output", expr.path),
                })
            }
        }
    }
}

/// Resolve every `{{...}}` substitution in `template` against `ctx`,
/// returning the fully-substituted string. The identity for templates with
/// no markers.
pub async fn resolve(template: &str, ctx: &TemplateContext) -> Result<String> {
    let parsed = parse(template);
    if !parsed.valid {
        return ParseSnafu {
            errors: parsed.errors,
        }
        .fail();
    }
    if parsed.expressions.is_empty() {
        return Ok(template.to_string());
    }

    let mut result = String::with_capacity(template.len());
    let mut last = 0usize;
    for expr in &parsed.expressions {
        result.push_str(&template[last..expr.start]);
        let value = resolve_value(expr, ctx).await?;
        trace!(?expr.kind, "resolved template expression");
        result.push_str(&to_canonical_string(&value));
        last = expr.end;
    }
    result.push_str(&template[last..]);
    Ok(result)
}

/// Static validity check used by the validator: parses the template without
/// resolving it, surfacing the same errors `resolve` would raise at runtime.
pub fn parse_checked(template: &str) -> std::result::Result<(), String> {
    let parsed = parse(template);
    if parsed.valid {
        Ok(())
    } else {
        Err(parsed.errors.join("; "))
    }
}

/// Every distinct `tasks.<id>` reference in `template`, used by the graph
/// builder (§4.2) and the output-mapping validator (§4.12).
#[must_use]
pub fn referenced_task_ids(template: &str) -> Vec<String> {
    let parsed = parse(template);
    let mut ids = Vec::new();
    for expr in parsed.expressions {
        if expr.kind == ExpressionKind::TaskOutput {
            if let Some(id) = expr.task_id {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_markers() {
        let parsed = parse("no markers here");
        assert!(parsed.valid);
        assert!(parsed.expressions.is_empty());
    }

    #[test]
    fn unbalanced_marker_is_invalid() {
        let parsed = parse("prefix {{input.a suffix");
        assert!(!parsed.valid);
    }

    #[test]
    fn rejects_unknown_root() {
        let parsed = parse("{{foo.bar}}");
        assert!(!parsed.valid);
    }

    #[test]
    fn parses_input_path_with_index() {
        let parsed = parse("{{input.items[2].name}}");
        assert!(parsed.valid);
        let expr = &parsed.expressions[0];
        assert_eq!(expr.kind, ExpressionKind::Input);
        assert_eq!(expr.path[0].name, "items");
        assert_eq!(expr.path[0].index, Some(2));
        assert_eq!(expr.path[1].name, "name");
    }

    #[test]
    fn parses_task_output_with_empty_path() {
        let parsed = parse("{{tasks.A.output}}");
        assert!(parsed.valid);
        let expr = &parsed.expressions[0];
        assert_eq!(expr.kind, ExpressionKind::TaskOutput);
        assert_eq!(expr.task_id.as_deref(), Some("A"));
        assert!(expr.path.is_empty());
    }

    #[tokio::test]
    async fn resolves_scalar_identity() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        assert_eq!(resolve("plain string", &ctx).await.unwrap(), "plain string");
    }

    #[tokio::test]
    async fn resolves_input_scalar() {
        let ctx = TemplateContext::new(serde_json::json!({"name": "Ada"}));
        assert_eq!(resolve("hello {{input.name}}", &ctx).await.unwrap(), "hello Ada");
    }

    #[tokio::test]
    async fn resolves_object_to_json() {
        let ctx = TemplateContext::new(serde_json::json!({"obj": {"a": 1}}));
        assert_eq!(resolve("{{input.obj}}", &ctx).await.unwrap(), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn resolves_task_output() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        ctx.insert_output("A", serde_json::json!({"x": 42})).await;
        assert_eq!(
            resolve("{{tasks.A.output.x}}", &ctx).await.unwrap(),
            "42"
        );
    }

    #[tokio::test]
    async fn missing_task_output_is_error() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        let err = resolve("{{tasks.A.output.x}}", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn missing_input_field_is_error() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        let err = resolve("{{input.missing}}", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn round_trip_preserves_substring_set() {
        let template = "{{input.a}} and {{tasks.B.output.c}}";
        let parsed = parse(template);
        let substrings: Vec<&str> = parsed
            .expressions
            .iter()
            .map(|e| &template[e.start..e.end])
            .collect();
        assert_eq!(substrings, vec!["{{input.a}}", "{{tasks.B.output.c}}"]);
    }
}

//! Transform Pipeline Executor.
//!
//! A small algebra: a sequence of typed operations applied left-to-right
//! over a JSON-element array, dispatched on the `TransformOperation` tag
//! from `model/task.rs` rather than by runtime polymorphism.

use super::{Error, Result, TransformSnafu as Transform};
use crate::model::context::TemplateContext;
use crate::model::task::{
    AggFunc, Aggregation, FilterOp, JoinType, SortOrder, TransformDefinition, TransformOperation,
};
use crate::template;
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::{Map, Value};
use snafu::prelude::*;

/// Run the legacy single-path/query form, or the typed pipeline when
/// present (the pipeline wins when both are set).
pub async fn execute(def: &TransformDefinition, ctx: &TemplateContext) -> Result<Value> {
    let base = match &def.input {
        Some(template_str) => parse_resolved(&template::resolve(template_str, ctx).await?),
        None => ctx.input().clone(),
    };

    if let Some(pipeline) = &def.pipeline {
        let mut data = as_array(base);
        for op in pipeline {
            data = apply(op, data, ctx).await?;
        }
        return Ok(Value::Array(data));
    }

    if let Some(path) = def.json_path.as_ref().or(def.query.as_ref()) {
        return Ok(get_path(&base, path));
    }

    Ok(base)
}

fn parse_resolved(resolved: &str) -> Value {
    let trimmed = resolved.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(resolved).unwrap_or_else(|_| Value::String(resolved.to_string()))
    } else {
        Value::String(resolved.to_string())
    }
}

fn as_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

async fn apply(op: &TransformOperation, data: Vec<Value>, ctx: &TemplateContext) -> Result<Vec<Value>> {
    match op {
        TransformOperation::Select { fields } => Ok(data
            .into_iter()
            .map(|elem| {
                let mut out = Map::new();
                for (name, path) in fields {
                    out.insert(name.clone(), get_path(&elem, path));
                }
                Value::Object(out)
            })
            .collect()),

        TransformOperation::Filter { field, op, value } => Ok(data
            .into_iter()
            .filter(|elem| compare(&get_path(elem, field), *op, value))
            .collect()),

        TransformOperation::Map { mappings } => Ok(data
            .into_iter()
            .map(|elem| {
                let mut out = Map::new();
                for (name, expr) in mappings {
                    out.insert(name.clone(), get_path(&elem, expr));
                }
                Value::Object(out)
            })
            .collect()),

        TransformOperation::FlatMap { field } => {
            let mut out = Vec::new();
            for elem in &data {
                if let Value::Array(items) = get_path(elem, field) {
                    out.extend(items);
                }
            }
            Ok(out)
        }

        TransformOperation::GroupBy { key, aggregations } => Ok(group_by(data, key, aggregations)),

        TransformOperation::Join {
            left_key,
            right_key,
            join_type,
            with,
        } => {
            let right = as_array(parse_resolved(&template::resolve(with, ctx).await?));
            Ok(join(data, right, left_key, right_key, *join_type))
        }

        TransformOperation::SortBy { field, order } => {
            let mut out = data;
            out.sort_by(|a, b| compare_values(&get_path(a, field), &get_path(b, field)));
            if *order == SortOrder::Desc {
                out.reverse();
            }
            Ok(out)
        }

        TransformOperation::Aggregate { function, field, as_ } => {
            let value = aggregate(&data, *function, field.as_deref());
            let mut out = Map::new();
            out.insert(as_.clone(), value);
            Ok(vec![Value::Object(out)])
        }

        TransformOperation::Limit { count } => {
            if *count == 0 {
                return Transform { message: "limit.count must be > 0".to_string() }.fail();
            }
            Ok(data.into_iter().take(*count).collect())
        }

        TransformOperation::Skip { count } => Ok(data.into_iter().skip(*count).collect()),

        TransformOperation::Enrich { fields } => {
            let mut out = Vec::with_capacity(data.len());
            for elem in data {
                let elem_ctx = ctx.with_input(elem.clone());
                let mut obj = as_object(elem);
                for (name, tmpl) in fields {
                    let resolved = template::resolve(tmpl, &elem_ctx).await?;
                    obj.insert(name.clone(), parse_resolved(&resolved));
                }
                out.push(Value::Object(obj));
            }
            Ok(out)
        }

        TransformOperation::Uppercase { field, as_ } => Ok(map_string(data, field, as_, |s| s.to_uppercase())),
        TransformOperation::Lowercase { field, as_ } => Ok(map_string(data, field, as_, |s| s.to_lowercase())),
        TransformOperation::Trim { field, as_ } => Ok(map_string(data, field, as_, |s| s.trim().to_string())),

        TransformOperation::Split { field, separator, as_ } => Ok(data
            .into_iter()
            .map(|elem| {
                let s = value_as_string(&get_path(&elem, field));
                let parts: Vec<Value> = s.split(separator.as_str()).map(|p| Value::String(p.to_string())).collect();
                set_field(elem, as_, Value::Array(parts))
            })
            .collect()),

        TransformOperation::Concat { fields, separator, as_ } => Ok(data
            .into_iter()
            .map(|elem| {
                let joined = fields
                    .iter()
                    .map(|f| value_as_string(&get_path(&elem, f)))
                    .collect::<Vec<_>>()
                    .join(separator);
                set_field(elem, as_, Value::String(joined))
            })
            .collect()),

        TransformOperation::Replace {
            field,
            pattern,
            replacement,
            as_,
        } => {
            let re = Regex::new(pattern).map_err(|e| Error::Transform {
                message: format!("invalid replace pattern '{pattern}': {e}"),
            })?;
            Ok(map_string(data, field, as_, |s| re.replace_all(&s, replacement.as_str()).to_string()))
        }

        TransformOperation::Substring { field, start, end, as_ } => Ok(data
            .into_iter()
            .map(|elem| {
                let s = value_as_string(&get_path(&elem, field));
                let chars: Vec<char> = s.chars().collect();
                let end = end.unwrap_or(chars.len()).min(chars.len());
                let start = (*start).min(end);
                let sliced: String = chars[start..end].iter().collect();
                set_field(elem, as_.as_deref().unwrap_or(field), Value::String(sliced))
            })
            .collect()),

        TransformOperation::Template { template: tmpl, as_ } => {
            let mut out = Vec::with_capacity(data.len());
            for elem in data {
                let elem_ctx = ctx.with_input(elem.clone());
                let resolved = template::resolve(tmpl, &elem_ctx).await?;
                out.push(set_field(elem, as_, Value::String(resolved)));
            }
            Ok(out)
        }

        TransformOperation::Round { field, precision, as_ } => Ok(map_number(data, field, as_, |n| {
            let factor = 10f64.powi(precision.unwrap_or(0) as i32);
            (n * factor).round() / factor
        })),
        TransformOperation::Floor { field, as_ } => Ok(map_number(data, field, as_, f64::floor)),
        TransformOperation::Ceil { field, as_ } => Ok(map_number(data, field, as_, f64::ceil)),
        TransformOperation::Abs { field, as_ } => Ok(map_number(data, field, as_, f64::abs)),
        TransformOperation::Clamp { field, min, max, as_ } => {
            let (min, max) = (*min, *max);
            Ok(map_number(data, field, as_, move |n| n.clamp(min, max)))
        }
        TransformOperation::Scale { field, factor, as_ } => {
            let factor = *factor;
            Ok(map_number(data, field, as_, move |n| n * factor))
        }
        TransformOperation::Percentage { field, of, as_ } => Ok(data
            .into_iter()
            .map(|elem| {
                let numerator = as_f64(&get_path(&elem, field)).unwrap_or(0.0);
                let denominator = as_f64(&get_path(&elem, of)).unwrap_or(0.0);
                let pct = if denominator == 0.0 { 0.0 } else { numerator / denominator * 100.0 };
                set_field(elem, as_.as_deref().unwrap_or(field), Value::from(pct))
            })
            .collect()),

        TransformOperation::First => Ok(data.into_iter().take(1).collect()),
        TransformOperation::Last => Ok(data.into_iter().next_back().into_iter().collect()),
        TransformOperation::Nth { n } => Ok(data.into_iter().nth(*n).into_iter().collect()),
        TransformOperation::Reverse => {
            let mut out = data;
            out.reverse();
            Ok(out)
        }
        TransformOperation::Unique { field } => {
            let mut seen = std::collections::HashSet::new();
            Ok(data
                .into_iter()
                .filter(|elem| {
                    let key = match field {
                        Some(f) => value_as_string(&get_path(elem, f)),
                        None => elem.to_string(),
                    };
                    seen.insert(key)
                })
                .collect())
        }
        TransformOperation::Flatten => {
            let mut out = Vec::new();
            for elem in data {
                match elem {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Ok(out)
        }
        TransformOperation::Chunk { size } => {
            if *size == 0 {
                return Transform { message: "chunk.size must be > 0".to_string() }.fail();
            }
            Ok(data.chunks(*size).map(|c| Value::Array(c.to_vec())).collect())
        }
        TransformOperation::Zip { with, as_ } => {
            let right = as_array(parse_resolved(&template::resolve(with, ctx).await?));
            let mut out = Vec::with_capacity(data.len());
            for (i, elem) in data.into_iter().enumerate() {
                let paired = right.get(i).cloned().unwrap_or(Value::Null);
                out.push(set_field(elem, as_, paired));
            }
            Ok(out)
        }

        TransformOperation::RandomOne => {
            let mut rng = rand::thread_rng();
            Ok(data.choose(&mut rng).cloned().into_iter().collect())
        }
        TransformOperation::RandomN { n } => {
            let mut rng = rand::thread_rng();
            let mut indices: Vec<usize> = (0..data.len()).collect();
            indices.shuffle(&mut rng);
            indices.truncate(*n);
            indices.sort_unstable();
            Ok(indices.into_iter().map(|i| data[i].clone()).collect())
        }
        TransformOperation::Shuffle => {
            let mut out = data;
            let mut rng = rand::thread_rng();
            out.shuffle(&mut rng);
            Ok(out)
        }
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn set_field(elem: Value, field: &str, value: Value) -> Value {
    let mut obj = as_object(elem);
    obj.insert(field.to_string(), value);
    Value::Object(obj)
}

fn map_string(data: Vec<Value>, field: &str, as_: &Option<String>, f: impl Fn(String) -> String) -> Vec<Value> {
    data.into_iter()
        .map(|elem| {
            let s = f(value_as_string(&get_path(&elem, field)));
            set_field(elem, as_.as_deref().unwrap_or(field), Value::String(s))
        })
        .collect()
}

fn map_number(data: Vec<Value>, field: &str, as_: &Option<String>, f: impl Fn(f64) -> f64) -> Vec<Value> {
    data.into_iter()
        .map(|elem| {
            let n = as_f64(&get_path(&elem, field)).unwrap_or(0.0);
            set_field(elem, as_.as_deref().unwrap_or(field), Value::from(f(n)))
        })
        .collect()
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A small JSONPath-ish accessor: dot-separated field names with optional
/// `[n]` indexing, and an optional leading `$.` root marker.
fn get_path(value: &Value, path: &str) -> Value {
    let path = path.strip_prefix("$.").unwrap_or(path.strip_prefix('$').unwrap_or(path));
    if path.is_empty() {
        return value.clone();
    }
    let mut current = value.clone();
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (name, index) = match segment.find('[') {
            Some(open) => {
                let name = &segment[..open];
                let idx_str = segment[open + 1..].trim_end_matches(']');
                (name, idx_str.parse::<usize>().ok())
            }
            None => (segment, None),
        };
        current = if name.is_empty() {
            current
        } else {
            match current.as_object().and_then(|o| o.get(name)) {
                Some(v) => v.clone(),
                None => return Value::Null,
            }
        };
        if let Some(i) = index {
            current = current.as_array().and_then(|a| a.get(i)).cloned().unwrap_or(Value::Null);
        }
    }
    current
}

fn compare(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    match op {
        FilterOp::Eq => actual == expected,
        FilterOp::Ne => actual != expected,
        FilterOp::Gt => numeric_cmp(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Greater),
        FilterOp::Lt => numeric_cmp(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Less),
        FilterOp::Gte => numeric_cmp(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Less),
        FilterOp::Lte => numeric_cmp(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Greater),
        FilterOp::Contains => value_as_string(actual).contains(&value_as_string(expected)),
        FilterOp::StartsWith => value_as_string(actual).starts_with(&value_as_string(expected)),
        FilterOp::EndsWith => value_as_string(actual).ends_with(&value_as_string(expected)),
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    as_f64(a).zip(as_f64(b)).and_then(|(a, b)| a.partial_cmp(&b))
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    numeric_cmp(a, b).unwrap_or_else(|| value_as_string(a).cmp(&value_as_string(b)))
}

fn group_by(data: Vec<Value>, key: &str, aggregations: &indexmap::IndexMap<String, Aggregation>) -> Vec<Value> {
    let mut groups: indexmap::IndexMap<String, Vec<Value>> = indexmap::IndexMap::new();
    for elem in data {
        let k = value_as_string(&get_path(&elem, key));
        groups.entry(k).or_default().push(elem);
    }
    groups
        .into_iter()
        .map(|(k, members)| {
            let mut out = Map::new();
            out.insert("key".to_string(), Value::String(k));
            for (name, agg) in aggregations {
                out.insert(name.clone(), aggregate(&members, agg.func, agg.field.as_deref()));
            }
            Value::Object(out)
        })
        .collect()
}

fn aggregate(data: &[Value], func: AggFunc, field: Option<&str>) -> Value {
    let numbers: Vec<f64> = match field {
        Some(f) => data.iter().filter_map(|e| as_f64(&get_path(e, f))).collect(),
        None => data.iter().filter_map(as_f64).collect(),
    };
    match func {
        AggFunc::Sum => Value::from(numbers.iter().sum::<f64>()),
        AggFunc::Avg => {
            if numbers.is_empty() {
                Value::from(0.0)
            } else {
                Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggFunc::Count => Value::from(data.len()),
        AggFunc::Min => numbers.into_iter().fold(None, |acc, n| Some(acc.map_or(n, |m: f64| m.min(n)))).map(Value::from).unwrap_or(Value::Null),
        AggFunc::Max => numbers.into_iter().fold(None, |acc, n| Some(acc.map_or(n, |m: f64| m.max(n)))).map(Value::from).unwrap_or(Value::Null),
        AggFunc::First => field.map(|f| get_path(data.first().unwrap_or(&Value::Null), f)).unwrap_or_else(|| data.first().cloned().unwrap_or(Value::Null)),
        AggFunc::Last => field.map(|f| get_path(data.last().unwrap_or(&Value::Null), f)).unwrap_or_else(|| data.last().cloned().unwrap_or(Value::Null)),
    }
}

fn join(left: Vec<Value>, right: Vec<Value>, left_key: &str, right_key: &str, join_type: JoinType) -> Vec<Value> {
    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];

    for l in &left {
        let lk = get_path(l, left_key);
        let mut matched = false;
        for (i, r) in right.iter().enumerate() {
            if get_path(r, right_key) == lk {
                matched = true;
                right_matched[i] = true;
                out.push(merge(l, r));
            }
        }
        if !matched && join_type == JoinType::Left {
            out.push(merge(l, &Value::Null));
        }
    }

    if join_type == JoinType::Right {
        for (i, r) in right.iter().enumerate() {
            if !right_matched[i] {
                out.push(merge(&Value::Null, r));
            }
        }
    }

    out
}

fn merge(left: &Value, right: &Value) -> Value {
    let mut out = as_object(left.clone());
    if let Value::Object(r) = right {
        for (k, v) in r {
            out.insert(k.clone(), v.clone());
        }
    } else if !matches!(right, Value::Null) {
        out.insert("right".to_string(), right.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{Aggregation, TransformOperation as Op};

    fn ctx() -> TemplateContext {
        TemplateContext::new(serde_json::json!({}))
    }

    #[tokio::test]
    async fn select_projects_fields() {
        let data = vec![serde_json::json!({"a": {"b": 1}}), serde_json::json!({"a": {"b": 2}})];
        let mut fields = indexmap::IndexMap::new();
        fields.insert("out".to_string(), "a.b".to_string());
        let result = apply(&Op::Select { fields }, data, &ctx()).await.unwrap();
        assert_eq!(result[0]["out"], serde_json::json!(1));
        assert_eq!(result[1]["out"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn filter_keeps_matching_elements() {
        let data = vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 5})];
        let result = apply(
            &Op::Filter { field: "n".to_string(), op: FilterOp::Gt, value: serde_json::json!(2) },
            data,
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["n"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn limit_zero_is_rejected() {
        let err = apply(&Op::Limit { count: 0 }, vec![], &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Transform { .. }));
    }

    #[tokio::test]
    async fn group_by_aggregates_sum() {
        let data = vec![
            serde_json::json!({"team": "a", "score": 1}),
            serde_json::json!({"team": "a", "score": 2}),
            serde_json::json!({"team": "b", "score": 10}),
        ];
        let mut aggs = indexmap::IndexMap::new();
        aggs.insert("total".to_string(), Aggregation { field: Some("score".to_string()), func: AggFunc::Sum });
        let result = apply(&Op::GroupBy { key: "team".to_string(), aggregations: aggs }, data, &ctx())
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        let a = result.iter().find(|e| e["key"] == "a").unwrap();
        assert_eq!(a["total"], serde_json::json!(3.0));
    }

    #[tokio::test]
    async fn sort_by_descending() {
        let data = vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 3}), serde_json::json!({"n": 2})];
        let result = apply(&Op::SortBy { field: "n".to_string(), order: SortOrder::Desc }, data, &ctx())
            .await
            .unwrap();
        let values: Vec<i64> = result.iter().map(|v| v["n"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn chunk_splits_into_groups() {
        let data = vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)];
        let result = apply(&Op::Chunk { size: 2 }, data, &ctx()).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], serde_json::json!([1, 2]));
        assert_eq!(result[1], serde_json::json!([3]));
    }

    #[tokio::test]
    async fn uppercase_transforms_field() {
        let data = vec![serde_json::json!({"name": "ada"})];
        let result = apply(&Op::Uppercase { field: "name".to_string(), as_: None }, data, &ctx())
            .await
            .unwrap();
        assert_eq!(result[0]["name"], serde_json::json!("ADA"));
    }

    #[tokio::test]
    async fn clamp_bounds_value() {
        let data = vec![serde_json::json!({"n": 15})];
        let result = apply(&Op::Clamp { field: "n".to_string(), min: 0.0, max: 10.0, as_: None }, data, &ctx())
            .await
            .unwrap();
        assert_eq!(result[0]["n"], serde_json::json!(10.0));
    }
}

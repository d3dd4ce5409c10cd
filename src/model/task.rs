//! `TaskResource` — the catalog entry a `TaskStep::TaskRef` points at.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResource {
    pub name: String,
    pub spec: TaskResourceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResourceSpec {
    #[serde(default = "default_task_type")]
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub http: Option<HttpDefinition>,
    #[serde(default)]
    pub transform: Option<TransformDefinition>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

fn default_task_type() -> TaskType {
    TaskType::Http
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Http,
    Transform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDefinition {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Either the legacy single-JSONPath form or the typed `pipeline`; when both
/// are present the pipeline wins.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransformDefinition {
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    /// Optional template pre-extracting a sub-value of the context before
    /// the legacy query runs.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub pipeline: Option<Vec<TransformOperation>>,
}

/// One step of the transform pipeline. Dispatch is by `type` tag, modeled
/// as a sum type rather than runtime polymorphism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransformOperation {
    Select {
        fields: IndexMap<String, String>,
    },
    Filter {
        field: String,
        op: FilterOp,
        value: serde_json::Value,
    },
    Map {
        mappings: IndexMap<String, String>,
    },
    FlatMap {
        field: String,
    },
    GroupBy {
        key: String,
        aggregations: IndexMap<String, Aggregation>,
    },
    Join {
        left_key: String,
        right_key: String,
        join_type: JoinType,
        /// Template expression resolving to the right-hand array.
        with: String,
    },
    SortBy {
        field: String,
        order: SortOrder,
    },
    Aggregate {
        function: AggFunc,
        #[serde(default)]
        field: Option<String>,
        #[serde(rename = "as")]
        as_: String,
    },
    Limit {
        count: usize,
    },
    Skip {
        count: usize,
    },
    Enrich {
        fields: IndexMap<String, String>,
    },
    Uppercase {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Lowercase {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Trim {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Split {
        field: String,
        separator: String,
        #[serde(rename = "as")]
        as_: String,
    },
    Concat {
        fields: Vec<String>,
        #[serde(default)]
        separator: String,
        #[serde(rename = "as")]
        as_: String,
    },
    Replace {
        field: String,
        pattern: String,
        replacement: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Substring {
        field: String,
        start: usize,
        #[serde(default)]
        end: Option<usize>,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Template {
        template: String,
        #[serde(rename = "as")]
        as_: String,
    },
    Round {
        field: String,
        #[serde(default)]
        precision: Option<u32>,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Floor {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Ceil {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Abs {
        field: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Clamp {
        field: String,
        min: f64,
        max: f64,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Scale {
        field: String,
        factor: f64,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    Percentage {
        field: String,
        of: String,
        #[serde(rename = "as", default)]
        as_: Option<String>,
    },
    First,
    Last,
    Nth {
        n: usize,
    },
    Reverse,
    Unique {
        #[serde(default)]
        field: Option<String>,
    },
    Flatten,
    Chunk {
        size: usize,
    },
    Zip {
        with: String,
        #[serde(rename = "as")]
        as_: String,
    },
    RandomOne,
    RandomN {
        n: usize,
    },
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(default)]
    pub field: Option<String>,
    pub func: AggFunc,
}

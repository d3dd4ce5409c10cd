//! Task executors.
//!
//! Each executor runs a task's typed definition against a resolved
//! template context — the param shape is known at compile time
//! (`HttpDefinition`, `TransformDefinition`, ...) rather than an untyped
//! `serde_json::Value`.

pub mod cached_http;
pub mod http;
pub mod response_storage;
pub mod transform;

use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("template error: {source}"))]
    Template { source: crate::template::Error },

    #[snafu(display("http request failed: {message}"))]
    Http { message: String },

    #[snafu(display("http request to {url} timed out"))]
    Timeout { url: String },

    #[snafu(display("circuit breaker is open for '{task_ref}'"))]
    CircuitOpen { task_ref: String },

    #[snafu(display("transform error: {message}"))]
    Transform { message: String },

    #[snafu(display("cache error: {source}"))]
    Cache { source: crate::cache::Error },
}

impl From<crate::template::Error> for Error {
    fn from(source: crate::template::Error) -> Self {
        Error::Template { source }
    }
}

impl From<crate::cache::Error> for Error {
    fn from(source: crate::cache::Error) -> Self {
        Error::Cache { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

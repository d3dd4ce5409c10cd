//! `WorkflowCallStack` — cycle and depth guard for sub-workflow invocation.

use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("sub-workflow cycle detected: {}", path.join(" -> ")))]
    Cycle { path: Vec<String> },

    #[snafu(display("sub-workflow call stack exceeded max depth {max_depth} at '{name}'"))]
    DepthExceeded { name: String, max_depth: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Ordered list of ancestor workflow names; a name never appears twice.
#[derive(Debug, Clone)]
pub struct CallStack {
    names: Vec<String>,
    max_depth: usize,
}

impl CallStack {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self { names: Vec::new(), max_depth }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Fails if `name` is already on the stack (reporting the full cycle
    /// path) or if pushing would exceed `max_depth`.
    pub fn push(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(pos) = self.names.iter().position(|n| n == &name) {
            let mut path: Vec<String> = self.names[pos..].to_vec();
            path.push(name);
            return CycleSnafu { path }.fail();
        }
        if self.names.len() >= self.max_depth {
            return DepthExceededSnafu { name, max_depth: self.max_depth }.fail();
        }
        self.names.push(name);
        Ok(())
    }

    pub fn pop(&mut self) {
        self.names.pop();
    }
}

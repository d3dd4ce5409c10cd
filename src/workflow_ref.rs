//! `WorkflowRef` parsing and catalog resolution.

use crate::catalog::WorkflowCatalog;
use crate::model::WorkflowResource;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow reference '{reference}' not found in namespace '{namespace}'"))]
    NotFound { reference: String, namespace: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// `[namespace/]name[@version]`, parsed by taking the suffix after the last
/// `@` as the version, then splitting the remainder on the first `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRef {
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

impl WorkflowRef {
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let (body, version) = match reference.rsplit_once('@') {
            Some((body, version)) => (body, Some(version.to_string())),
            None => (reference, None),
        };
        let (namespace, name) = match body.split_once('/') {
            Some((ns, name)) => (Some(ns.to_string()), name.to_string()),
            None => (None, body.to_string()),
        };
        Self { namespace, name, version }
    }

    /// Resolve against a catalog, defaulting the namespace to the parent's
    /// when the reference didn't specify one.
    pub fn resolve<'a>(
        &self,
        catalog: &'a WorkflowCatalog,
        parent_namespace: &str,
    ) -> Result<&'a WorkflowResource> {
        let namespace = self.namespace.as_deref().unwrap_or(parent_namespace);
        catalog
            .find(namespace, &self.name, self.version.as_deref())
            .context(NotFoundSnafu {
                reference: self.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

impl std::fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(v) = &self.version {
            write!(f, "@{v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let r = WorkflowRef::parse("checkout");
        assert_eq!(r, WorkflowRef { namespace: None, name: "checkout".to_string(), version: None });
    }

    #[test]
    fn parses_namespace_and_version() {
        let r = WorkflowRef::parse("billing/checkout@2");
        assert_eq!(
            r,
            WorkflowRef {
                namespace: Some("billing".to_string()),
                name: "checkout".to_string(),
                version: Some("2".to_string()),
            }
        );
    }

    #[test]
    fn version_only() {
        let r = WorkflowRef::parse("checkout@3");
        assert_eq!(r.name, "checkout");
        assert_eq!(r.version.as_deref(), Some("3"));
        assert_eq!(r.namespace, None);
    }
}

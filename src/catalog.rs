//! Task and workflow resource catalogs.
//!
//! The core treats these as read-only lookups supplied by the embedding
//! process; no persistence or discovery lives here — just simple keyed
//! maps built once at startup.

use crate::model::{TaskResource, WorkflowResource};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: HashMap<String, TaskResource>,
}

impl TaskCatalog {
    #[must_use]
    pub fn new(tasks: impl IntoIterator<Item = TaskResource>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskResource> {
        self.tasks.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

/// Keyed by `(namespace, name)`; versioned entries keep the version string
/// the resource itself declares via its `version` annotation.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<(String, String), Vec<WorkflowResource>>,
}

impl WorkflowCatalog {
    #[must_use]
    pub fn new(workflows: impl IntoIterator<Item = WorkflowResource>) -> Self {
        let mut map: HashMap<(String, String), Vec<WorkflowResource>> = HashMap::new();
        for w in workflows {
            let key = (w.metadata.namespace.clone(), w.metadata.name.clone());
            map.entry(key).or_default().push(w);
        }
        Self { workflows: map }
    }

    /// Match by name + namespace and, when `version` is given, by the
    /// resource's own declared version annotation. When `version` is
    /// absent, the most recently registered entry for that name wins.
    #[must_use]
    pub fn find(&self, namespace: &str, name: &str, version: Option<&str>) -> Option<&WorkflowResource> {
        let entries = self.workflows.get(&(namespace.to_string(), name.to_string()))?;
        match version {
            Some(v) => entries.iter().find(|w| w.metadata.version() == Some(v)),
            None => entries.last(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceMetadata, WorkflowSpec};
    use indexmap::IndexMap;

    fn workflow(namespace: &str, name: &str, version: Option<&str>) -> WorkflowResource {
        let mut annotations = IndexMap::new();
        if let Some(v) = version {
            annotations.insert("version".to_string(), v.to_string());
        }
        WorkflowResource {
            metadata: ResourceMetadata { name: name.to_string(), namespace: namespace.to_string(), annotations },
            spec: WorkflowSpec { tasks: vec![], input_schema: None, output: IndexMap::new() },
        }
    }

    #[test]
    fn finds_by_name_and_namespace() {
        let catalog = WorkflowCatalog::new(vec![workflow("default", "checkout", None)]);
        assert!(catalog.find("default", "checkout", None).is_some());
        assert!(catalog.find("other", "checkout", None).is_none());
    }

    #[test]
    fn finds_by_version() {
        let catalog = WorkflowCatalog::new(vec![
            workflow("default", "checkout", Some("1")),
            workflow("default", "checkout", Some("2")),
        ]);
        let found = catalog.find("default", "checkout", Some("1")).unwrap();
        assert_eq!(found.metadata.version(), Some("1"));
    }

    #[test]
    fn unversioned_lookup_returns_latest_registered() {
        let catalog = WorkflowCatalog::new(vec![
            workflow("default", "checkout", Some("1")),
            workflow("default", "checkout", Some("2")),
        ]);
        let found = catalog.find("default", "checkout", None).unwrap();
        assert_eq!(found.metadata.version(), Some("2"));
    }
}

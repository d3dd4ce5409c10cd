//! Execution Graph Builder.
//!
//! Builds a `petgraph::DiGraph` of task nodes from a workflow definition.
//! These tasks form a true DAG: edges come from declared `dependsOn` plus
//! every `tasks.<id>.output` reference discovered by scanning each task's
//! templates.

use crate::model::{TaskTarget, WorkflowResource};
use crate::template;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("duplicate task id '{id}'"))]
    DuplicateTaskId { id: String },

    #[snafu(display(
        "task '{task}' references unknown task '{referenced}' in a template expression"
    ))]
    UnknownTaskReference { task: String, referenced: String },

    #[snafu(display("cycle detected: {}", path.join(" -> ")))]
    Cycle { path: Vec<String> },

    #[snafu(display("template parse error in task '{task}': {source}"))]
    Template {
        task: String,
        source: template::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Edges run dependency -> dependent, so a `petgraph` topological sort
/// yields tasks in a valid execution order directly.
pub struct ExecutionGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl ExecutionGraph {
    /// Build and validate the graph for `workflow`. Returns an error (never
    /// a partially-valid graph) on duplicate ids, unknown references, or a
    /// cycle — a graph is returned only when validation passes.
    pub fn build(workflow: &WorkflowResource) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for task in &workflow.spec.tasks {
            if nodes.contains_key(&task.id) {
                return DuplicateTaskIdSnafu { id: task.id.clone() }.fail();
            }
            let idx = graph.add_node(task.id.clone());
            nodes.insert(task.id.clone(), idx);
        }

        // Collect, then validate, then add edges — so an unknown reference
        // is reported before any cycle-detection work runs on a half-built
        // graph.
        let mut all_deps: HashMap<String, HashSet<String>> = HashMap::new();
        for task in &workflow.spec.tasks {
            let mut deps: HashSet<String> = task.depends_on.iter().cloned().collect();
            for template_str in task_templates(task) {
                let parsed = template::parse(template_str);
                if !parsed.valid {
                    return TemplateSnafu {
                        task: task.id.clone(),
                        source: template::Error::Parse {
                            errors: parsed.errors,
                        },
                    }
                    .fail();
                }
                for expr in parsed.expressions {
                    if expr.kind == template::ExpressionKind::TaskOutput {
                        if let Some(id) = expr.task_id {
                            deps.insert(id);
                        }
                    }
                }
            }
            all_deps.insert(task.id.clone(), deps);
        }

        for (task_id, deps) in &all_deps {
            for dep in deps {
                if !nodes.contains_key(dep) {
                    return UnknownTaskReferenceSnafu {
                        task: task_id.clone(),
                        referenced: dep.clone(),
                    }
                    .fail();
                }
            }
        }

        if let Some(path) = find_cycle(&all_deps) {
            return CycleSnafu { path }.fail();
        }

        for (task_id, deps) in &all_deps {
            let dependent_idx = nodes[task_id];
            for dep in deps {
                let dep_idx = nodes[dep];
                graph.add_edge(dep_idx, dependent_idx, ());
            }
        }

        Ok(Self { graph, nodes })
    }

    /// A topological ordering of task ids (dependencies before dependents).
    #[must_use]
    pub fn execution_order(&self) -> Vec<String> {
        petgraph::algo::toposort(&self.graph, None)
            .expect("graph was validated acyclic at build time")
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Ids that `id` depends on (must complete before `id` may run).
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Ids that depend on `id`.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    #[must_use]
    pub fn task_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }
}

/// Every template string a task step can contain, scanned for
/// `tasks.<id>.output` references.
fn task_templates(task: &crate::model::TaskStep) -> Vec<&str> {
    let mut templates: Vec<&str> = task.input.values().map(String::as_str).collect();
    if let Some(cond) = &task.condition {
        templates.push(&cond.if_expr);
    }
    if let Some(for_each) = &task.for_each {
        templates.push(&for_each.items);
    }
    if let TaskTarget::Switch(switch) = &task.target {
        templates.push(&switch.value);
    }
    templates
}

/// DFS with an explicit recursion stack, returning the full cycle path
/// (e.g. `["A", "B", "A"]`) rather than just a node index.
fn find_cycle(adjacency: &HashMap<String, HashSet<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &'a HashMap<String, HashSet<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::InProgress) = marks.get(node) {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            path.push(node.to_string());
            return Some(path);
        }
        if marks.get(node) == Some(&Mark::Done) {
            return None;
        }

        marks.insert(node, Mark::InProgress);
        stack.push(node);

        if let Some(deps) = adjacency.get(node) {
            for dep in deps {
                if let Some(cycle) = visit(dep, adjacency, marks, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut ids: Vec<&str> = adjacency.keys().map(String::as_str).collect();
    ids.sort_unstable();
    for id in ids {
        if let Some(cycle) = visit(id, adjacency, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskStep, TaskTarget, WorkflowResource};
    use indexmap::IndexMap;

    fn step(id: &str, input: &[(&str, &str)]) -> TaskStep {
        TaskStep {
            id: id.to_string(),
            target: TaskTarget::TaskRef("t".to_string()),
            depends_on: Vec::new(),
            input: input
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<IndexMap<_, _>>(),
            condition: None,
            for_each: None,
            timeout: None,
            cache: None,
            retry: None,
            circuit_breaker: None,
        }
    }

    fn workflow(tasks: Vec<TaskStep>) -> WorkflowResource {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": "wf"},
            "spec": {"tasks": []},
        }))
        .map(|mut wf: WorkflowResource| {
            wf.spec.tasks = tasks;
            wf
        })
        .unwrap()
    }

    #[test]
    fn diamond_graph_orders_dependencies_first() {
        let wf = workflow(vec![
            step("A", &[]),
            step("B", &[("x", "{{tasks.A.output.x}}")]),
            step("C", &[("x", "{{tasks.A.output.x}}")]),
            step(
                "D",
                &[
                    ("b", "{{tasks.B.output.x}}"),
                    ("c", "{{tasks.C.output.x}}"),
                ],
            ),
        ]);
        let graph = ExecutionGraph::build(&wf).unwrap();
        let order = graph.execution_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("D"));
        assert_eq!(graph.dependencies("D").len(), 2);
        assert_eq!(graph.dependents("A").len(), 2);
    }

    #[test]
    fn detects_direct_cycle() {
        let wf = workflow(vec![
            step("A", &[("x", "{{tasks.B.output.x}}")]),
            step("B", &[("x", "{{tasks.A.output.x}}")]),
        ]);
        let err = ExecutionGraph::build(&wf).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn detects_unknown_reference() {
        let wf = workflow(vec![step("A", &[("x", "{{tasks.Ghost.output.x}}")])]);
        let err = ExecutionGraph::build(&wf).unwrap_err();
        assert!(matches!(err, Error::UnknownTaskReference { .. }));
    }

    #[test]
    fn explicit_depends_on_creates_edge_without_template_reference() {
        let mut b = step("B", &[]);
        b.depends_on = vec!["A".to_string()];
        let wf = workflow(vec![step("A", &[]), b]);
        let graph = ExecutionGraph::build(&wf).unwrap();
        assert_eq!(graph.dependencies("B"), vec!["A".to_string()]);
    }
}

//! Workflow & Task Validator — pre-execution structural validation.
//!
//! A pure function over immutable input, invoked by the embedding process
//! before `Orchestrator::execute`; the orchestrator itself only rebuilds
//! the execution graph, so this module's checks are a superset run ahead
//! of time.

use crate::catalog::TaskCatalog;
use crate::model::{TaskTarget, TaskType, WorkflowResource};
use crate::template;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[must_use]
pub fn validate(workflow: &WorkflowResource, catalog: &TaskCatalog) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let task_ids: HashSet<&str> = workflow.spec.tasks.iter().map(|t| t.id.as_str()).collect();

    for step in &workflow.spec.tasks {
        match &step.target {
            TaskTarget::TaskRef(task_ref) => {
                validate_task_ref(task_ref, catalog, &step.id, &mut errors);
            }
            TaskTarget::WorkflowRef(_) => {}
            TaskTarget::Switch(switch) => {
                validate_switch(switch, catalog, &step.id, &mut errors, &mut warnings);
            }
        }

        if let Some(condition) = &step.condition {
            if let Err(e) = template::parse_checked(&condition.if_expr) {
                errors.push(format!("task '{}': condition.if is invalid: {e}", step.id));
            }
        }

        if let Some(for_each) = &step.for_each {
            if let Err(e) = template::parse_checked(&for_each.items) {
                errors.push(format!("task '{}': forEach.items is invalid: {e}", step.id));
            }
            if !ITEM_VAR_RE.is_match(&for_each.item_var) {
                errors.push(format!(
                    "task '{}': forEach.itemVar '{}' is not a valid identifier",
                    step.id, for_each.item_var
                ));
            }
        }

        for template_str in step.input.values() {
            if let Err(e) = template::parse_checked(template_str) {
                errors.push(format!("task '{}': input template is invalid: {e}", step.id));
            }
        }
    }

    for field in workflow.spec.output.values() {
        if let Err(e) = template::parse_checked(field) {
            errors.push(format!("workflow output mapping is invalid: {e}"));
            continue;
        }
        for referenced in template::referenced_task_ids(field) {
            if !task_ids.contains(referenced.as_str()) {
                errors.push(format!("workflow output references unknown task id '{referenced}'"));
            }
        }
    }

    if let Err(nesting_errors) = validate_for_each_nesting(workflow) {
        errors.extend(nesting_errors);
    }

    ValidationReport { errors, warnings }
}

static ITEM_VAR_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

fn validate_task_ref(task_ref: &str, catalog: &TaskCatalog, step_id: &str, errors: &mut Vec<String>) {
    let Some(task) = catalog.get(task_ref) else {
        errors.push(format!("task '{step_id}': taskRef '{task_ref}' not found in catalog"));
        return;
    };
    if task.spec.task_type == TaskType::Transform && task.spec.transform.is_none() {
        errors.push(format!(
            "task '{step_id}': taskRef '{task_ref}' is type 'transform' but has no transform block"
        ));
    }
}

fn validate_switch(
    switch: &crate::model::SwitchBlock,
    catalog: &TaskCatalog,
    step_id: &str,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if switch.value.trim().is_empty() {
        errors.push(format!("task '{step_id}': switch.value must be non-empty"));
    } else if let Err(e) = template::parse_checked(&switch.value) {
        errors.push(format!("task '{step_id}': switch.value is invalid: {e}"));
    }

    if switch.cases.is_empty() {
        errors.push(format!("task '{step_id}': switch.cases must be non-empty"));
    }

    let mut seen = HashSet::new();
    for case in &switch.cases {
        let normalized = case.match_value.to_lowercase();
        if !seen.insert(normalized) {
            errors.push(format!(
                "task '{step_id}': switch case '{}' duplicates another case (case-insensitive)",
                case.match_value
            ));
        }
        if !catalog.contains(&case.task_ref) {
            errors.push(format!(
                "task '{step_id}': switch case '{}' references unknown taskRef '{}'",
                case.match_value, case.task_ref
            ));
        }
    }

    if switch.default.is_none() {
        warnings.push(format!("task '{step_id}': switch has no default case"));
    } else if let Some(default_ref) = &switch.default {
        if !catalog.contains(default_ref) {
            errors.push(format!("task '{step_id}': switch default references unknown taskRef '{default_ref}'"));
        }
    }
}

/// Nesting depth is the length of the longest chain of `forEach` tasks
/// connected via `dependsOn`; must not exceed 3.
fn validate_for_each_nesting(workflow: &WorkflowResource) -> std::result::Result<(), Vec<String>> {
    use std::collections::HashMap;

    let steps: HashMap<&str, &crate::model::TaskStep> =
        workflow.spec.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    fn depth<'a>(id: &'a str, steps: &HashMap<&'a str, &'a crate::model::TaskStep>, memo: &mut HashMap<&'a str, usize>) -> usize {
        if let Some(&d) = memo.get(id) {
            return d;
        }
        let Some(step) = steps.get(id) else {
            return 0;
        };
        let own = usize::from(step.for_each.is_some());
        let max_parent = step
            .depends_on
            .iter()
            .map(|dep| depth(dep.as_str(), steps, memo))
            .max()
            .unwrap_or(0);
        let total = own + max_parent;
        memo.insert(id, total);
        total
    }

    let mut memo = HashMap::new();
    let mut errors = Vec::new();
    for step in &workflow.spec.tasks {
        let d = depth(&step.id, &steps, &mut memo);
        if d > 3 {
            errors.push(format!("task '{}': forEach nesting depth {d} exceeds the maximum of 3", step.id));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CacheOverride, CircuitBreakerOverride, Condition, ForEachBlock, ResourceMetadata, RetryOverride,
        SwitchBlock, SwitchCase, TaskResource, TaskResourceSpec, TaskStep, TaskType, WorkflowSpec,
    };
    use indexmap::IndexMap;

    fn step(id: &str, target: TaskTarget, depends_on: Vec<&str>, for_each: Option<ForEachBlock>) -> TaskStep {
        TaskStep {
            id: id.to_string(),
            target,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            input: IndexMap::new(),
            condition: None::<Condition>,
            for_each,
            timeout: None,
            cache: None::<CacheOverride>,
            retry: None::<RetryOverride>,
            circuit_breaker: None::<CircuitBreakerOverride>,
        }
    }

    fn workflow(tasks: Vec<TaskStep>) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata { name: "w".to_string(), namespace: "default".to_string(), annotations: IndexMap::new() },
            spec: WorkflowSpec { tasks, input_schema: None, output: IndexMap::new() },
        }
    }

    fn catalog_with(names: &[&str]) -> TaskCatalog {
        TaskCatalog::new(names.iter().map(|n| TaskResource {
            name: (*n).to_string(),
            spec: TaskResourceSpec { task_type: TaskType::Http, http: None, transform: None, output_schema: None },
        }))
    }

    #[test]
    fn unknown_task_ref_is_an_error() {
        let wf = workflow(vec![step("a", TaskTarget::TaskRef("missing".to_string()), vec![], None)]);
        let report = validate(&wf, &catalog_with(&[]));
        assert!(!report.is_valid());
    }

    #[test]
    fn transform_task_with_no_transform_block_is_an_error() {
        let catalog = TaskCatalog::new(vec![TaskResource {
            name: "t".to_string(),
            spec: TaskResourceSpec { task_type: TaskType::Transform, http: None, transform: None, output_schema: None },
        }]);
        let wf = workflow(vec![step("a", TaskTarget::TaskRef("t".to_string()), vec![], None)]);
        let report = validate(&wf, &catalog);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("transform"));
    }

    #[test]
    fn switch_with_no_default_warns_not_errors() {
        let switch = SwitchBlock {
            value: "{{input.x}}".to_string(),
            cases: vec![SwitchCase { match_value: "a".to_string(), task_ref: "t1".to_string() }],
            default: None,
        };
        let wf = workflow(vec![step("a", TaskTarget::Switch(switch), vec![], None)]);
        let report = validate(&wf, &catalog_with(&["t1"]));
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn duplicate_case_match_is_an_error() {
        let switch = SwitchBlock {
            value: "{{input.x}}".to_string(),
            cases: vec![
                SwitchCase { match_value: "A".to_string(), task_ref: "t1".to_string() },
                SwitchCase { match_value: "a".to_string(), task_ref: "t1".to_string() },
            ],
            default: Some("t1".to_string()),
        };
        let wf = workflow(vec![step("a", TaskTarget::Switch(switch), vec![], None)]);
        let report = validate(&wf, &catalog_with(&["t1"]));
        assert!(!report.is_valid());
    }

    #[test]
    fn for_each_nesting_beyond_three_is_rejected() {
        let fe = || ForEachBlock {
            items: "{{input.items}}".to_string(),
            item_var: "item".to_string(),
            index_var: "index".to_string(),
            max_concurrency: 0,
        };
        let wf = workflow(vec![
            step("a", TaskTarget::TaskRef("t".to_string()), vec![], Some(fe())),
            step("b", TaskTarget::TaskRef("t".to_string()), vec!["a"], Some(fe())),
            step("c", TaskTarget::TaskRef("t".to_string()), vec!["b"], Some(fe())),
            step("d", TaskTarget::TaskRef("t".to_string()), vec!["c"], Some(fe())),
        ]);
        let report = validate(&wf, &catalog_with(&["t"]));
        assert!(!report.is_valid());
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("malformed workflow: {reason}")]
    Malformed { reason: String },

    #[error("workflow has no steps left to advance past")]
    Empty,
}

impl WorkflowError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub id: u64,
    pub function_name: String,
    #[serde(default, alias = "target", skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, rename = "pre-fetch", alias = "prefetch")]
    pub prefetch: bool,
}

impl Step {
    pub fn new(id: u64, function_name: impl Into<String>) -> Self {
        Self {
            id,
            function_name: function_name.into(),
            node: None,
            prefetch: false,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Where a dispatcher should send this step's invocation.
    pub fn routing_target(&self) -> &str {
        self.node
            .as_deref()
            .filter(|node| !node.trim().is_empty())
            .unwrap_or(&self.function_name)
    }
}

/// Ordered set of steps travelling with each invocation.
///
/// Order is derived from `Step::id`, never from list position. A descriptor is
/// never changed in place: [`WorkflowDescriptor::advance`] returns a new value
/// for the next hop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawWorkflow")]
pub struct WorkflowDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct RawWorkflow {
    #[serde(default)]
    run_id: Option<String>,
    steps: Vec<Step>,
}

impl TryFrom<RawWorkflow> for WorkflowDescriptor {
    type Error = WorkflowError;

    fn try_from(raw: RawWorkflow) -> Result<Self, Self::Error> {
        let descriptor = Self::new(raw.steps)?;
        Ok(match raw.run_id {
            Some(run_id) if !run_id.trim().is_empty() => {
                validate_key_segment("run_id", &run_id)?;
                descriptor.with_run_id(run_id)
            }
            _ => descriptor,
        })
    }
}

impl WorkflowDescriptor {
    pub fn new(steps: Vec<Step>) -> Result<Self, WorkflowError> {
        validate_steps(&steps)?;
        Ok(Self {
            run_id: None,
            steps,
        })
    }

    pub fn empty() -> Self {
        Self {
            run_id: None,
            steps: Vec::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step with the lowest `id`, or `None` once the workflow is terminal.
    pub fn current_step(&self) -> Result<Option<&Step>, WorkflowError> {
        let mut current: Option<&Step> = None;
        let mut tied = false;
        for step in &self.steps {
            match current {
                Some(best) if step.id == best.id => tied = true,
                Some(best) if step.id > best.id => {}
                _ => {
                    current = Some(step);
                    tied = false;
                }
            }
        }

        if tied {
            let id = current.map(|step| step.id).unwrap_or_default();
            return Err(WorkflowError::malformed(format!(
                "multiple steps share the lowest id {id}"
            )));
        }
        Ok(current)
    }

    /// Returns a copy of this descriptor without its current step.
    pub fn advance(&self) -> Result<WorkflowDescriptor, WorkflowError> {
        let current = self.current_step()?.ok_or(WorkflowError::Empty)?;
        let current_id = current.id;
        Ok(Self {
            run_id: self.run_id.clone(),
            steps: self
                .steps
                .iter()
                .filter(|step| step.id != current_id)
                .cloned()
                .collect(),
        })
    }

    pub fn next_step(&self) -> Result<Option<Step>, WorkflowError> {
        let advanced = self.advance()?;
        Ok(advanced.current_step()?.cloned())
    }

    #[cfg(test)]
    pub(crate) fn from_steps_unchecked(steps: Vec<Step>) -> Self {
        Self {
            run_id: None,
            steps,
        }
    }
}

fn validate_steps(steps: &[Step]) -> Result<(), WorkflowError> {
    let mut seen = BTreeSet::new();
    for step in steps {
        if step.function_name.trim().is_empty() {
            return Err(WorkflowError::malformed(format!(
                "step {} has an empty function_name",
                step.id
            )));
        }
        validate_key_segment("function_name", &step.function_name)?;
        if !seen.insert(step.id) {
            return Err(WorkflowError::malformed(format!(
                "duplicate step id {}",
                step.id
            )));
        }
    }
    Ok(())
}

/// Run ids and function names become partitions of staging object keys, so
/// they may not carry path or partition separators.
fn validate_key_segment(field: &str, value: &str) -> Result<(), WorkflowError> {
    match value
        .chars()
        .find(|&c| matches!(c, '/' | '\\' | '=') || c.is_control())
    {
        Some(reserved) => Err(WorkflowError::malformed(format!(
            "{field} '{value}' contains reserved character {reserved:?}"
        ))),
        None => Ok(()),
    }
}

/// Identity under which staged values for one step of one run are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    pub run_id: String,
    pub step_id: u64,
    pub function_name: String,
}

impl StepKey {
    pub fn new(run_id: impl Into<String>, step: &Step) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step.id,
            function_name: step.function_name.clone(),
        }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.run_id, self.step_id, self.function_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_workflow() -> WorkflowDescriptor {
        WorkflowDescriptor::new(vec![
            Step::new(7, "notify"),
            Step::new(2, "resize").with_prefetch(true),
            Step::new(4, "classify").with_node("https://edge.example/classify"),
        ])
        .expect("workflow should be valid")
    }

    #[test]
    fn current_step_is_lowest_id_regardless_of_position() {
        let workflow = sample_workflow();
        let current = workflow.current_step().expect("valid").expect("non-empty");
        assert_eq!(current.id, 2);
        assert_eq!(current.function_name, "resize");
    }

    #[test]
    fn current_step_is_none_for_empty_workflow() {
        let workflow = WorkflowDescriptor::empty();
        assert_eq!(workflow.current_step().expect("valid"), None);
    }

    #[test]
    fn current_step_does_not_mutate_descriptor() {
        let workflow = sample_workflow();
        let before = workflow.clone();
        let first = workflow.current_step().expect("valid").cloned();
        let second = workflow.current_step().expect("valid").cloned();
        assert_eq!(first, second);
        assert_eq!(workflow, before);
    }

    #[test]
    fn current_step_rejects_tied_minimum() {
        let workflow =
            WorkflowDescriptor::from_steps_unchecked(vec![Step::new(0, "a"), Step::new(0, "b")]);
        let error = workflow.current_step().expect_err("tie should fail");
        assert!(matches!(error, WorkflowError::Malformed { .. }));
    }

    #[test]
    fn tie_above_the_minimum_is_not_reported_by_selector() {
        let workflow = WorkflowDescriptor::from_steps_unchecked(vec![
            Step::new(3, "a"),
            Step::new(1, "b"),
            Step::new(3, "c"),
        ]);
        let current = workflow.current_step().expect("valid").expect("non-empty");
        assert_eq!(current.function_name, "b");
    }

    #[test]
    fn construction_rejects_duplicate_ids() {
        let error = WorkflowDescriptor::new(vec![Step::new(0, "a"), Step::new(0, "b")])
            .expect_err("duplicates should fail");
        assert_eq!(error, WorkflowError::malformed("duplicate step id 0"));
    }

    #[test]
    fn construction_rejects_blank_function_name() {
        let error =
            WorkflowDescriptor::new(vec![Step::new(1, " ")]).expect_err("blank name should fail");
        assert!(error.to_string().contains("empty function_name"));
    }

    #[test]
    fn advance_removes_exactly_the_current_step() {
        let workflow = sample_workflow();
        let advanced = workflow.advance().expect("advance should succeed");

        assert_eq!(workflow.len(), 3);
        assert_eq!(advanced.len(), 2);
        assert!(advanced.steps().iter().all(|step| step.id != 2));
        assert_eq!(
            advanced.current_step().expect("valid").map(|step| step.id),
            Some(4)
        );
    }

    #[test]
    fn advancing_n_times_drains_workflow_then_fails() {
        let mut workflow = sample_workflow();
        for _ in 0..3 {
            workflow = workflow.advance().expect("advance should succeed");
        }
        assert!(workflow.is_empty());
        assert_eq!(workflow.advance(), Err(WorkflowError::Empty));
    }

    #[test]
    fn advance_keeps_run_id() {
        let workflow = sample_workflow().with_run_id("run-42");
        let advanced = workflow.advance().expect("advance should succeed");
        assert_eq!(advanced.run_id(), Some("run-42"));
    }

    #[test]
    fn next_step_looks_past_current() {
        let workflow = sample_workflow();
        let next = workflow.next_step().expect("valid").expect("has successor");
        assert_eq!(next.function_name, "classify");

        let single = WorkflowDescriptor::new(vec![Step::new(0, "only")]).expect("valid");
        assert_eq!(single.next_step().expect("valid"), None);
    }

    #[test]
    fn deserializes_source_wire_names() {
        let workflow: WorkflowDescriptor = serde_json::from_value(json!({
            "steps": [
                {"id": 1, "function_name": "b", "pre-fetch": true, "node": "queue-b"},
                {"id": 0, "function_name": "a", "target": "https://a.example"}
            ]
        }))
        .expect("workflow should parse");

        let current = workflow.current_step().expect("valid").expect("non-empty");
        assert_eq!(current.routing_target(), "https://a.example");
        assert!(!current.prefetch);
        assert!(workflow.steps()[0].prefetch);
        assert_eq!(workflow.run_id(), None);
    }

    #[test]
    fn deserialization_rejects_duplicate_ids() {
        let error = serde_json::from_value::<WorkflowDescriptor>(json!({
            "steps": [
                {"id": 0, "function_name": "a"},
                {"id": 0, "function_name": "b"}
            ]
        }))
        .expect_err("duplicates should fail");
        assert!(error.to_string().contains("duplicate step id 0"));
    }

    #[test]
    fn rejects_separators_that_would_alias_staging_keys() {
        let error = WorkflowDescriptor::new(vec![Step::new(0, "a/step_id=9/function=b")])
            .expect_err("path separator in function name");
        assert!(error.to_string().contains("reserved character '/'"));

        let error = serde_json::from_value::<WorkflowDescriptor>(json!({
            "run_id": "r1/step_id=1",
            "steps": [{"id": 0, "function_name": "a"}]
        }))
        .expect_err("path separator in run id");
        assert!(error.to_string().contains("run_id 'r1/step_id=1'"));

        assert!(WorkflowDescriptor::new(vec![Step::new(0, "k=v")]).is_err());
        let arn = Step::new(0, "arn:aws:lambda:eu-west-1:1:function:ocr");
        assert!(WorkflowDescriptor::new(vec![arn]).is_ok());
    }

    #[test]
    fn routing_target_falls_back_to_function_name() {
        assert_eq!(Step::new(0, "resize").routing_target(), "resize");
        assert_eq!(
            Step::new(0, "resize").with_node("  ").routing_target(),
            "resize"
        );
    }

    #[test]
    fn step_key_display_is_stable() {
        let key = StepKey::new("run-1", &Step::new(3, "classify"));
        assert_eq!(key.to_string(), "run-1/3:classify");
    }
}

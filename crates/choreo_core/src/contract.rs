use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::{WorkflowDescriptor, WorkflowError};

pub const CHOREOGRAPHY_SCHEMA_VERSION: &str = "v1";

/// Message carried by every hop: the remaining workflow plus the step input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationPayload {
    pub workflow: WorkflowDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl InvocationPayload {
    pub fn new(workflow: WorkflowDescriptor, body: Option<Value>) -> Self {
        Self { workflow, body }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ContractError> {
        serde_json::to_vec(self).map_err(|error| ContractError::InvalidPayload(error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("invocation payload is missing the workflow descriptor")]
    MissingWorkflow,

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("invalid invocation payload: {0}")]
    InvalidPayload(String),
}

pub fn decode_invocation(event: Value) -> Result<InvocationPayload, ContractError> {
    let Value::Object(mut object) = event else {
        return Err(ContractError::InvalidPayload(
            "invocation payload must be a JSON object".to_string(),
        ));
    };

    let workflow = match object.remove("workflow") {
        None | Some(Value::Null) => return Err(ContractError::MissingWorkflow),
        Some(value) => value,
    };
    let body = match object.remove("body") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    };

    let workflow = decode_workflow(workflow)?;
    Ok(InvocationPayload { workflow, body })
}

pub fn decode_invocation_str(text: &str) -> Result<InvocationPayload, ContractError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|error| ContractError::InvalidPayload(format!("malformed JSON: {error}")))?;
    decode_invocation(value)
}

fn decode_workflow(value: Value) -> Result<WorkflowDescriptor, ContractError> {
    #[derive(Deserialize)]
    struct Shape {
        #[serde(default)]
        run_id: Option<String>,
        steps: Vec<crate::workflow::Step>,
    }

    // Shape errors and validation errors are reported under different variants.
    let shape: Shape = serde_json::from_value(value)
        .map_err(|error| ContractError::InvalidPayload(format!("malformed workflow: {error}")))?;
    let descriptor = WorkflowDescriptor::new(shape.steps)?;
    Ok(match shape.run_id {
        Some(run_id) if !run_id.trim().is_empty() => descriptor.with_run_id(run_id),
        _ => descriptor,
    })
}

/// Assigns a run id on the first hop; later hops keep the one they received.
pub fn ensure_run_id(workflow: WorkflowDescriptor) -> WorkflowDescriptor {
    if workflow.run_id().is_some() {
        return workflow;
    }
    workflow.with_run_id(uuid::Uuid::new_v4().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingDecision {
    Dispatched,
    Staged,
    WorkflowComplete,
    AlreadyComplete,
}

/// Transport acknowledgement returned by a step.
///
/// `result` is only populated when the workflow ended at this step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepAcknowledgement {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub forwarding: ForwardingDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<u64>,
    pub early_dispatched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub event_time: String,
    pub schema_version: String,
}

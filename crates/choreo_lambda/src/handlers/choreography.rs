//! The per-invocation choreography sequence shared by every platform adapter.
//!
//! Each invocation selects its own step from the descriptor it received,
//! wakes a pre-fetching successor early, resolves its input, runs the user
//! handler once, and then either stages the result for the successor,
//! dispatches the successor with the result, or finishes the workflow.

use std::time::Instant;

use choreo_core::contract::{
    ensure_run_id, ContractError, ForwardingDecision, InvocationPayload, StepAcknowledgement,
    CHOREOGRAPHY_SCHEMA_VERSION,
};
use choreo_core::fingerprint::workflow_fingerprint;
use choreo_core::workflow::{Step, StepKey, WorkflowError};
use serde_json::{json, Value};
use thiserror::Error;

use crate::adapters::dispatch::StepDispatcher;
use crate::adapters::staging::{Staging, StagingError};

/// The workflow author's function: `(staged_data, input) -> result`.
pub trait StepHandler: Send + Sync {
    fn handle(&self, staged: Option<Value>, input: Option<Value>) -> Result<Value, String>;
}

impl<F> StepHandler for F
where
    F: Fn(Option<Value>, Option<Value>) -> Result<Value, String> + Send + Sync,
{
    fn handle(&self, staged: Option<Value>, input: Option<Value>) -> Result<Value, String> {
        self(staged, input)
    }
}

/// Handler that forwards its input unchanged.
pub fn passthrough_handler(_staged: Option<Value>, input: Option<Value>) -> Result<Value, String> {
    Ok(input.unwrap_or(Value::Null))
}

pub struct ChoreographyContext<'a> {
    pub staging: &'a dyn Staging,
    pub dispatcher: &'a dyn StepDispatcher,
    pub handler: &'a dyn StepHandler,
}

#[derive(Debug, Error)]
pub enum ChoreographyError {
    #[error("invocation payload is missing the workflow descriptor")]
    MissingWorkflow,

    #[error("invalid invocation payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("staging failed for step {step_id}: {source}")]
    Staging {
        step_id: u64,
        #[source]
        source: StagingError,
        handler_completed: bool,
    },

    #[error("failed to dispatch step {step_id} ({function_name}): {message}")]
    DispatchFailure {
        step_id: u64,
        function_name: String,
        message: String,
        handler_completed: bool,
    },

    #[error("handler for step {step_id} failed: {message}")]
    HandlerFailed { step_id: u64, message: String },
}

impl From<ContractError> for ChoreographyError {
    fn from(error: ContractError) -> Self {
        match error {
            ContractError::MissingWorkflow => Self::MissingWorkflow,
            ContractError::Workflow(error) => Self::Workflow(error),
            ContractError::InvalidPayload(message) => Self::InvalidPayload(message),
        }
    }
}

impl ChoreographyError {
    /// Status reported on HTTP-like transports.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingWorkflow | Self::InvalidPayload(_) | Self::Workflow(_) => 400,
            Self::HandlerFailed { .. } => 500,
            Self::DispatchFailure { .. } => 502,
            Self::Staging {
                source: StagingError::Unavailable { .. },
                ..
            } => 503,
            Self::Staging {
                source: StagingError::Timeout { .. },
                ..
            } => 504,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingWorkflow => "missing_workflow",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Workflow(WorkflowError::Malformed { .. }) => "malformed_workflow",
            Self::Workflow(WorkflowError::Empty) => "empty_workflow",
            Self::Staging {
                source: StagingError::Unavailable { .. },
                ..
            } => "staging_unavailable",
            Self::Staging {
                source: StagingError::Timeout { .. },
                ..
            } => "staging_timeout",
            Self::DispatchFailure { .. } => "dispatch_failure",
            Self::HandlerFailed { .. } => "handler_failed",
        }
    }

    /// True when the user handler already ran and only forwarding failed.
    pub fn handler_completed(&self) -> bool {
        match self {
            Self::Staging {
                handler_completed, ..
            }
            | Self::DispatchFailure {
                handler_completed, ..
            } => *handler_completed,
            _ => false,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "handler_completed": self.handler_completed(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Forwarding {
    /// The successor was invoked with the handler result as its body.
    Dispatched { next: Step },
    /// The handler result was staged for an already-dispatched successor.
    Staged { next: Step },
    WorkflowComplete { result: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Executed {
        run_id: String,
        step: Step,
        early_dispatched: Option<Step>,
        forwarding: Forwarding,
    },
    /// The invocation arrived with no steps left; nothing was executed.
    AlreadyComplete { run_id: Option<String> },
}

impl StepOutcome {
    pub fn acknowledgement(&self, event_time: impl Into<String>) -> StepAcknowledgement {
        let event_time = event_time.into();
        match self {
            Self::AlreadyComplete { run_id } => StepAcknowledgement {
                status: "ok".to_string(),
                run_id: run_id.clone(),
                step_id: None,
                function_name: None,
                forwarding: ForwardingDecision::AlreadyComplete,
                next_step_id: None,
                early_dispatched: false,
                result: None,
                event_time,
                schema_version: CHOREOGRAPHY_SCHEMA_VERSION.to_string(),
            },
            Self::Executed {
                run_id,
                step,
                early_dispatched,
                forwarding,
            } => {
                let (decision, next_step_id, result) = match forwarding {
                    Forwarding::Dispatched { next } => {
                        (ForwardingDecision::Dispatched, Some(next.id), None)
                    }
                    Forwarding::Staged { next } => (ForwardingDecision::Staged, Some(next.id), None),
                    Forwarding::WorkflowComplete { result } => {
                        (ForwardingDecision::WorkflowComplete, None, Some(result.clone()))
                    }
                };
                StepAcknowledgement {
                    status: "ok".to_string(),
                    run_id: Some(run_id.clone()),
                    step_id: Some(step.id),
                    function_name: Some(step.function_name.clone()),
                    forwarding: decision,
                    next_step_id,
                    early_dispatched: early_dispatched.is_some(),
                    result,
                    event_time,
                    schema_version: CHOREOGRAPHY_SCHEMA_VERSION.to_string(),
                }
            }
        }
    }
}

pub fn run_step(
    payload: InvocationPayload,
    context: &ChoreographyContext<'_>,
) -> Result<StepOutcome, ChoreographyError> {
    let InvocationPayload { workflow, body } = payload;

    let updated_workflow = match workflow.advance() {
        Ok(value) => value,
        Err(WorkflowError::Empty) => {
            tracing::info!(
                component = "choreography",
                event = "workflow_already_complete",
                run_id = workflow.run_id().unwrap_or_default(),
            );
            return Ok(StepOutcome::AlreadyComplete {
                run_id: workflow.run_id().map(str::to_string),
            });
        }
        Err(error) => return Err(error.into()),
    };

    // A fresh run id could never match a key the predecessor staged under.
    if workflow.run_id().is_none() {
        if let Some(step) = workflow.current_step()?.filter(|step| step.prefetch) {
            return Err(ChoreographyError::InvalidPayload(format!(
                "pre-fetching step {} ({}) requires the run_id its input was staged under",
                step.id, step.function_name
            )));
        }
    }

    let workflow = ensure_run_id(workflow);
    let run_id = workflow.run_id().unwrap_or_default().to_string();
    let updated_workflow = updated_workflow.with_run_id(run_id.clone());
    let current = workflow
        .current_step()?
        .cloned()
        .ok_or(WorkflowError::Empty)?;
    let next = updated_workflow.current_step()?.cloned();

    let started_at = Instant::now();
    tracing::info!(
        component = "choreography",
        event = "step_started",
        run_id = %run_id,
        step_id = current.id,
        function_name = %current.function_name,
        prefetch = current.prefetch,
        remaining_steps = updated_workflow.len(),
        workflow_fingerprint = %workflow_fingerprint(&workflow),
    );

    let early_dispatched = match next.as_ref().filter(|step| step.prefetch) {
        Some(successor) => {
            let wake = InvocationPayload::new(updated_workflow.clone(), None);
            dispatch(context, successor, &wake, false)?;
            tracing::info!(
                component = "choreography",
                event = "early_dispatch",
                run_id = %run_id,
                step_id = current.id,
                next_step_id = successor.id,
                target = successor.routing_target(),
            );
            Some(successor.clone())
        }
        None => None,
    };

    let current_key = StepKey::new(run_id.clone(), &current);
    let (staged_data, input) = if current.prefetch {
        let staged = context
            .staging
            .prefetch(&current_key)
            .map_err(|source| staging_error(&current, source, false))?;
        let input = context
            .staging
            .fetch(&current_key)
            .map_err(|source| staging_error(&current, source, false))?;
        (staged, Some(input))
    } else {
        (None, body)
    };

    let result = context
        .handler
        .handle(staged_data, input)
        .map_err(|message| {
            tracing::error!(
                component = "choreography",
                event = "step_failed",
                run_id = %run_id,
                step_id = current.id,
                duration_ms = started_at.elapsed().as_millis() as u64,
                error = %message,
            );
            ChoreographyError::HandlerFailed {
                step_id: current.id,
                message,
            }
        })?;
    tracing::info!(
        component = "choreography",
        event = "handler_completed",
        run_id = %run_id,
        step_id = current.id,
        duration_ms = started_at.elapsed().as_millis() as u64,
    );

    let forwarding = match next {
        None => {
            tracing::info!(
                component = "choreography",
                event = "workflow_completed",
                run_id = %run_id,
                step_id = current.id,
            );
            Forwarding::WorkflowComplete { result }
        }
        Some(next) if next.prefetch => {
            let next_key = StepKey::new(run_id.clone(), &next);
            context
                .staging
                .stage(&next_key, &result)
                .map_err(|source| staging_error(&current, source, true))?;
            tracing::info!(
                component = "choreography",
                event = "output_staged",
                run_id = %run_id,
                step_id = current.id,
                next_step_id = next.id,
            );
            Forwarding::Staged { next }
        }
        Some(next) => {
            let forward = InvocationPayload::new(updated_workflow, Some(result));
            dispatch(context, &next, &forward, true)?;
            tracing::info!(
                component = "choreography",
                event = "next_dispatched",
                run_id = %run_id,
                step_id = current.id,
                next_step_id = next.id,
                target = next.routing_target(),
            );
            Forwarding::Dispatched { next }
        }
    };

    Ok(StepOutcome::Executed {
        run_id,
        step: current,
        early_dispatched,
        forwarding,
    })
}

fn dispatch(
    context: &ChoreographyContext<'_>,
    next: &Step,
    payload: &InvocationPayload,
    handler_completed: bool,
) -> Result<(), ChoreographyError> {
    let failure = |message: String| ChoreographyError::DispatchFailure {
        step_id: next.id,
        function_name: next.function_name.clone(),
        message,
        handler_completed,
    };
    let bytes = payload
        .to_bytes()
        .map_err(|error| failure(error.to_string()))?;
    context
        .dispatcher
        .dispatch_next(next, &bytes)
        .map_err(|message| {
            tracing::error!(
                component = "choreography",
                event = "dispatch_failed",
                next_step_id = next.id,
                target = next.routing_target(),
                handler_completed,
                error = %message,
            );
            failure(message)
        })
}

fn staging_error(step: &Step, source: StagingError, handler_completed: bool) -> ChoreographyError {
    tracing::error!(
        component = "choreography",
        event = "staging_failed",
        step_id = step.id,
        handler_completed,
        error = %source,
    );
    ChoreographyError::Staging {
        step_id: step.id,
        source,
        handler_completed,
    }
}

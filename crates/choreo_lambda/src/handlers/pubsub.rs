use base64::Engine;
use choreo_core::contract::{
    decode_invocation, decode_invocation_str, InvocationPayload, StepAcknowledgement,
};
use serde::Serialize;
use serde_json::Value;

use crate::handlers::choreography::{run_step, ChoreographyContext, ChoreographyError};

/// One SQS record, decoded independently of its batch neighbours.
#[derive(Debug)]
pub struct QueuedMessage {
    pub message_id: String,
    pub payload: Result<InvocationPayload, ChoreographyError>,
}

#[derive(Debug)]
pub enum PubSubEvent {
    /// A queue batch; every record belongs to its own workflow hop.
    Sqs(Vec<QueuedMessage>),
    /// A single pushed message (pub/sub push subscription or CloudEvent).
    Push(InvocationPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Partial-batch result: only the listed records are redelivered by SQS.
#[derive(Debug, Clone, Serialize)]
pub struct PubSubResponse {
    pub acknowledgements: Vec<StepAcknowledgement>,
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// Entry point for queue and topic triggered functions.
///
/// Each SQS record runs on its own: a record that fails to decode or to run is
/// reported in `batchItemFailures` and the remaining records still execute, so
/// a redelivery never repeats a step that already succeeded. The event source
/// mapping must enable `ReportBatchItemFailures`. A failed push message fails
/// the invocation, which is the push transport's redelivery signal.
pub fn handle_pubsub_event(
    event: &Value,
    context: &ChoreographyContext<'_>,
    event_time: &str,
) -> Result<PubSubResponse, ChoreographyError> {
    match decode_pubsub_event(event)? {
        PubSubEvent::Push(payload) => {
            let outcome = run_step(payload, context)?;
            Ok(PubSubResponse {
                acknowledgements: vec![outcome.acknowledgement(event_time)],
                batch_item_failures: Vec::new(),
            })
        }
        PubSubEvent::Sqs(messages) => {
            tracing::info!(
                component = "pubsub_adapter",
                event = "batch_received",
                messages = messages.len(),
            );

            let mut acknowledgements = Vec::with_capacity(messages.len());
            let mut batch_item_failures = Vec::new();
            for QueuedMessage {
                message_id,
                payload,
            } in messages
            {
                match payload.and_then(|payload| run_step(payload, context)) {
                    Ok(outcome) => acknowledgements.push(outcome.acknowledgement(event_time)),
                    Err(error) => {
                        tracing::warn!(
                            component = "pubsub_adapter",
                            event = "message_failed",
                            message_id = %message_id,
                            error_code = error.error_code(),
                            handler_completed = error.handler_completed(),
                            error = %error,
                        );
                        batch_item_failures.push(BatchItemFailure {
                            item_identifier: message_id,
                        });
                    }
                }
            }
            Ok(PubSubResponse {
                acknowledgements,
                batch_item_failures,
            })
        }
    }
}

pub fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .map(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record
                        .get("eventSource")
                        .and_then(Value::as_str)
                        .map(|source| source == "aws:sqs")
                        .unwrap_or(false)
                })
        })
        .unwrap_or(false)
}

pub fn decode_pubsub_event(event: &Value) -> Result<PubSubEvent, ChoreographyError> {
    if is_sqs_event(event) {
        return decode_sqs_records(event).map(PubSubEvent::Sqs);
    }
    if let Some(message) = event.get("message") {
        return decode_message_data(message).map(PubSubEvent::Push);
    }
    if event.get("data").is_some() {
        return decode_message_data(event).map(PubSubEvent::Push);
    }
    Err(ChoreographyError::InvalidPayload(
        "pub/sub event must include SQS Records, a message, or data".to_string(),
    ))
}

/// Fails only when a record cannot be identified; a bad body stays with its record.
fn decode_sqs_records(event: &Value) -> Result<Vec<QueuedMessage>, ChoreographyError> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ChoreographyError::InvalidPayload("SQS event must include Records array".to_string())
        })?;

    records
        .iter()
        .map(|record| {
            let message_id = record
                .get("messageId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ChoreographyError::InvalidPayload(
                        "SQS record must include a messageId".to_string(),
                    )
                })?
                .to_string();
            let payload = match record.get("body").and_then(Value::as_str) {
                Some(body) => decode_invocation_str(body).map_err(ChoreographyError::from),
                None => Err(ChoreographyError::InvalidPayload(
                    "SQS record body must be a string".to_string(),
                )),
            };
            Ok(QueuedMessage {
                message_id,
                payload,
            })
        })
        .collect()
}

/// Decodes `data` that is either the payload object or base64-encoded JSON.
fn decode_message_data(message: &Value) -> Result<InvocationPayload, ChoreographyError> {
    match message.get("data") {
        Some(Value::String(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|error| {
                    ChoreographyError::InvalidPayload(format!(
                        "message data must be base64-encoded JSON: {error}"
                    ))
                })?;
            let text = String::from_utf8(bytes).map_err(|error| {
                ChoreographyError::InvalidPayload(format!("message data is not UTF-8: {error}"))
            })?;
            Ok(decode_invocation_str(&text)?)
        }
        Some(data @ Value::Object(_)) => Ok(decode_invocation(data.clone())?),
        _ => Err(ChoreographyError::InvalidPayload(
            "message data must be an object or base64 string".to_string(),
        )),
    }
}

use choreo_core::contract::{decode_invocation, decode_invocation_str, StepAcknowledgement};
use serde_json::Value;

use crate::handlers::choreography::{run_step, ChoreographyContext, ChoreographyError};

/// Entry point for functions invoked directly with the payload as the event.
///
/// The event may also arrive as a JSON string, as lightweight edge runtimes
/// deliver it.
pub fn handle_direct_event(
    event: Value,
    context: &ChoreographyContext<'_>,
    event_time: &str,
) -> Result<StepAcknowledgement, ChoreographyError> {
    let payload = match event {
        Value::String(text) => decode_invocation_str(&text)?,
        other => decode_invocation(other)?,
    };
    let outcome = run_step(payload, context)?;
    Ok(outcome.acknowledgement(event_time))
}

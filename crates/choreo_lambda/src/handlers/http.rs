use base64::Engine;
use choreo_core::contract::decode_invocation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::handlers::choreography::{run_step, ChoreographyContext, ChoreographyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

/// Entry point for HTTP-triggered functions (API Gateway, function URLs).
pub fn handle_http_event(
    event: Value,
    context: &ChoreographyContext<'_>,
    event_time: &str,
) -> ApiGatewayResponse {
    let decoded = normalize_http_event(event)
        .and_then(|value| decode_invocation(value).map_err(ChoreographyError::from));
    let payload = match decoded {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                component = "http_adapter",
                event = "invocation_rejected",
                error = %error,
            );
            return error_response(&error);
        }
    };

    match run_step(payload, context) {
        Ok(outcome) => success_response(200, outcome.acknowledgement(event_time)),
        Err(error) => error_response(&error),
    }
}

/// Keys that mark an event as an HTTP trigger envelope rather than a bare payload.
const ENVELOPE_MARKERS: [&str; 5] = [
    "isBase64Encoded",
    "headers",
    "requestContext",
    "httpMethod",
    "rawPath",
];

/// Unwraps the HTTP envelope, if any, down to the invocation payload.
fn normalize_http_event(event: Value) -> Result<Value, ChoreographyError> {
    let Some(object) = event.as_object() else {
        return Err(ChoreographyError::InvalidPayload(
            "Request payload must be a JSON object".to_string(),
        ));
    };

    // A bare invocation payload also has a `body`, so check for `workflow` first.
    if object.contains_key("workflow") {
        return Ok(event);
    }
    let Some(body) = object.get("body") else {
        return Ok(event);
    };
    let enveloped = ENVELOPE_MARKERS.iter().any(|marker| object.contains_key(*marker));
    let base64_encoded = object
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let unwrapped: Value = match body {
        Value::Null => return Ok(json!({})),
        Value::Object(_) => return Ok(body.clone()),
        Value::String(text) if base64_encoded => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|error| {
                    ChoreographyError::InvalidPayload(format!("Malformed base64 body: {error}"))
                })?;
            serde_json::from_slice(&bytes).map_err(|error| {
                ChoreographyError::InvalidPayload(format!("Malformed JSON body: {error}"))
            })?
        }
        Value::String(text) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(error) if enveloped => {
                return Err(ChoreographyError::InvalidPayload(format!(
                    "Malformed JSON body: {error}"
                )))
            }
            // Not an envelope: a bare payload whose body is plain text.
            Err(_) => return Err(ChoreographyError::MissingWorkflow),
        },
        _ => return Err(ChoreographyError::MissingWorkflow),
    };

    if unwrapped.is_object() {
        Ok(unwrapped)
    } else {
        Err(ChoreographyError::MissingWorkflow)
    }
}

fn success_response(status_code: u16, payload: impl Serialize) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: serde_json::to_string(&payload).expect("response payload should serialize"),
    }
}

fn error_response(error: &ChoreographyError) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code: error.status_code(),
        headers: json!({"Content-Type": "application/json"}),
        body: error.to_json().to_string(),
    }
}

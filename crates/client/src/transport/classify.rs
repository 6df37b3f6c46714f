//! Classification of raw HTTP failures into [`CartError`].

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::{CartError, FieldErrors};

/// Maximum characters of a response body kept in an error message.
const MAX_MESSAGE_CHARS: usize = 200;

/// Classify a failure where no response reached the client.
pub fn classify_send_error(err: &reqwest::Error) -> CartError {
    let reason = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    CartError::Network(format!("{reason}: {err}"))
}

/// Classify a non-2xx response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> CartError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return CartError::Throttled {
            retry_after: parse_retry_after(headers),
        };
    }

    let json = serde_json::from_str::<Value>(body).ok();

    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
    ) && let Some(errors) = json.as_ref().and_then(field_errors)
    {
        return CartError::Validation(errors);
    }

    let message = json
        .as_ref()
        .and_then(detail_message)
        .unwrap_or_else(|| body.chars().take(MAX_MESSAGE_CHARS).collect());

    CartError::Server {
        status: status.as_u16(),
        message,
    }
}

/// Seconds from a `Retry-After` header.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Per-field messages from an error body such as
/// `{"quantity": ["Only 3 left in stock"], "product_id": "Invalid pk"}`.
///
/// A body holding only `detail` is a general error, not a field error.
fn field_errors(body: &Value) -> Option<FieldErrors> {
    let object = body.as_object()?;
    let mut errors = FieldErrors::default();

    for (field, value) in object.iter().filter(|(field, _)| *field != "detail") {
        match value {
            Value::String(message) => errors.push(field.as_str(), message.as_str()),
            Value::Array(messages) => {
                for message in messages {
                    errors.push(field.as_str(), value_text(message));
                }
            }
            Value::Null => {}
            other => errors.push(field.as_str(), other.to_string()),
        }
    }

    (!errors.is_empty()).then_some(errors)
}

/// Human-readable message from `{"detail": ...}` or `{"error": ...}`.
fn detail_message(body: &Value) -> Option<String> {
    ["detail", "error", "message"]
        .iter()
        .find_map(|field| body.get(*field))
        .map(value_text)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Classification of HTTP failures into `RecsError`.

use std::time::Duration;

use recs_core::RecsError;
use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use serde_json::Value;

/// Maps a transport-level reqwest failure (no usable response).
pub fn map_request_error(err: &reqwest::Error) -> RecsError {
    if err.is_timeout() {
        RecsError::timeout(err.to_string())
    } else if err.is_decode() {
        RecsError::parse(format!("failed to decode response: {err}"))
    } else {
        RecsError::network(err.to_string())
    }
}

/// Maps a non-success status and its body.
pub fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> RecsError {
    let message = extract_error_message(body);

    match status {
        StatusCode::TOO_MANY_REQUESTS => RecsError::RateLimit {
            message: message.unwrap_or_else(|| "rate limit exceeded".to_string()),
            retry_after_secs: retry_after.map(|d| d.as_secs()),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RecsError::timeout(message.unwrap_or_else(|| status.to_string()))
        }
        s if s.is_server_error() => RecsError::Server {
            status: Some(s.as_u16()),
            message: message.unwrap_or_else(|| s.to_string()),
        },
        s => RecsError::validation(
            message.unwrap_or_else(|| format!("The request was rejected ({s})")),
        ),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Pulls the human-readable message out of an error body.
///
/// Understands `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}`,
/// `{"error": "..."}`, `{"error": {"message": "..."}}` and `{"message": "..."}`.
fn extract_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;

    let from_value = |value: &Value| -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                Some(joined).filter(|s| !s.is_empty())
            }
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    };

    parsed
        .detail
        .as_ref()
        .and_then(from_value)
        .or_else(|| parsed.error.as_ref().and_then(from_value))
        .or(parsed.message)
        .filter(|m| !m.trim().is_empty())
}

pub fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

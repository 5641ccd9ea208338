use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::models::{EndpointId, EndpointRef, RequestId, parse_utc, slug_from_url};

pub const NEW_REQUEST_EVENT: &str = "new_webhook_request";

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    NewRequest(NewRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub endpoint: EndpointRef,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub body_length: Option<u64>,
}

#[derive(Debug)]
pub enum DecodeError {
    Malformed(serde_json::Error),
    NotAnObject,
    MissingKind,
    InvalidPayload(serde_json::Error),
    MissingEndpoint,
    InvalidTimestamp(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "frame is not json: {err}"),
            DecodeError::NotAnObject => f.write_str("frame is not a json object"),
            DecodeError::MissingKind => f.write_str("frame has no type or event name"),
            DecodeError::InvalidPayload(err) => {
                write!(f, "invalid {NEW_REQUEST_EVENT} payload: {err}")
            }
            DecodeError::MissingEndpoint => f.write_str("event names no endpoint"),
            DecodeError::InvalidTimestamp(raw) => write!(f, "invalid event timestamp {raw:?}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Deserialize)]
struct NewRequestPayload {
    #[serde(default)]
    webhook_id: Option<EndpointId>,
    #[serde(default)]
    webhook_url: Option<String>,
    request_id: RequestId,
    timestamp: String,
    #[serde(default)]
    body_length: Option<u64>,
}

/// Decodes one inbound frame. Unknown event kinds decode to `Ok(None)`.
///
/// Two envelopes are accepted: the raw socket shape `{"type": ..., fields}`
/// and the pub/sub shape `{"event": ..., "data": {fields}}`.
pub fn decode(raw: &str) -> Result<Option<PushEvent>, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let (kind, payload) = match object.remove("type") {
        Some(Value::String(kind)) => (kind, Value::Object(object)),
        _ => match (object.remove("event"), object.remove("data")) {
            (Some(Value::String(kind)), Some(data)) => (kind, data),
            _ => return Err(DecodeError::MissingKind),
        },
    };

    if kind != NEW_REQUEST_EVENT {
        debug!("ignoring push event of kind {kind:?}");
        return Ok(None);
    }

    let payload: NewRequestPayload =
        serde_json::from_value(payload).map_err(DecodeError::InvalidPayload)?;

    let slug = payload
        .webhook_url
        .as_deref()
        .map(slug_from_url)
        .filter(|slug| !slug.is_empty());
    if payload.webhook_id.is_none() && slug.is_none() {
        return Err(DecodeError::MissingEndpoint);
    }

    let timestamp =
        parse_utc(&payload.timestamp).ok_or(DecodeError::InvalidTimestamp(payload.timestamp))?;

    Ok(Some(PushEvent::NewRequest(NewRequest {
        endpoint: EndpointRef {
            id: payload.webhook_id,
            slug,
        },
        request_id: payload.request_id,
        timestamp,
        body_length: payload.body_length,
    })))
}

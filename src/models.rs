use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Opaque endpoint identifier. Numeric ids from the wire are kept as their
/// decimal string so `42` and `"42"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for EndpointId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for EndpointId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => Ok(Self(number.to_string())),
            Value::String(text) if !text.trim().is_empty() => Ok(Self::new(text)),
            other => Err(de::Error::custom(format!(
                "endpoint id must be a number or non-empty string, got {other}"
            ))),
        }
    }
}

/// Server-assigned captured request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => number
                .as_u64()
                .map(Self)
                .ok_or_else(|| de::Error::custom(format!("invalid request id {number}"))),
            Value::String(text) => text
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid request id {text:?}"))),
            other => Err(de::Error::custom(format!("invalid request id {other}"))),
        }
    }
}

/// How an event or a page names an endpoint. Either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRef {
    pub id: Option<EndpointId>,
    pub slug: Option<String>,
}

impl EndpointRef {
    pub fn by_id(id: impl Into<EndpointId>) -> Self {
        Self {
            id: Some(id.into()),
            slug: None,
        }
    }

    pub fn by_slug(slug: impl AsRef<str>) -> Self {
        Self {
            id: None,
            slug: Some(slug_from_url(slug.as_ref())),
        }
    }

    /// Ids win when both sides carry one. Slug equality is only a
    /// compatibility path for payloads that lack an id.
    pub fn matches(&self, other: &EndpointRef) -> bool {
        if let (Some(left), Some(right)) = (&self.id, &other.id) {
            return left == right;
        }
        match (&self.slug, &other.slug) {
            (Some(left), Some(right)) => slug_from_url(left) == slug_from_url(right),
            _ => false,
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.slug) {
            (Some(id), Some(slug)) => write!(f, "{slug} (#{id})"),
            (Some(id), None) => write!(f, "#{id}"),
            (None, Some(slug)) => f.write_str(slug),
            (None, None) => f.write_str("<unknown endpoint>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEndpoint {
    pub id: Option<EndpointId>,
    pub slug: String,
    pub name: String,
    pub active: bool,
    pub request_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WebhookEndpoint {
    pub fn new(slug: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            slug: slug_from_url(slug.as_ref()),
            name: name.into(),
            active: true,
            request_count: 0,
            last_activity: None,
        }
    }

    pub fn key(&self) -> EndpointRef {
        EndpointRef {
            id: self.id.clone(),
            slug: Some(self.slug.clone()),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.active { "ACTIVE" } else { "PAUSED" }
    }
}

#[derive(Serialize)]
pub struct CreateWebhookBody<'a> {
    pub name: &'a str,
}

#[derive(Deserialize)]
pub struct CreateWebhookResponse {
    pub name: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct WebhookUrlBody<'a> {
    pub url: &'a str,
}

#[derive(Deserialize)]
pub struct PauseResponse {
    pub status: bool,
}

#[derive(Serialize)]
pub struct DeleteRequestBody {
    pub id: RequestId,
}

#[derive(Serialize)]
pub struct DeleteAllBody<'a> {
    pub webhook_id: &'a str,
}

#[derive(Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Reply to a capture (`POST /{slug}`). Paused endpoints answer 200 with
/// only a message; active ones queue the request and answer 202.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error body the backend attaches to non-2xx responses. Depending on the
/// route the text sits under `detail`, `message` or `error`.
#[derive(Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    pub fn into_reason(self) -> Option<String> {
        self.detail.or(self.message).or(self.error)
    }
}

/// Full payload of one captured request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDetail {
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: String,
    #[serde(default, deserialize_with = "de_string_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "de_string_map")]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSummary {
    pub id: RequestId,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body_length: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPage {
    #[serde(default)]
    pub requests: Vec<RequestSummary>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Parses backend timestamps. Naive ISO-8601 values are UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Reduces a full webhook URL (`http://host/abc123`) or a `/abc123` path to
/// its slug.
pub fn slug_from_url(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            if let Some(last) = url.path_segments().and_then(|mut segments| {
                segments.rfind(|segment| !segment.is_empty())
            }) {
                return last.to_string();
            }
        }
    }
    raw.trim_matches('/').to_string()
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_utc(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}"))),
        None => Ok(None),
    }
}

fn de_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Map<String, Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

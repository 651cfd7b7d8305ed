//! Wire frames, identifiers and events.

use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Request parameters, passed through to the venue untouched.
pub type Params = Map<String, Value>;

/// Correlation id embedded in a request and echoed in its response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    const LEN: usize = 24;

    /// Generate a fresh random id.
    pub fn new() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Request frame written to the socket.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub id: RequestId,
    pub method: String,
    pub params: Params,
}

impl OutboundFrame {
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            id: RequestId::new(),
            method: method.into(),
            params,
        }
    }
}

/// One entry of a response's `rateLimits` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    pub count: u32,
    pub limit: u32,
    #[serde(default)]
    pub rate_limit_type: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub interval_num: Option<u32>,
}

/// Reply to a request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    /// `None` when the venue could not read the request id.
    pub id: Option<RequestId>,
    pub status: u16,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    /// In venue order; entries that do not decode are `None` so positions
    /// are kept.
    #[serde(default, deserialize_with = "lenient_rate_limits")]
    pub rate_limits: Vec<Option<RateLimitEntry>>,
}

fn lenient_rate_limits<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<Option<RateLimitEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

impl ResponseFrame {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A text frame received from the venue.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Carries an `id` or a `status`: a reply to a request.
    Response(ResponseFrame),
    /// Anything else: an unsolicited event.
    Push(Value),
    /// Looked like a response but did not decode. `id` is kept so the
    /// pending request can still be failed.
    Invalid { id: Option<RequestId>, reason: String },
}

impl InboundFrame {
    /// Classify a raw text frame.
    ///
    /// Responses missing `status` are classified as [`InboundFrame::Invalid`]
    /// rather than coerced. Text that is not a JSON object is an error.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(Error::MalformedFrame("expected a JSON object".to_string()));
        };

        if object.contains_key("id") || object.contains_key("status") {
            let id = object
                .get("id")
                .and_then(Value::as_str)
                .map(RequestId::from);
            return Ok(match serde_json::from_value(value) {
                Ok(response) => InboundFrame::Response(response),
                Err(e) => InboundFrame::Invalid {
                    id,
                    reason: format!("invalid response frame: {e}"),
                },
            });
        }

        Ok(InboundFrame::Push(value))
    }
}

/// Lifecycle and push notifications of the API connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    ConnectionError(String),
    Error(String),
    Push(Value),
}

/// A user data stream event, keyed by its `e` field.
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    /// e.g. `executionReport`, `outboundAccountPosition`, `balanceUpdate`.
    pub event_type: String,
    /// The remaining fields of the event.
    pub payload: Value,
}

impl UserData {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::MalformedFrame(
                "user data event is not an object".to_string(),
            ));
        };
        let event_type = match fields.remove("e") {
            Some(Value::String(kind)) => kind,
            _ => {
                return Err(Error::MalformedFrame(
                    "user data event has no `e` field".to_string(),
                ))
            }
        };
        Ok(Self {
            event_type,
            payload: Value::Object(fields),
        })
    }
}

/// Notifications of the user data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UserStreamEvent {
    /// Secondary socket opened (opt-in).
    Open,
    /// Secondary socket closed (opt-in).
    Close,
    /// Socket or stream failure (opt-in).
    Error(String),
    Data(UserData),
}

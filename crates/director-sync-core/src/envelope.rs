//! Wire envelope codec
//!
//! Every frame on the wire is a JSON object:
//!
//! ```text
//! { protocol: "asg-director-sync", version: 1, id, kind, origin, ts, payload }
//! ```
//!
//! Payloads per kind:
//! - hello:    { instanceId }
//! - update:   { data: <application update> }
//! - snapshot: { updates: [<application update>, ...] }

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Protocol name; frames carrying anything else are dropped
pub const PROTOCOL: &str = "asg-director-sync";

/// Protocol version; frames carrying anything else are dropped
pub const VERSION: u32 = 1;

/// Envelope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Hello,
    Snapshot,
    Update,
    /// Kinds from a newer peer; accepted and ignored
    #[serde(other)]
    Unknown,
}

/// Decoded wire message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol: String,
    pub version: u32,
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub kind: EnvelopeKind,
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin: Option<String>,
    /// Informational only; never read on receipt
    #[serde(default, deserialize_with = "lenient_ts")]
    pub ts: i64,
    #[serde(default)]
    pub payload: Value,
}

/// Why an incoming frame was rejected
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected protocol {0:?}")]
    Protocol(String),

    #[error("unsupported version {0}")]
    Version(u32),
}

impl Envelope {
    /// Build an outgoing envelope with a fresh id and the current timestamp
    pub fn new(kind: EnvelopeKind, payload: Value, origin: &str) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: VERSION,
            id: Some(Uuid::new_v4().to_string()),
            kind,
            origin: Some(origin.to_string()),
            ts: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn hello(origin: &str) -> Self {
        Self::new(EnvelopeKind::Hello, json!({ "instanceId": origin }), origin)
    }

    pub fn update(data: &Value, origin: &str) -> Self {
        Self::new(EnvelopeKind::Update, json!({ "data": data }), origin)
    }

    pub fn snapshot(updates: Vec<Value>, origin: &str) -> Self {
        Self::new(EnvelopeKind::Snapshot, json!({ "updates": updates }), origin)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame and check protocol/version
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.protocol != PROTOCOL {
            return Err(EnvelopeError::Protocol(envelope.protocol));
        }
        if envelope.version != VERSION {
            return Err(EnvelopeError::Version(envelope.version));
        }
        Ok(envelope)
    }

    /// Dedup id, if the sender stamped a usable one
    pub fn dedup_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// `payload.data` of an update envelope, when present and non-null
    pub fn update_data(&self) -> Option<&Value> {
        self.payload.get("data").filter(|v| is_truthy(v))
    }

    /// `payload.updates` of a snapshot envelope, with null/false items skipped
    pub fn snapshot_updates(&self) -> Vec<&Value> {
        self.payload
            .get("updates")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter(|v| is_truthy(v)).collect())
            .unwrap_or_default()
    }
}

/// Non-string values read as absent
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_ts<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        _ => 0,
    })
}

/// Loose truthiness as the application's producers use it
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

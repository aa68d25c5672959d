//! Topic namespace and payload encoding

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Literal last level of every position topic
pub const POSITIONS_SUFFIX: &str = "positions";

/// `{prefix}/{client_id}/positions`
pub fn position_topic(prefix: &str, client_id: &str) -> String {
    format!("{}/{}/{}", prefix, client_id, POSITIONS_SUFFIX)
}

/// `{prefix}/+/positions`
pub fn position_filter(prefix: &str) -> String {
    format!("{}/+/{}", prefix, POSITIONS_SUFFIX)
}

/// `{prefix}/join`
pub fn join_topic(prefix: &str) -> String {
    format!("{}/join", prefix)
}

pub fn join_announcement(client_id: &str) -> String {
    format!("{} is alive", client_id)
}

/// Destination of a send: a full topic, or a descriptor scoped to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicTarget {
    Topic(String),
    /// Expands to `{prefix}/{own client id}/{name}`
    Scoped { prefix: String, name: String },
}

impl TopicTarget {
    pub fn scoped(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        TopicTarget::Scoped {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn resolve(&self, client_id: &str) -> String {
        match self {
            TopicTarget::Topic(topic) => topic.clone(),
            TopicTarget::Scoped { prefix, name } => format!("{}/{}/{}", prefix, client_id, name),
        }
    }
}

impl From<&str> for TopicTarget {
    fn from(topic: &str) -> Self {
        TopicTarget::Topic(topic.to_string())
    }
}

impl From<String> for TopicTarget {
    fn from(topic: String) -> Self {
        TopicTarget::Topic(topic)
    }
}

/// Message body; text goes out unchanged, anything else as JSON
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// Encode any serializable value. A value that serializes to a bare
    /// string is kept as text.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(match serde_json::to_value(value)? {
            serde_json::Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        })
    }

    pub fn into_text(self) -> String {
        match self {
            Payload::Text(text) => text,
            Payload::Json(value) => value.to_string(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        }
    }
}

/// A typical position payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    pub timestamp_ms: i64,
}

impl PositionUpdate {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            z: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

//! Realtime channel protocol frames.

use linkmark_core::{ChangeEvent, ChangeKind};
use serde::{Deserialize, Serialize};

/// Topic prefix for table change channels.
const TOPIC_PREFIX: &str = "realtime:public:";

/// Topic carrying heartbeat frames.
const HEARTBEAT_TOPIC: &str = "phoenix";

/// Channel join event name.
const EVENT_JOIN: &str = "phx_join";

/// Channel leave event name.
const EVENT_LEAVE: &str = "phx_leave";

/// Heartbeat event name.
const EVENT_HEARTBEAT: &str = "heartbeat";

/// Builds the channel topic for a table's change feed.
pub fn channel_topic(table: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, table)
}

/// A frame sent to/from the realtime endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl RealtimeMessage {
    /// Create a channel join frame watching all row changes in the
    /// topic's table.
    pub fn join(topic: &str, reference: u64) -> Self {
        let table = topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic);
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: serde_json::json!({
                "config": {
                    "postgres_changes": [
                        { "event": "*", "schema": "public", "table": table }
                    ]
                }
            }),
            reference: Some(reference.to_string()),
        }
    }

    /// Create a channel leave frame.
    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: serde_json::json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Create a heartbeat frame.
    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: serde_json::json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Interpret this frame as a row change notification.
    ///
    /// Returns None for protocol frames (join replies, heartbeats,
    /// presence) and for topics outside the table-change prefix.
    pub fn change_event(&self) -> Option<ChangeEvent> {
        let kind = match self.event.as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => return None,
        };
        let table = self.topic.strip_prefix(TOPIC_PREFIX)?.to_string();
        Some(ChangeEvent { table, kind })
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// Topic of the connection-level heartbeat.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Table whose inserts make up a quest's transcript.
pub const MESSAGES_TABLE: &str = "messages";

/// Channel topic for one quest's message inserts.
pub fn quest_topic(quest_id: Uuid) -> String {
    format!("realtime:quest-{}", quest_id)
}

/// One text frame on the realtime socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelFrame {
    /// Join a quest's channel, asking for inserts on `messages` filtered to
    /// that quest only.
    pub fn join(quest_id: Uuid, access_token: &str, reference: u64) -> Self {
        Self {
            topic: quest_topic(quest_id),
            event: EVENT_JOIN.into(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": MESSAGES_TABLE,
                        "filter": format!("quest_id=eq.{}", quest_id),
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(quest_id: Uuid, reference: u64) -> Self {
        Self {
            topic: quest_topic(quest_id),
            event: EVENT_LEAVE.into(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.into(),
            event: EVENT_HEARTBEAT.into(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Sort an incoming frame into what the subscriber cares about.
    pub fn classify(self) -> ChannelEvent {
        match self.event.as_str() {
            EVENT_REPLY => {
                let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
                let response = self.payload.get("response").cloned().unwrap_or(Value::Null);
                ChannelEvent::Reply {
                    reference: self.reference,
                    ok,
                    response,
                }
            }
            EVENT_CHANGES => match serde_json::from_value::<ChangePayload>(self.payload) {
                Ok(change) => ChannelEvent::Change(change.data),
                Err(e) => ChannelEvent::Malformed(e.to_string()),
            },
            EVENT_ERROR => ChannelEvent::Error(self.payload),
            EVENT_CLOSE => ChannelEvent::Closed,
            _ => ChannelEvent::Other(self.event),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

/// A single row change pushed by the realtime service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    /// The inserted row, undecoded. Decoding into a `Message` happens at the
    /// subscriber so a bad row can be dropped without tearing down the socket.
    #[serde(default)]
    pub record: Value,
}

impl ChangeData {
    pub fn is_message_insert(&self) -> bool {
        self.kind.eq_ignore_ascii_case("INSERT")
            && self.table.as_deref().is_none_or(|t| t == MESSAGES_TABLE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    Change(ChangeData),
    /// A `postgres_changes` frame whose payload did not have the expected shape.
    Malformed(String),
    Error(Value),
    Closed,
    Other(String),
}

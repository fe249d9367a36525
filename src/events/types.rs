//! Home Assistant WebSocket frames and the normalized event record

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Reply to `auth_required`
    Auth { access_token: String },
    /// Subscribe to one event type, or to everything when `event_type` is absent
    SubscribeEvents {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
        id: u64,
    },
}

/// Frames received from the server that the listener cares about
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    Event {
        event: RawEvent,
    },
    #[serde(other)]
    Other,
}

fn default_success() -> bool {
    true
}

/// Event payload of a change notification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub data: RawEventData,
    pub time_fired: String,
    pub event_type: String,
}

/// `data` member of a change notification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEventData {
    pub entity_id: String,
    /// `None` when absent (not a state change), `Some(None)` when the entity was removed
    #[serde(deserialize_with = "present")]
    pub new_state: Option<Option<RawState>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<RawState>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawState>::deserialize(deserializer).map(Some)
}

/// Entity state carried by a change notification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawState {
    pub state: String,
    pub attributes: Value,
}

/// Flattened change notification handed to the event sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub entity_id: String,
    pub state: String,
    /// Attribute map serialized as JSON
    pub attributes: String,
    pub timestamp: String,
    pub event_type: String,
}

impl NormalizedEvent {
    /// Reduce a change notification.
    ///
    /// Returns `None` for events that do not describe an entity state
    /// (`call_service`, `automation_triggered`...).
    pub fn from_raw(raw: RawEvent) -> Option<Self> {
        if raw.data.entity_id.is_empty() {
            return None;
        }

        let (state, attributes) = match raw.data.new_state? {
            Some(new_state) => {
                let attributes = match new_state.attributes {
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                };
                (new_state.state, attributes)
            }
            // Entity removed
            None => (String::new(), "{}".to_string()),
        };

        Some(Self {
            entity_id: raw.data.entity_id,
            state,
            attributes,
            timestamp: raw.time_fired,
            event_type: raw.event_type,
        })
    }
}

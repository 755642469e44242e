use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbox item, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
}

impl RawMessage {
    /// True when this message sorts strictly after the checkpoint marker.
    pub fn is_after(&self, checkpoint: &Checkpoint) -> bool {
        match (&checkpoint.received_at, &checkpoint.message_id) {
            (None, _) => true,
            (Some(at), id) => {
                let marker_id = id.as_deref().unwrap_or("");
                (self.received_at, self.id.as_str()) > (*at, marker_id)
            }
        }
    }
}

/// Marker of the last fully processed message. The default marks the beginning of the inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub received_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

impl Checkpoint {
    pub fn at(message: &RawMessage) -> Self {
        Self {
            received_at: Some(message.received_at),
            message_id: Some(message.id.clone()),
        }
    }
}

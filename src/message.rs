//! Wire-format message types.
//!
//! A [`Message`] is immutable once created; its `id` is the sole identity
//! key. The same message may legitimately arrive more than once, over
//! different channels, in any order — deduplication downstream relies on
//! nothing but the id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Locator;

/// Kind discriminator carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// An application payload.
    #[serde(rename = "message")]
    Data,
    /// A receipt confirmation for another message. Carries no further ack
    /// obligation.
    #[serde(rename = "acknowledgment")]
    Acknowledgment,
}

/// A channel preference statement carried inside an acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatedPreference {
    /// Channel the statement applies to.
    pub channel_name: String,
    /// Explicit rank, lower is preferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference_order: Option<u32>,
    /// The peer cannot be reached on this channel at all.
    pub cannot_use: bool,
    /// Peer-specific endpoint overriding the channel default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,
}

/// A logical message as serialized on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Globally unique message id.
    pub id: Uuid,
    /// Payload or acknowledgment.
    pub kind: MessageKind,
    /// Application content. Empty for acknowledgments.
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Locator of the sender, used to address acknowledgments.
    pub sender_locator: String,
    /// Id of the message this acknowledgment confirms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_target_id: Option<Uuid>,
    /// When the acknowledged message was received, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_received_at: Option<i64>,
    /// Channel the acknowledged message arrived on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_received_via: Option<String>,
    /// The sender's current channel preference table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_preferences: Option<Vec<StatedPreference>>,
}

impl Message {
    /// Create a data message from the given sender.
    pub fn data(sender: &Locator, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageKind::Data,
            content: content.into(),
            created_at: Utc::now().timestamp_millis(),
            sender_locator: sender.as_str().to_string(),
            ack_target_id: None,
            ack_received_at: None,
            ack_received_via: None,
            channel_preferences: None,
        }
    }

    /// Create an acknowledgment for a received message.
    ///
    /// `received_via` is the channel the original arrived on; `preferences`
    /// is the local preference table shared with the peer.
    pub fn acknowledgment(
        sender: &Locator,
        target: &Message,
        received_via: &str,
        preferences: Vec<StatedPreference>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            kind: MessageKind::Acknowledgment,
            content: String::new(),
            created_at: now,
            sender_locator: sender.as_str().to_string(),
            ack_target_id: Some(target.id),
            ack_received_at: Some(now),
            ack_received_via: Some(received_via.to_string()),
            channel_preferences: if preferences.is_empty() {
                None
            } else {
                Some(preferences)
            },
        }
    }

    /// Whether this message is an acknowledgment.
    pub fn is_acknowledgment(&self) -> bool {
        self.kind == MessageKind::Acknowledgment
    }

    /// Serialize to the wire form.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a wire payload.
    pub fn from_wire(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

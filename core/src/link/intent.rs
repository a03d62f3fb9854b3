// Outbound intent: what the current contact wants to push

use crate::message::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flags attached to an outbound intent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFlags {
    /// Start sending as soon as the link is up, without asking the user
    pub no_confirmation: bool,
}

/// Payload prepared for a single contact.
///
/// Built fresh on every activation and dropped when the contact ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundIntent {
    /// Correlates log lines for one contact
    pub id: Uuid,
    pub message: Option<Message>,
    /// Resource locators for a negotiated (handover-style) share
    pub uris: Vec<String>,
    pub flags: IntentFlags,
}

impl OutboundIntent {
    pub fn new(message: Option<Message>, uris: Vec<String>, flags: IntentFlags) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            uris,
            flags,
        }
    }

    /// Intent carrying only a message
    pub fn message(message: Message) -> Self {
        Self::new(Some(message), Vec::new(), IntentFlags::default())
    }

    /// Intent carrying only locators
    pub fn uris(uris: Vec<String>) -> Self {
        Self::new(None, uris, IntentFlags::default())
    }

    /// Skip the confirmation step
    pub fn without_confirmation(mut self) -> Self {
        self.flags.no_confirmation = true;
        self
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    pub fn has_locators(&self) -> bool {
        !self.uris.is_empty()
    }

    /// Whether there is anything to send. Locators only count when the
    /// device can perform a negotiated transfer at all.
    pub fn is_sendable(&self, handover_supported: bool) -> bool {
        self.has_message() || (self.has_locators() && handover_supported)
    }
}

//! Chat message type shared by the log, the transport and the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AnonymousIdentity;

/// Sender name reserved for counsellor/system messages.
pub const SYSTEM_SENDER: &str = "counsellor";

/// A single chat message.
///
/// Messages are immutable once composed. The timestamp is assigned by the
/// sender at composition time and is the sort key of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned message id, if the backend supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identity id of the author, or [`SYSTEM_SENDER`].
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Composition instant (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
}

/// Key under which two deliveries count as the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Backend supplied an id.
    Server(String),
    /// No id; fall back to the message contents.
    Composite {
        sender: String,
        timestamp: DateTime<Utc>,
        text: String,
    },
}

impl ChatMessage {
    /// Create a message without a server id.
    #[must_use]
    pub fn new(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Create a counsellor/system message.
    #[must_use]
    pub fn system(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(SYSTEM_SENDER, text, timestamp)
    }

    /// Attach a server-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Content key: `(sender, timestamp, text)`.
    #[must_use]
    pub fn composite_key(&self) -> DedupKey {
        DedupKey::Composite {
            sender: self.sender.clone(),
            timestamp: self.timestamp,
            text: self.text.clone(),
        }
    }

    /// Server id key, if the backend supplied one.
    #[must_use]
    pub fn server_key(&self) -> Option<DedupKey> {
        self.id.clone().map(DedupKey::Server)
    }

    /// Every key this message is known by.
    ///
    /// Two deliveries are the same message if any of their keys match, so a
    /// copy without an id still matches the server-stamped copy.
    pub fn dedup_keys(&self) -> impl Iterator<Item = DedupKey> + use<> {
        std::iter::once(self.composite_key()).chain(self.server_key())
    }

    /// Whether the text is empty after trimming.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Whether this message was written by `identity`.
    #[must_use]
    pub fn is_from(&self, identity: &AnonymousIdentity) -> bool {
        self.sender == identity.as_str()
    }

    /// Whether this is a counsellor/system message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

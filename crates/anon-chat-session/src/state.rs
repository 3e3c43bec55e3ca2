//! Observable chat state.

use anon_chat_core::ChatMessage;
use anon_chat_transport::{TransportSnapshot, TransportState};

/// Health of a started chat's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    /// Retrying; `attempt` counts from 1 since the last live connection.
    Reconnecting { attempt: u32 },
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatStatus {
    /// Not started.
    #[default]
    Idle,
    /// Started; first connection attempt pending.
    Starting,
    /// Running.
    Live(LinkStatus),
    /// Stopped. Terminal.
    Ended,
}

impl ChatStatus {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live(_))
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Live(LinkStatus::Connected))
    }

    #[must_use]
    pub const fn is_reconnecting(self) -> bool {
        matches!(self, Self::Live(LinkStatus::Reconnecting { .. }))
    }
}

impl From<&TransportSnapshot> for ChatStatus {
    fn from(snapshot: &TransportSnapshot) -> Self {
        match snapshot.state {
            TransportState::Disconnected | TransportState::Connecting => Self::Starting,
            TransportState::Connected => Self::Live(LinkStatus::Connected),
            TransportState::Reconnecting => Self::Live(LinkStatus::Reconnecting {
                attempt: snapshot.retry_count,
            }),
            TransportState::Closed => Self::Ended,
        }
    }
}

/// Snapshot published to presentation code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatState {
    pub status: ChatStatus,
    /// Ordered, deduplicated transcript.
    pub messages: Vec<ChatMessage>,
}

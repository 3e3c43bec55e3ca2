//! Connection seam between the transport session and the wire.

use std::pin::Pin;

use anon_chat_core::AnonymousIdentity;
use async_trait::async_trait;
use futures::{Sink, Stream, stream::BoxStream};
use thiserror::Error;

use crate::protocol::{ClientEvent, ServerEvent};

/// Transport error.
///
/// `Connect`, `Disconnected` and `Protocol` are transient: the session
/// retries them and only reports a reconnecting state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Connection lost: {0}")]
    Disconnected(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the session should retry after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Disconnected(_) | Self::Protocol(_)
        )
    }
}

/// Outbound half of a connection.
pub type EventSink = Pin<Box<dyn Sink<ClientEvent, Error = TransportError> + Send>>;

/// Inbound half of a connection, in backend order.
pub type EventStream = BoxStream<'static, Result<ServerEvent, TransportError>>;

/// One established duplex connection.
///
/// The stream ending means the backend went away.
pub struct Connection {
    pub sink: EventSink,
    pub stream: EventStream,
}

impl Connection {
    /// Wrap a sink/stream pair.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<ClientEvent, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<ServerEvent, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Trait for establishing connections to the chat backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open one connection on behalf of `identity`.
    async fn connect(&self, identity: &AnonymousIdentity) -> Result<Connection, TransportError>;
}

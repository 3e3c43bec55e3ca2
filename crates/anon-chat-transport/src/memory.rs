//! In-process connector.
//!
//! Useful for tests and for hosting a backend in the same process.
//! Each successful connect hands a [`MemoryPeer`] to the [`MemoryServer`];
//! dropping the peer looks like the backend going away.

use std::sync::{Arc, Mutex, PoisonError};

use anon_chat_core::{AnonymousIdentity, ChatMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    connector::{Connection, Connector, TransportError},
    protocol::{ClientEvent, ServerEvent},
};

struct Inner {
    pending_failures: usize,
    attempts: usize,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Connector backed by in-memory channels.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnector {
    /// Create a connector and the server side that accepts its connections.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Mutex::new(Inner {
                pending_failures: 0,
                attempts: 0,
                peers,
            })),
        };
        (connector, MemoryServer { accepted })
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.lock().pending_failures = count;
    }

    /// Number of connection attempts so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, identity: &AnonymousIdentity) -> Result<Connection, TransportError> {
        let (to_server, from_client) = mpsc::unbounded_channel::<ClientEvent>();
        let (to_client, from_server) = mpsc::unbounded_channel();

        {
            let mut inner = self.lock();
            inner.attempts += 1;
            if inner.pending_failures > 0 {
                inner.pending_failures -= 1;
                return Err(TransportError::Connect("connection refused".to_string()));
            }

            let peer = MemoryPeer {
                identity: identity.clone(),
                incoming: from_client,
                outgoing: to_client,
            };
            inner
                .peers
                .send(peer)
                .map_err(|_| TransportError::Connect("server gone".to_string()))?;
        }

        let sink = futures::sink::unfold(to_server, |tx, event: ClientEvent| async move {
            tx.send(event)
                .map_err(|_| TransportError::Disconnected("peer dropped".to_string()))?;
            Ok::<_, TransportError>(tx)
        });
        let stream = UnboundedReceiverStream::new(from_server);

        Ok(Connection::new(sink, stream))
    }
}

/// Accepting side of a [`MemoryConnector`].
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next successful connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Take a connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.try_recv().ok()
    }
}

/// Backend end of one in-memory connection.
pub struct MemoryPeer {
    identity: AnonymousIdentity,
    incoming: mpsc::UnboundedReceiver<ClientEvent>,
    outgoing: mpsc::UnboundedSender<Result<ServerEvent, TransportError>>,
}

impl MemoryPeer {
    /// Identity the client connected with.
    #[must_use]
    pub fn identity(&self) -> &AnonymousIdentity {
        &self.identity
    }

    /// Push a server event. Returns `false` if the client is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outgoing.send(Ok(event)).is_ok()
    }

    /// Push a `chat_history` snapshot.
    pub fn send_history(&self, messages: Vec<ChatMessage>) -> bool {
        self.send(ServerEvent::ChatHistory(messages))
    }

    /// Push a `receiveMessage` event.
    pub fn send_message(&self, message: ChatMessage) -> bool {
        self.send(ServerEvent::ReceiveMessage(message))
    }

    /// Break the connection with a transport error.
    pub fn fail(self, reason: &str) {
        let _ = self
            .outgoing
            .send(Err(TransportError::Disconnected(reason.to_string())));
    }

    /// Wait for the next client event.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.incoming.recv().await
    }

    /// Take a client event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.incoming.try_recv().ok()
    }
}

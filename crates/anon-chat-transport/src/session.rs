//! Transport session: one logical connection with reconnect and backoff.
//!
//! The session owns a single background task. That task connects through a
//! [`Connector`], forwards backend events to the owner in the order they
//! arrive, and on any failure sleeps for a capped exponential delay before
//! trying again. It never gives up on its own; only [`TransportSession::close`]
//! (or dropping the session) stops it.

use std::{sync::Arc, time::Duration};

use anon_chat_core::{AnonymousIdentity, ChatMessage, ReconnectConfig};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    connector::{Connection, Connector, TransportError},
    protocol::{ClientEvent, ServerEvent},
};

/// Upper bound on a graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not opened yet.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Live connection.
    Connected,
    /// Lost or never reached the backend; retrying with backoff.
    Reconnecting,
    /// Closed by the owner. Terminal.
    Closed,
}

/// Observable view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub state: TransportState,
    /// Reconnect attempts since the last live connection.
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Default for TransportSnapshot {
    fn default() -> Self {
        Self {
            state: TransportState::Disconnected,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Event delivered to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    History(Vec<ChatMessage>),
    Message(ChatMessage),
    Disconnected(String),
}

/// Owned handle to one logical connection with the chat backend.
///
/// Events are not deduplicated here; a backend may replay history or
/// rebroadcast messages and the receiver is expected to cope.
pub struct TransportSession<C: Connector + ?Sized> {
    connector: Arc<C>,
    policy: ReconnectConfig,
    state: Arc<watch::Sender<TransportSnapshot>>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    pending: Option<(
        mpsc::UnboundedSender<TransportEvent>,
        mpsc::UnboundedReceiver<ClientEvent>,
    )>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector + ?Sized> TransportSession<C> {
    /// Create a closed session.
    ///
    /// Returns the session and the receiver for its events.
    #[must_use]
    pub fn new(
        connector: Arc<C>,
        policy: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(TransportSnapshot::default());

        let session = Self {
            connector,
            policy,
            state: Arc::new(state),
            outbound,
            pending: Some((events_tx, outbound_rx)),
            cancel: CancellationToken::new(),
            task: None,
        };

        (session, events_rx)
    }

    /// Start connecting on behalf of `identity`.
    ///
    /// Returns immediately. Calling this again while open, or after
    /// [`close`](Self::close), does nothing.
    pub fn open(&mut self, identity: AnonymousIdentity) {
        if self.cancel.is_cancelled() {
            tracing::debug!("Transport closed, ignoring open");
            return;
        }
        let Some((events, outbound)) = self.pending.take() else {
            tracing::debug!("Transport already open, ignoring open");
            return;
        };

        let worker = Worker {
            connector: Arc::clone(&self.connector),
            identity,
            policy: self.policy.clone(),
            state: Arc::clone(&self.state),
            events,
            outbound,
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Hand a message to the live connection.
    ///
    /// Nothing is buffered while offline.
    ///
    /// # Errors
    /// Returns [`TransportError::NotConnected`] unless the state is `Connected`.
    pub fn send(&self, message: ChatMessage) -> Result<(), TransportError> {
        if self.state.borrow().state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(ClientEvent::SendMessage(message))
            .map_err(|_| TransportError::Closed)
    }

    /// Tear the session down.
    ///
    /// Cancels any pending backoff, closes the connection and waits for the
    /// background task. Safe to call more than once.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.pending = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Transport task panicked: {e}");
                }
            }
        }
        self.state.send_modify(|s| s.state = TransportState::Closed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state.borrow().state
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TransportSnapshot {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransportSnapshot> {
        self.state.subscribe()
    }
}

impl<C: Connector + ?Sized> Drop for TransportSession<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Exit {
    /// Owner closed the session or went away.
    Stopped,
    /// Connection dropped; reconnect.
    Lost(String),
}

/// Background connection task.
struct Worker<C: Connector + ?Sized> {
    connector: Arc<C>,
    identity: AnonymousIdentity,
    policy: ReconnectConfig,
    state: Arc<watch::Sender<TransportSnapshot>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    cancel: CancellationToken,
}

impl<C: Connector + ?Sized> Worker<C> {
    async fn run(mut self) {
        let mut retry: u32 = 0;
        let mut first = true;

        loop {
            if first {
                first = false;
                self.publish(|s| s.state = TransportState::Connecting);
            } else {
                retry = retry.saturating_add(1);
                let delay = self.policy.delay_for(retry);
                self.publish(|s| {
                    s.state = TransportState::Reconnecting;
                    s.retry_count = retry;
                });
                tracing::debug!(retry, ?delay, "Waiting before reconnect");

                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.identity) => result,
            };

            let connection = match attempt {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, retry, "Chat backend unreachable");
                    self.publish(|s| s.last_error = Some(e.to_string()));
                    continue;
                }
            };

            retry = 0;
            self.discard_stale();
            self.publish(|s| {
                s.state = TransportState::Connected;
                s.retry_count = 0;
            });
            tracing::info!(identity = %self.identity, "Connected to chat backend");
            if self.events.send(TransportEvent::Connected).is_err() {
                break;
            }

            match self.pump(connection).await {
                Exit::Stopped => break,
                Exit::Lost(reason) => {
                    tracing::info!(%reason, "Disconnected from chat backend");
                    self.publish(|s| s.last_error = Some(reason.clone()));
                    if self.events.send(TransportEvent::Disconnected(reason)).is_err() {
                        break;
                    }
                }
            }
        }

        self.publish(|s| s.state = TransportState::Closed);
        tracing::debug!("Transport task finished");
    }

    async fn pump(&mut self, connection: Connection) -> Exit {
        let Connection {
            mut sink,
            mut stream,
        } = connection;

        let exit = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Exit::Stopped,
                Some(event) = self.outbound.recv() => {
                    if let Err(e) = sink.send(event).await {
                        break Exit::Lost(e.to_string());
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(event)) => {
                        if !forward(&self.events, event) {
                            break Exit::Stopped;
                        }
                    }
                    Some(Err(e)) => break Exit::Lost(e.to_string()),
                    None => break Exit::Lost("connection closed by server".to_string()),
                },
            }
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Error closing connection: {e}"),
            Err(_) => tracing::debug!("Timed out closing connection"),
        }

        exit
    }

    /// Drop sends that raced with the previous disconnect.
    fn discard_stale(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded sends queued before disconnect");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut TransportSnapshot)) {
        self.state.send_modify(update);
    }
}

/// Map a backend event onto the owner's channel. `false` once the owner is gone.
fn forward(events: &mpsc::UnboundedSender<TransportEvent>, event: ServerEvent) -> bool {
    let event = match event {
        ServerEvent::ChatHistory(messages) => TransportEvent::History(messages),
        ServerEvent::ReceiveMessage(message) => TransportEvent::Message(message),
        ServerEvent::Error { message } => {
            tracing::warn!(%message, "Chat backend reported an error");
            return true;
        }
    };
    events.send(event).is_ok()
}

#[cfg(test)]
mod tests {
    use anon_chat_core::{IdentityGenerator, RandomIdentityGenerator};

    use super::*;
    use crate::memory::MemoryConnector;

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let (connector, _server) = MemoryConnector::new();
        let (session, _events) = TransportSession::new(Arc::new(connector), ReconnectConfig::default());

        assert_eq!(session.state(), TransportState::Disconnected);
        let msg = ChatMessage::new("User-00000000", "hi", chrono::Utc::now());
        assert_eq!(session.send(msg), Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_without_open() {
        let (connector, _server) = MemoryConnector::new();
        let (mut session, mut events) =
            TransportSession::new(Arc::new(connector), ReconnectConfig::default());

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), TransportState::Closed);
        assert!(events.recv().await.is_none());

        // Reopening a closed session is ignored.
        session.open(RandomIdentityGenerator.generate());
        assert_eq!(session.state(), TransportState::Closed);
    }
}

//! Chat controller: the one entry point for presentation code.
//!
//! The controller wires an [`IdentityStore`], a [`TransportSession`] and a
//! [`MessageLog`] together. The log is owned by a single background task
//! that applies transport events in arrival order; everyone else observes
//! [`ChatState`] snapshots through a watch channel.

use std::sync::Arc;

use anon_chat_core::{AnonymousIdentity, ChatConfig, ChatMessage, IdentityStorage, MessageLog};
use anon_chat_transport::{Connector, TransportError, TransportEvent, TransportSession, TransportSnapshot};
use chrono::Utc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    identity::IdentityStore,
    state::{ChatState, ChatStatus},
};

/// Chat controller error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Not connected to the chat backend")]
    NotConnected,
}

impl From<TransportError> for ChatError {
    fn from(e: TransportError) -> Self {
        tracing::debug!("Send rejected by transport: {e}");
        Self::NotConnected
    }
}

/// Resources that exist between `start` and `stop`.
struct Running<C: Connector + ?Sized> {
    transport: TransportSession<C>,
    task: JoinHandle<()>,
}

impl<C: Connector + ?Sized> Drop for Running<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Orchestrates one anonymous chat.
pub struct ChatController<C, S>
where
    C: Connector + ?Sized,
    S: IdentityStorage,
{
    config: ChatConfig,
    identities: IdentityStore<S>,
    connector: Arc<C>,
    seeded: Vec<ChatMessage>,
    state: Arc<watch::Sender<ChatState>>,
    identity: Option<AnonymousIdentity>,
    running: Option<Running<C>>,
    ended: bool,
}

impl<C, S> ChatController<C, S>
where
    C: Connector + ?Sized,
    S: IdentityStorage,
{
    /// Create an idle controller.
    #[must_use]
    pub fn new(config: ChatConfig, connector: Arc<C>, storage: S) -> Self {
        Self::with_identity_store(config, connector, IdentityStore::new(storage))
    }

    /// Create an idle controller around a preconfigured identity store.
    #[must_use]
    pub fn with_identity_store(
        config: ChatConfig,
        connector: Arc<C>,
        identities: IdentityStore<S>,
    ) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            config,
            identities,
            connector,
            seeded: Vec::new(),
            state: Arc::new(state),
            identity: None,
            running: None,
            ended: false,
        }
    }

    /// Queue messages for the initial transcript, e.g. history fetched by
    /// the host before the socket opens. Ignored once started.
    pub fn seed_history(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        if self.running.is_some() || self.ended {
            tracing::debug!("Chat already started, ignoring seeded history");
            return;
        }
        self.seeded.extend(messages);
    }

    /// Resolve the identity and open the connection.
    ///
    /// Returns once the connection task is spawned; it does not wait for the
    /// backend. Calling it again, or after [`stop`](Self::stop), does nothing.
    pub async fn start(&mut self) {
        if self.running.is_some() || self.ended {
            tracing::debug!("Chat already started, ignoring start");
            return;
        }
        self.state.send_modify(|s| s.status = ChatStatus::Starting);

        let identity = self.identities.get_or_create().await;

        let mut log = self
            .config
            .history_limit
            .map_or_else(MessageLog::new, MessageLog::with_limit);
        if let Some(text) = &self.config.welcome_message {
            log.append(ChatMessage::system(text.clone(), Utc::now()));
        }
        log.load_history(std::mem::take(&mut self.seeded));
        let messages = log.all().to_vec();
        self.state.send_modify(|s| s.messages = messages);

        let (mut transport, events) =
            TransportSession::new(Arc::clone(&self.connector), self.config.reconnect.clone());
        let link = transport.subscribe();
        transport.open(identity.clone());

        let task = tokio::spawn(drive(log, events, link, Arc::clone(&self.state)));

        tracing::info!(%identity, "Chat started");
        self.identity = Some(identity);
        self.running = Some(Running { transport, task });
    }

    /// Send `text` as the local user.
    ///
    /// The message is not added to the transcript here. It appears once the
    /// backend broadcasts it back.
    ///
    /// # Errors
    /// [`ChatError::EmptyMessage`] for blank input, [`ChatError::NotConnected`]
    /// unless the chat is started and currently connected.
    pub fn send_text(&self, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let (Some(running), Some(identity)) = (&self.running, &self.identity) else {
            return Err(ChatError::NotConnected);
        };

        let message = ChatMessage::new(identity.as_str(), text, Utc::now());
        running.transport.send(message.clone())?;
        tracing::debug!(len = text.len(), "Message sent");
        Ok(message)
    }

    /// Close the connection and end the chat. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.transport.close().await;
            if let Err(e) = (&mut running.task).await {
                if e.is_panic() {
                    tracing::error!("Chat event task panicked: {e}");
                }
            }
            tracing::info!("Chat ended");
        }
        self.ended = true;
        self.state.send_modify(|s| s.status = ChatStatus::Ended);
    }

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// The local identity, once started.
    #[must_use]
    pub fn identity(&self) -> Option<&AnonymousIdentity> {
        self.identity.as_ref()
    }
}

/// Owns the log for the lifetime of one started chat.
async fn drive(
    mut log: MessageLog,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut link: watch::Receiver<TransportSnapshot>,
    state: Arc<watch::Sender<ChatState>>,
) {
    let mut link_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => apply(&mut log, event, &state),
                None => break,
            },
            changed = link.changed(), if link_open => {
                if changed.is_err() {
                    link_open = false;
                    continue;
                }
                let status = ChatStatus::from(&*link.borrow_and_update());
                state.send_if_modified(|s| {
                    if s.status == status || s.status == ChatStatus::Ended {
                        return false;
                    }
                    s.status = status;
                    true
                });
            }
        }
    }

    tracing::debug!(messages = log.len(), "Chat event task finished");
}

fn apply(log: &mut MessageLog, event: TransportEvent, state: &watch::Sender<ChatState>) {
    let changed = match event {
        TransportEvent::Connected => {
            tracing::debug!("Transport connected");
            false
        }
        TransportEvent::History(messages) => log.load_history(messages) > 0,
        TransportEvent::Message(message) => log.append(message),
        TransportEvent::Disconnected(reason) => {
            tracing::debug!(%reason, "Transport disconnected");
            false
        }
    };
    if changed {
        let messages = log.all().to_vec();
        state.send_modify(|s| s.messages = messages);
    }
}

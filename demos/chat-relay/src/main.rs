//! Minimal chat backend for trying the client locally.
//!
//! Run with: cargo run -p chat-relay
//!
//! Listens on ws://127.0.0.1:5000/chat (override with `CHAT_RELAY_ADDR`).
//! Every client receives the recent history on connect and every accepted
//! message afterwards, its own included.
//!
//! Set `CHAT_RELAY_REPLY_MS` to have a counsellor answer each user message
//! after that many milliseconds.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anon_chat_core::{AnonymousIdentity, ChatMessage};
use anon_chat_transport::{ClientEvent, ServerEvent};
use anyhow::Context;
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Messages replayed to a newly connected client.
const HISTORY_LEN: usize = 50;

const DEFAULT_ADDR: &str = "127.0.0.1:5000";

const COUNSELLOR_REPLY: &str = "Thank you for sharing. Would you like to talk more about that?";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    history: Arc<RwLock<VecDeque<ChatMessage>>>,
    feed: broadcast::Sender<ChatMessage>,
    /// Delay before the counsellor answers a user message. Off when unset.
    reply_after: Option<Duration>,
}

impl AppState {
    fn new(reply_after: Option<Duration>) -> Self {
        let (feed, _) = broadcast::channel(256);
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_LEN))),
            feed,
            reply_after,
        }
    }

    /// Publish an accepted user message and schedule the counsellor reply.
    async fn receive(&self, message: ChatMessage) {
        let from_user = !message.is_system();
        self.publish(message).await;

        if let (true, Some(delay)) = (from_user, self.reply_after) {
            let state = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let reply = ChatMessage::system(COUNSELLOR_REPLY, Utc::now())
                    .with_id(Uuid::new_v4().to_string());
                state.publish(reply).await;
            });
        }
    }

    async fn publish(&self, message: ChatMessage) {
        {
            let mut history = self.history.write().await;
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // No subscribers is fine.
        let _ = self.feed.send(message);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("CHAT_RELAY_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("invalid CHAT_RELAY_ADDR")?;
    let reply_after = std::env::var("CHAT_RELAY_REPLY_MS")
        .ok()
        .map(|ms| ms.parse().map(Duration::from_millis))
        .transpose()
        .context("invalid CHAT_RELAY_REPLY_MS")?;

    let app = Router::new()
        .route("/chat", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(reply_after));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Chat relay listening on ws://{addr}/chat");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user = params
        .get("user")
        .and_then(|raw| AnonymousIdentity::parse(raw).ok());
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

async fn handle_socket(socket: WebSocket, user: Option<AnonymousIdentity>, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let label = user.as_ref().map_or_else(|| "anonymous".to_string(), ToString::to_string);

    // Subscribe before snapshotting so nothing falls in between.
    let mut feed = state.feed.subscribe();
    let history: Vec<ChatMessage> = state.history.read().await.iter().cloned().collect();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let _ = tx.send(ServerEvent::ChatHistory(history));

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_frame() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let feed_tx = tx.clone();
    let feed_task = tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(message) => {
                    if feed_tx.send(ServerEvent::ReceiveMessage(message)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Client fell behind the feed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tracing::info!(user = %label, "Client connected");

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(user = %label, "WebSocket error: {e}");
                break;
            }
        };

        let ClientEvent::SendMessage(message) = match ClientEvent::from_frame(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(user = %label, "Invalid client event: {e}");
                continue;
            }
        };

        match accept(message, user.as_ref()) {
            Ok(message) => state.receive(message).await,
            Err(reason) => {
                let _ = tx.send(ServerEvent::Error {
                    message: reason.to_string(),
                });
            }
        }
    }

    feed_task.abort();
    send_task.abort();
    tracing::info!(user = %label, "Client disconnected");
}

/// Validate an inbound message and stamp it with a server id.
fn accept(
    mut message: ChatMessage,
    user: Option<&AnonymousIdentity>,
) -> Result<ChatMessage, &'static str> {
    if message.is_blank() {
        return Err("Message text is required");
    }
    if let Some(user) = user {
        message.sender = user.to_string();
    } else if message.sender.trim().is_empty() {
        return Err("Sender is required");
    }
    Ok(message.with_id(Uuid::new_v4().to_string()))
}

#![cfg(feature = "websocket")]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anon_chat_core::{AnonymousIdentity, ChatMessage, ReconnectConfig};
use anon_chat_transport::{
    ClientEvent, ServerEvent, TransportEvent, TransportSession, TransportState, WebSocketConnector,
};
use axum::{
    Router,
    extract::{
        Query, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

async fn serve() -> SocketAddr {
    let app = Router::new().route("/chat", get(ws_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let user = params.get("user").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| echo(socket, user))
}

/// Greets with a one-message history, then rebroadcasts every send.
async fn echo(mut socket: WebSocket, user: String) {
    let greeting = ChatMessage::system(format!("hello {user}"), Utc::now());
    let history = ServerEvent::ChatHistory(vec![greeting]).to_frame().unwrap();
    if socket.send(Message::Text(history.into())).await.is_err() {
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(ClientEvent::SendMessage(msg)) = ClientEvent::from_frame(text.as_str()) else {
            continue;
        };
        let reply = ServerEvent::ReceiveMessage(msg).to_frame().unwrap();
        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
}

async fn next_event(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
) -> TransportEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_round_trip_over_websocket() {
    let addr = serve().await;
    let identity = AnonymousIdentity::parse("User-0a1b2c3d").unwrap();
    let connector = WebSocketConnector::new(&format!("ws://{addr}/chat")).unwrap();
    let (mut session, mut events) =
        TransportSession::new(Arc::new(connector), ReconnectConfig::default());

    session.open(identity.clone());
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    let TransportEvent::History(history) = next_event(&mut events).await else {
        panic!("expected history");
    };
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hello User-0a1b2c3d");

    let msg = ChatMessage::new(identity.as_str(), "ping", Utc::now());
    session.send(msg.clone()).unwrap();
    assert_eq!(next_event(&mut events).await, TransportEvent::Message(msg));

    session.close().await;
    assert_eq!(session.state(), TransportState::Closed);
}

#[tokio::test]
async fn test_unreachable_backend_keeps_retrying() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let connector = WebSocketConnector::new(&format!("ws://{addr}/chat")).unwrap();
    let policy = ReconnectConfig {
        initial_delay_ms: 10,
        max_delay_ms: 20,
        multiplier: 2.0,
    };
    let (mut session, _events) = TransportSession::new(Arc::new(connector), policy);
    let mut state = session.subscribe();

    session.open(AnonymousIdentity::parse("User-0a1b2c3d").unwrap());
    timeout(WAIT, state.wait_for(|s| s.retry_count >= 3))
        .await
        .unwrap()
        .unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, TransportState::Reconnecting);
    assert!(snapshot.last_error.is_some());

    session.close().await;
}

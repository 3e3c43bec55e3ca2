//! WebSocket connector.

use anon_chat_core::AnonymousIdentity;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::{
    connector::{Connection, Connector, TransportError},
    protocol::{ClientEvent, ServerEvent},
};

/// Query parameter carrying the anonymous identity.
pub const IDENTITY_PARAM: &str = "user";

/// Connector speaking JSON text frames over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Create a connector for `ws://` or `wss://` `url`.
    ///
    /// # Errors
    /// Returns [`TransportError::Connect`] if the URL is invalid or not a WebSocket URL.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Connect(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::Connect(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }
        Ok(Self { url })
    }

    /// URL used to connect as `identity`.
    #[must_use]
    pub fn url_for(&self, identity: &AnonymousIdentity) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair(IDENTITY_PARAM, identity.as_str());
        url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, identity: &AnonymousIdentity) -> Result<Connection, TransportError> {
        let url = self.url_for(identity);
        tracing::debug!(%url, "Opening WebSocket");

        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| TransportError::Disconnected(e.to_string()))
            .with(|event: ClientEvent| future::ready(encode(&event)));

        let stream = read.filter_map(|frame| future::ready(decode(frame)));

        Ok(Connection::new(sink, stream))
    }
}

fn encode(event: &ClientEvent) -> Result<Message, TransportError> {
    let json = event.to_frame().map_err(|e| {
        tracing::error!("Failed to serialize message: {e}");
        TransportError::Protocol(e.to_string())
    })?;
    Ok(Message::text(json))
}

/// Translate one WebSocket frame. `None` means skip it.
fn decode(
    frame: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<ServerEvent, TransportError>> {
    let text = match frame {
        Ok(Message::Text(text)) => text.as_str().to_owned(),
        Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!("Ignoring non-UTF-8 binary frame");
                return None;
            }
        },
        Ok(Message::Close(frame)) => {
            let reason = frame.map_or_else(
                || "server closed connection".to_string(),
                |f| format!("server closed connection: {}", f.reason.as_str()),
            );
            return Some(Err(TransportError::Disconnected(reason)));
        }
        Ok(_) => return None,
        Err(e) => return Some(Err(TransportError::Disconnected(e.to_string()))),
    };

    match ServerEvent::from_frame(&text) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            tracing::warn!("Invalid server message: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use anon_chat_core::AnonymousIdentity;

    use super::*;

    #[test]
    fn test_rejects_non_websocket_urls() {
        assert!(WebSocketConnector::new("http://localhost:5000/chat").is_err());
        assert!(WebSocketConnector::new("not a url").is_err());
        assert!(WebSocketConnector::new("wss://chat.example.org/chat").is_ok());
    }

    #[test]
    fn test_identity_in_query() {
        let connector = WebSocketConnector::new("ws://localhost:5000/chat?room=main").unwrap();
        let identity = AnonymousIdentity::parse("User-0a1b2c3d").unwrap();
        let url = connector.url_for(&identity);
        assert_eq!(url.as_str(), "ws://localhost:5000/chat?room=main&user=User-0a1b2c3d");
    }

    #[test]
    fn test_decode_skips_garbage_and_control_frames() {
        assert!(decode(Ok(Message::text("{oops".to_string()))).is_none());
        assert!(decode(Ok(Message::Ping(Default::default()))).is_none());

        let ok = decode(Ok(Message::text(r#"{"event":"chat_history","data":[]}"#.to_string())));
        assert_eq!(ok, Some(Ok(ServerEvent::ChatHistory(Vec::new()))));

        let closed = decode(Ok(Message::Close(None)));
        assert!(matches!(closed, Some(Err(TransportError::Disconnected(_)))));
    }
}

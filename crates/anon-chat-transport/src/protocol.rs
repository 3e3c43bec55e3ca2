//! Wire protocol for client-server communication.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use anon_chat_core::ChatMessage;
use serde::{Deserialize, Deserializer, Serialize};

/// Event from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Submit a composed message.
    #[serde(rename = "sendMessage")]
    SendMessage(ChatMessage),
}

/// Event from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Recent history, sent once per connection.
    ///
    /// Invalid entries are skipped rather than failing the whole snapshot.
    #[serde(rename = "chat_history")]
    ChatHistory(#[serde(deserialize_with = "valid_entries")] Vec<ChatMessage>),
    /// One accepted message (possibly our own, echoed back).
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(ChatMessage),
    /// Non-fatal error report.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ClientEvent {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns error on malformed JSON or an unknown event.
    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

impl ServerEvent {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns error on malformed JSON or an unknown event.
    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

/// Decode each history entry on its own, dropping the ones that do not parse.
fn valid_entries<'de, D>(deserializer: D) -> Result<Vec<ChatMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(index, "Skipping invalid history entry: {e}");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn sample() -> ChatMessage {
        ChatMessage::new(
            "User-1a2b3c4d",
            "hello",
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_send_message_wire_shape() {
        let frame = ClientEvent::SendMessage(sample()).to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["event"], "sendMessage");
        assert_eq!(value["data"]["sender"], "User-1a2b3c4d");
        assert_eq!(value["data"]["text"], "hello");
        assert!(value["data"]["timestamp"].as_str().unwrap().starts_with("2024-05-01T10:00:00"));
        assert!(value["data"].get("id").is_none());
    }

    #[test]
    fn test_decode_history() {
        let frame = json!({
            "event": "chat_history",
            "data": [
                {"sender": "counsellor", "text": "hi", "timestamp": "2024-05-01T09:00:00.000Z"},
                {"sender": "User-1a2b3c4d", "text": "hey", "timestamp": "2024-05-01T09:01:00.000Z"}
            ]
        })
        .to_string();

        let ServerEvent::ChatHistory(messages) = ServerEvent::from_frame(&frame).unwrap() else {
            panic!("Wrong event type");
        };
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_system());
    }

    #[test]
    fn test_history_skips_invalid_entries() {
        let frame = json!({
            "event": "chat_history",
            "data": [
                {"sender": "counsellor", "text": "hi", "timestamp": "2024-05-01T09:00:00.000Z"},
                {"sender": "user", "text": "no timestamp"},
                {"sender": "User-1a2b3c4d", "text": "hey", "timestamp": "not a date"},
                {"sender": "User-1a2b3c4d", "text": "still here", "timestamp": "2024-05-01T09:02:00Z"}
            ]
        })
        .to_string();

        let ServerEvent::ChatHistory(messages) = ServerEvent::from_frame(&frame).unwrap() else {
            panic!("Wrong event type");
        };
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["hi", "still here"]);
    }

    #[test]
    fn test_history_must_be_a_list() {
        let frame = r#"{"event":"chat_history","data":{"sender":"a"}}"#;
        assert!(ServerEvent::from_frame(frame).is_err());
    }

    #[test]
    fn test_decode_receive_with_server_id() {
        let frame = r#"{"event":"receiveMessage","data":{"id":"abc","sender":"User-1a2b3c4d","text":"yo","timestamp":"2024-05-01T09:00:00Z"}}"#;
        let ServerEvent::ReceiveMessage(msg) = ServerEvent::from_frame(frame).unwrap() else {
            panic!("Wrong event type");
        };
        assert_eq!(msg.id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ServerEvent::from_frame(r#"{"event":"typing","data":{}}"#).is_err());
        assert!(ClientEvent::from_frame("not json").is_err());
    }
}

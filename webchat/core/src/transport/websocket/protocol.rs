//! WebSocket Wire Protocol
//!
//! Inbound frames are JSON objects discriminated by `type`. This side only
//! reacts to what the server says; it never validates the server's state.
//!
//! | `type`              | Effect                                  |
//! |---------------------|-----------------------------------------|
//! | `auth_success`      | status authenticated                    |
//! | `auth_error`        | status error, error message             |
//! | `message_received`  | stage processing                        |
//! | `thinking_start`    | stage thinking                          |
//! | `typing_start`      | stage typing                            |
//! | `typing_stop`       | stage none                              |
//! | `ai_typing`         | `status` bool toggles typing            |
//! | `message_chunk`     | chunk                                   |
//! | `message_complete`  | complete                                |
//! | `error`             | error message                           |
//! | `pong`              | ignored                                 |
//! | `message` / other   | complete bot message if any text found  |

use serde_json::{json, Value};

use crate::messages::{ConnectionStatus, OutboundMessage, ProcessingStage, QuickReply};
use crate::transport::TransportEvent;

/// Error text when the server rejects our credentials without saying why
pub const AUTH_FAILED_TEXT: &str = "Authentication failed";

/// Error text when the server reports an error without a message
pub const SERVER_ERROR_TEXT: &str =
    "Sorry, I'm having trouble connecting right now. Please try again later.";

/// Authentication frame sent right after the socket opens
#[must_use]
pub fn auth_frame(email: &str, chatbot_id: &str) -> String {
    json!({
        "type": "auth",
        "email": email,
        "chatbotId": chatbot_id,
    })
    .to_string()
}

/// Chat frame for an outbound message
///
/// Quick replies carry both the value and the display text.
#[must_use]
pub fn chat_frame(message: &OutboundMessage) -> String {
    let mut frame = json!({
        "type": "chat",
        "message": message.text,
    });
    if let Some(ref value) = message.quick_reply_value {
        frame["value"] = json!(value);
        frame["text"] = json!(message.text);
    }
    frame.to_string()
}

/// Translate one inbound text frame into transport events
///
/// Unparseable frames are logged and dropped.
#[must_use]
pub fn parse_frame(text: &str) -> Vec<TransportEvent> {
    let data: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping unparseable WebSocket frame");
            return Vec::new();
        }
    };

    if !data.is_object() {
        tracing::warn!("Dropping non-object WebSocket frame");
        return Vec::new();
    }

    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "auth_success" => vec![TransportEvent::Status(ConnectionStatus::Authenticated)],
        "auth_error" => vec![
            TransportEvent::Status(ConnectionStatus::Error),
            TransportEvent::Error(
                first_string(&data, &["message", "error"])
                    .unwrap_or_else(|| AUTH_FAILED_TEXT.to_string()),
            ),
        ],
        "message_received" => vec![TransportEvent::Stage(ProcessingStage::Processing)],
        "thinking_start" => vec![TransportEvent::Stage(ProcessingStage::Thinking)],
        "typing_start" => vec![TransportEvent::Stage(ProcessingStage::Typing)],
        "typing_stop" => vec![TransportEvent::Stage(ProcessingStage::None)],
        "ai_typing" => match data.get("status").and_then(Value::as_bool) {
            Some(true) => vec![TransportEvent::Stage(ProcessingStage::Typing)],
            Some(false) => vec![TransportEvent::Stage(ProcessingStage::None)],
            None => Vec::new(),
        },
        "message_chunk" => first_string(&data, &["chunk", "content", "text", "message"])
            .map(|chunk| vec![TransportEvent::Chunk(chunk)])
            .unwrap_or_default(),
        "message_complete" => vec![TransportEvent::Complete {
            message: first_string(&data, &["message", "text", "content"]),
        }],
        "error" => vec![TransportEvent::Error(
            first_string(&data, &["message", "error"])
                .unwrap_or_else(|| SERVER_ERROR_TEXT.to_string()),
        )],
        "pong" => Vec::new(),
        _ => match bot_text(&data) {
            Some(text) => vec![TransportEvent::BotMessage {
                text,
                quick_replies: quick_replies(&data),
            }],
            None => {
                tracing::debug!(kind, "Ignoring WebSocket frame without text");
                Vec::new()
            }
        },
    }
}

/// Text of a bot message: `text`, then `message`, then the first other string
/// field in wire order
fn bot_text(data: &Value) -> Option<String> {
    first_string(data, &["text", "message"]).or_else(|| {
        data.as_object()?
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .find_map(|(_, value)| value.as_str().filter(|s| !s.is_empty()))
            .map(String::from)
    })
}

fn first_string(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn quick_replies(data: &Value) -> Vec<QuickReply> {
    ["quickReplies", "quick_replies"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_array))
        .map(|replies| replies.iter().filter_map(QuickReply::from_json).collect())
        .unwrap_or_default()
}

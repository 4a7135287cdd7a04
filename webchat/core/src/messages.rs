//! Message Types
//!
//! The data the conversation is made of, plus the snapshot and update types
//! handed to whatever draws the widget.
//!
//! # Design Philosophy
//!
//! The conversation owns every [`Message`]. Render layers never hold a live
//! reference; they receive a [`WidgetSnapshot`] after each state change and
//! redraw from it. Nothing in a snapshot can be written back.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================
// Identifiers
// ============================================

/// Unique message identifier
///
/// Allocated from a process-wide counter, so ordering by id is the same as
/// ordering by creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

// ============================================
// Enums
// ============================================

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The person using the widget
    User,
    /// The chatbot backend
    Bot,
}

/// Transport connection status as shown to the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection (initial state, or after close)
    #[default]
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Socket open, not yet acknowledged by the server
    Connected,
    /// Server accepted our auth frame
    Authenticated,
    /// Connection or authentication failed
    Error,
}

impl ConnectionStatus {
    /// Whether outbound messages can be written right now
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Visible phase of bot activity, drives the typing indicator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    /// No indicator
    #[default]
    None,
    /// Request accepted, nothing back yet
    Processing,
    /// Backend is reasoning
    Thinking,
    /// Backend is producing text
    Typing,
}

impl ProcessingStage {
    /// Indicator label for this stage, `None` when nothing is shown
    #[must_use]
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Processing => Some("Processing"),
            Self::Thinking => Some("Thinking"),
            Self::Typing => Some("Typing"),
        }
    }
}

// ============================================
// Messages
// ============================================

/// A predefined answer the user can pick instead of typing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    /// Label shown on the button and used as the chat text
    pub text: String,
    /// Value forwarded to backends that understand it
    pub value: String,
}

impl QuickReply {
    /// Create a quick reply
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }

    /// Parse one quick reply from a backend payload
    ///
    /// Accepts plain strings or objects carrying `text`/`title` and
    /// `value`/`payload`. A missing value falls back to the text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        if let Some(text) = value.as_str() {
            return Some(Self::new(text, text));
        }

        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| value.get(*name).and_then(|v| v.as_str()))
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let text = field(&["text", "title"]);
        let payload = field(&["value", "payload"]);
        match (text, payload) {
            (Some(text), Some(payload)) => Some(Self::new(text, payload)),
            (Some(text), None) => Some(Self::new(text.clone(), text)),
            (None, Some(payload)) => Some(Self::new(payload.clone(), payload)),
            (None, None) => None,
        }
    }
}

/// A message in the conversation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Message text, grows while streaming or coalescing
    pub text: String,
    /// Who sent this message
    pub sender: Sender,
    /// Wall-clock creation time (Unix ms), refreshed on coalescing
    pub timestamp: i64,
    /// Bot message still receiving chunks
    pub is_streaming: bool,
    /// Message reports a delivery failure
    pub is_error: bool,
    /// User message sent by picking a quick reply
    pub is_quick_reply: bool,
    /// Options offered alongside a bot message
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
    /// Monotonic time of the last write, used for the coalescing window
    #[serde(skip)]
    pub(crate) touched_at: Instant,
}

impl Message {
    fn new(sender: Sender, text: String) -> Self {
        Self {
            id: MessageId::new(),
            text,
            sender,
            timestamp: now_ms(),
            is_streaming: false,
            is_error: false,
            is_quick_reply: false,
            quick_replies: Vec::new(),
            touched_at: Instant::now(),
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text.into())
    }

    /// Create a complete bot message
    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text.into())
    }

    /// Create an empty bot message that will receive chunks
    pub fn streaming() -> Self {
        let mut message = Self::new(Sender::Bot, String::new());
        message.is_streaming = true;
        message
    }

    /// Create a bot-attributed error message
    pub fn error(text: impl Into<String>) -> Self {
        let mut message = Self::new(Sender::Bot, text.into());
        message.is_error = true;
        message
    }

    /// Append text in place and refresh both clocks
    pub(crate) fn merge(&mut self, text: &str) {
        self.text.push_str(text);
        self.timestamp = now_ms();
        self.touched_at = Instant::now();
    }

    /// Time since this message was created or last merged into
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.touched_at.elapsed()
    }
}

/// A message leaving the widget towards the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Text the backend should answer
    pub text: String,
    /// Quick reply value, when the message came from a quick reply
    pub quick_reply_value: Option<String>,
}

// ============================================
// Render Contract
// ============================================

/// Read-only view of the widget handed to the render layer
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    /// Chat overlay visible
    pub is_open: bool,
    /// Overlay in expanded/fullscreen mode
    pub is_expanded: bool,
    /// Input field accepts text
    pub input_enabled: bool,
    /// Current transport status
    pub connection_status: ConnectionStatus,
    /// Current typing indicator stage
    pub processing_stage: ProcessingStage,
    /// Conversation in display order
    pub messages: Vec<Message>,
    /// Bot display name
    pub chatbot_name: String,
    /// Bot avatar image, if configured
    pub avatar_url: Option<String>,
    /// Show the welcome bubble (conversation empty and idle)
    pub show_welcome: bool,
}

impl WidgetSnapshot {
    /// Quick replies offered by the last message, if any
    #[must_use]
    pub fn quick_replies(&self) -> &[QuickReply] {
        self.messages
            .last()
            .map(|m| m.quick_replies.as_slice())
            .unwrap_or_default()
    }
}

/// Updates pushed to the render layer
#[derive(Clone, Debug)]
pub enum WidgetUpdate {
    /// Redraw from this snapshot
    Render(Box<WidgetSnapshot>),
    /// Clear the input field after an accepted send
    ClearInput,
}

/// Current wall-clock time in Unix milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_are_monotonic() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert!(b > a);
        assert!(a.to_string().starts_with("msg_"));
    }

    #[test]
    fn test_message_constructors() {
        let user = Message::user("hi");
        assert_eq!(user.sender, Sender::User);
        assert!(!user.is_streaming);

        let streaming = Message::streaming();
        assert_eq!(streaming.sender, Sender::Bot);
        assert!(streaming.is_streaming);
        assert!(streaming.text.is_empty());

        let error = Message::error("boom");
        assert!(error.is_error);
        assert_eq!(error.sender, Sender::Bot);
    }

    #[test]
    fn test_quick_reply_from_json() {
        assert_eq!(
            QuickReply::from_json(&json!({"text": "Yes", "value": "yes"})),
            Some(QuickReply::new("Yes", "yes"))
        );
        assert_eq!(
            QuickReply::from_json(&json!({"title": "Pricing", "payload": "PRICING"})),
            Some(QuickReply::new("Pricing", "PRICING"))
        );
        assert_eq!(
            QuickReply::from_json(&json!("Help")),
            Some(QuickReply::new("Help", "Help"))
        );
        assert_eq!(
            QuickReply::from_json(&json!({"text": "Only text"})),
            Some(QuickReply::new("Only text", "Only text"))
        );
        assert_eq!(QuickReply::from_json(&json!({"other": 1})), None);
    }

    #[test]
    fn test_connection_status_is_open() {
        assert!(ConnectionStatus::Connected.is_open());
        assert!(ConnectionStatus::Authenticated.is_open());
        assert!(!ConnectionStatus::Connecting.is_open());
        assert!(!ConnectionStatus::Error.is_open());
    }

    #[test]
    fn test_message_serializes_without_internal_clock() {
        let value = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(value["sender"], "user");
        assert_eq!(value["text"], "hello");
        assert!(value.get("touched_at").is_none());
        assert!(value.get("touchedAt").is_none());
        assert!(value.get("quickReplies").is_none());
    }

    #[test]
    fn test_host_payloads_use_camel_case() {
        let mut message = Message::bot("Pick one");
        message.quick_replies = vec![QuickReply::new("Yes", "yes")];
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["isStreaming"], false);
        assert_eq!(value["isError"], false);
        assert_eq!(value["isQuickReply"], false);
        assert_eq!(value["quickReplies"][0]["value"], "yes");
        assert!(value.get("is_streaming").is_none());

        let snapshot = WidgetSnapshot {
            is_open: true,
            is_expanded: false,
            input_enabled: true,
            connection_status: ConnectionStatus::Connected,
            processing_stage: ProcessingStage::None,
            messages: vec![message],
            chatbot_name: "Support".to_string(),
            avatar_url: None,
            show_welcome: false,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["isOpen"], true);
        assert_eq!(value["inputEnabled"], true);
        assert_eq!(value["connectionStatus"], "connected");
        assert_eq!(value["chatbotName"], "Support");
        assert_eq!(value["messages"][0]["quickReplies"][0]["text"], "Yes");
    }
}

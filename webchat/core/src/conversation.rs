//! Conversation State Machine
//!
//! Owns the message list and reconciles transport events into it. Every
//! mutation goes through `&mut self`, so whoever owns the conversation decides
//! the order events are applied in; nothing here is shared or locked.
//!
//! # Turn Lifecycle
//!
//! ```text
//! idle ──begin_send──► processing ──chunk──► typing (streaming message)
//!   ▲                      │                        │
//!   │                      │ bot message            │ complete
//!   │                      ▼                        ▼
//!   └──────────────── turn finished ◄───────────────┘
//!                          ▲
//!                          └── error (any stage)
//! ```
//!
//! # Reconciliation Rules
//!
//! - The first chunk of a turn creates one streaming message; later chunks
//!   append to it in place. At most one message is streaming.
//! - A complete bot message arriving within [`COALESCE_WINDOW`] of the previous
//!   bot message in the same turn is appended to it instead of opening a new
//!   bubble.
//! - Errors become a single bot-attributed message flagged `is_error`.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::WidgetConfig;
use crate::display::format_response_time;
use crate::messages::{
    ConnectionStatus, Message, MessageId, OutboundMessage, ProcessingStage, QuickReply, Sender,
    WidgetSnapshot,
};
use crate::transport::TransportEvent;

/// Bot messages closer together than this are merged into one bubble
pub const COALESCE_WINDOW: Duration = Duration::from_millis(5000);

/// Error text when a transport fails without saying why
pub const DEFAULT_ERROR_TEXT: &str =
    "Sorry, I'm having trouble connecting right now. Please try again later.";

/// Why a send was refused
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendRejection {
    /// Nothing left after trimming
    #[error("message is empty")]
    Empty,
    /// A previous message is still being answered
    #[error("a message is already in flight")]
    Busy,
    /// The widget has been cleaned up
    #[error("conversation has been torn down")]
    TornDown,
    /// The requested quick reply is not on offer
    #[error("no quick reply at that position")]
    NoSuchQuickReply,
}

/// The single conversation behind a widget
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    connection_status: ConnectionStatus,
    processing_stage: ProcessingStage,
    /// Send time of user messages still waiting for an answer
    pending_timestamps: HashMap<MessageId, Instant>,
    streaming_id: Option<MessageId>,
    in_flight: bool,
    torn_down: bool,
    last_response_time: Option<Duration>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Accept a typed message for delivery
    ///
    /// # Errors
    ///
    /// Refuses blank text, a send while a request or a stream is in flight,
    /// and anything after teardown. A refused send leaves the conversation
    /// untouched.
    pub fn begin_send(&mut self, text: &str) -> Result<OutboundMessage, SendRejection> {
        self.check_can_send()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejection::Empty);
        }

        self.push_user(Message::user(text));
        Ok(OutboundMessage {
            text: text.to_string(),
            quick_reply_value: None,
        })
    }

    /// Accept a quick reply for delivery
    ///
    /// # Errors
    ///
    /// Same rules as [`Conversation::begin_send`].
    pub fn begin_quick_reply(
        &mut self,
        reply: &QuickReply,
    ) -> Result<OutboundMessage, SendRejection> {
        self.check_can_send()?;
        if reply.text.trim().is_empty() {
            return Err(SendRejection::Empty);
        }

        let mut message = Message::user(reply.text.clone());
        message.is_quick_reply = true;
        self.push_user(message);
        Ok(OutboundMessage {
            text: reply.text.clone(),
            quick_reply_value: Some(reply.value.clone()),
        })
    }

    fn check_can_send(&self) -> Result<(), SendRejection> {
        if self.torn_down {
            Err(SendRejection::TornDown)
        } else if self.is_busy() {
            Err(SendRejection::Busy)
        } else {
            Ok(())
        }
    }

    fn push_user(&mut self, message: Message) {
        tracing::debug!(
            id = %message.id,
            quick_reply = message.is_quick_reply,
            "User message sent"
        );
        self.pending_timestamps.insert(message.id, Instant::now());
        self.messages.push(message);
        self.processing_stage = ProcessingStage::Processing;
        self.in_flight = true;
    }

    // ========================================================================
    // Inbound Events
    // ========================================================================

    /// Append a piece of the bot's answer
    pub fn handle_chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.processing_stage = ProcessingStage::Typing;

        if let Some(message) = self.streaming_message_mut() {
            message.text.push_str(text);
            return;
        }

        if let Some((id, sent_at)) = self.latest_pending() {
            tracing::info!(
                user_message = %id,
                ttfb = %format_response_time(sent_at.elapsed()),
                "First chunk received"
            );
        }

        let mut message = Message::streaming();
        message.text.push_str(text);
        self.streaming_id = Some(message.id);
        self.messages.push(message);
    }

    /// Finish the streaming message
    ///
    /// A non-empty `final_text` replaces what was streamed. Without a streaming
    /// message it is delivered as a regular bot message. Returns the message
    /// that became final.
    pub fn handle_complete(&mut self, final_text: Option<String>) -> Option<Message> {
        let final_text = final_text.filter(|text| !text.trim().is_empty());

        let Some(id) = self.streaming_id.take() else {
            return match final_text {
                Some(text) => self.handle_bot_message(&text, Vec::new()),
                None => {
                    self.finish_turn();
                    None
                }
            };
        };

        let Some(index) = self.position_of(id) else {
            self.finish_turn();
            return None;
        };
        let message = &mut self.messages[index];
        message.is_streaming = false;
        if let Some(text) = final_text {
            message.text = text;
        }

        let finished = if message.text.is_empty() {
            self.messages.remove(index);
            None
        } else {
            Some(self.messages[index].clone())
        };
        self.finish_turn();
        finished
    }

    /// Deliver a bot message that arrived in one piece
    ///
    /// Merges into the previous bot message of the same turn when it is
    /// younger than [`COALESCE_WINDOW`]. Returns the message as it now stands.
    pub fn handle_bot_message(
        &mut self,
        text: &str,
        quick_replies: Vec<QuickReply>,
    ) -> Option<Message> {
        // A leftover placeholder means events arrived out of order
        self.settle_streaming();

        if text.trim().is_empty() {
            tracing::warn!("Ignoring bot message without text");
            self.finish_turn();
            return None;
        }

        let delivered = match self.coalesce_target() {
            Some(index) => {
                let message = &mut self.messages[index];
                message.merge(text);
                if !quick_replies.is_empty() {
                    message.quick_replies = quick_replies;
                }
                tracing::debug!(id = %message.id, "Coalesced bot message");
                message.clone()
            }
            None => {
                let mut message = Message::bot(text);
                message.quick_replies = quick_replies;
                self.messages.push(message.clone());
                message
            }
        };

        self.finish_turn();
        Some(delivered)
    }

    /// Record a delivery failure as an error message
    ///
    /// Empty text falls back to [`DEFAULT_ERROR_TEXT`].
    pub fn handle_error(&mut self, text: &str) -> Message {
        self.settle_streaming();
        if let Some((id, _)) = self.latest_pending() {
            self.pending_timestamps.remove(&id);
        }

        let text = if text.trim().is_empty() {
            DEFAULT_ERROR_TEXT
        } else {
            text
        };
        tracing::warn!(error = %text, "Conversation error");

        let message = Message::error(text);
        self.messages.push(message.clone());
        self.processing_stage = ProcessingStage::None;
        self.in_flight = false;
        message
    }

    /// Set the typing indicator stage
    pub fn set_stage(&mut self, stage: ProcessingStage) {
        self.processing_stage = stage;
    }

    /// Track the transport's connection status
    ///
    /// Losing the connection mid-turn releases the turn so input comes back;
    /// the transport reports the failure itself if it is final.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.connection_status == status {
            return;
        }
        tracing::debug!(from = %self.connection_status, to = %status, "Connection status changed");
        self.connection_status = status;

        let lost = matches!(status, ConnectionStatus::Disconnected | ConnectionStatus::Error);
        if lost && self.is_busy() {
            self.settle_streaming();
            if let Some((id, _)) = self.latest_pending() {
                self.pending_timestamps.remove(&id);
            }
            self.processing_stage = ProcessingStage::None;
            self.in_flight = false;
        }
    }

    /// Apply one transport event
    ///
    /// Returns the bot message that became final, if any. Events after
    /// teardown are dropped.
    pub fn apply(&mut self, event: TransportEvent) -> Option<Message> {
        if self.torn_down {
            tracing::trace!(?event, "Dropping event after teardown");
            return None;
        }

        match event {
            TransportEvent::Chunk(text) => {
                self.handle_chunk(&text);
                None
            }
            TransportEvent::Complete { message } => self.handle_complete(message),
            TransportEvent::Error(text) => {
                self.handle_error(&text);
                None
            }
            TransportEvent::Status(status) => {
                self.set_connection_status(status);
                None
            }
            TransportEvent::Stage(stage) => {
                self.set_stage(stage);
                None
            }
            TransportEvent::BotMessage {
                text,
                quick_replies,
            } => self.handle_bot_message(&text, quick_replies),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear the history
    ///
    /// A request still in flight stays in flight; its answer starts a fresh
    /// message.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.pending_timestamps.clear();
        self.streaming_id = None;
        self.processing_stage = ProcessingStage::None;
    }

    /// Stop accepting sends and events
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.in_flight = false;
        self.streaming_id = None;
        self.pending_timestamps.clear();
        self.processing_stage = ProcessingStage::None;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Messages in display order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current connection status
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Current typing indicator stage
    #[must_use]
    pub fn processing_stage(&self) -> ProcessingStage {
        self.processing_stage
    }

    /// Id of the message receiving chunks
    #[must_use]
    pub fn streaming_id(&self) -> Option<MessageId> {
        self.streaming_id
    }

    /// A send is waiting for its answer, or a bot message is still streaming
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight || self.streaming_id.is_some()
    }

    /// Whether [`Conversation::teardown`] has run
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Whether the input field should accept text
    #[must_use]
    pub fn input_enabled(&self) -> bool {
        !self.torn_down && !self.is_busy()
    }

    /// User messages still waiting for an answer
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_timestamps.len()
    }

    /// Total latency of the most recently answered message
    #[must_use]
    pub fn last_response_time(&self) -> Option<Duration> {
        self.last_response_time
    }

    /// Project the state for the render layer
    #[must_use]
    pub fn snapshot(
        &self,
        is_open: bool,
        is_expanded: bool,
        config: &WidgetConfig,
    ) -> WidgetSnapshot {
        WidgetSnapshot {
            is_open,
            is_expanded,
            input_enabled: self.input_enabled(),
            connection_status: self.connection_status,
            processing_stage: self.processing_stage,
            messages: self.messages.clone(),
            chatbot_name: config.chatbot_name.clone(),
            avatar_url: config.avatar_url.clone(),
            show_welcome: self.messages.is_empty()
                && self.processing_stage == ProcessingStage::None,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id == id)
    }

    fn streaming_message_mut(&mut self) -> Option<&mut Message> {
        let id = self.streaming_id?;
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Finalize a streaming message that has text, drop an empty one
    fn settle_streaming(&mut self) {
        let Some(id) = self.streaming_id.take() else {
            return;
        };
        if let Some(index) = self.position_of(id) {
            if self.messages[index].text.is_empty() {
                self.messages.remove(index);
            } else {
                self.messages[index].is_streaming = false;
            }
        }
    }

    /// Most recent user message still waiting for an answer
    fn latest_pending(&self) -> Option<(MessageId, Instant)> {
        self.pending_timestamps
            .iter()
            .max_by_key(|(id, _)| **id)
            .map(|(id, sent_at)| (*id, *sent_at))
    }

    /// Index of the bot message a new arrival may merge into
    fn coalesce_target(&self) -> Option<usize> {
        let turn_start = self
            .messages
            .iter()
            .rposition(|m| m.sender == Sender::User)
            .map_or(0, |i| i + 1);

        let index = self.messages[turn_start..]
            .iter()
            .rposition(|m| m.sender == Sender::Bot && !m.is_streaming && !m.is_error)?
            + turn_start;

        (self.messages[index].age() < COALESCE_WINDOW).then_some(index)
    }

    fn finish_turn(&mut self) {
        if let Some((id, sent_at)) = self.latest_pending() {
            self.pending_timestamps.remove(&id);
            let elapsed = sent_at.elapsed();
            self.last_response_time = Some(elapsed);
            tracing::info!(
                user_message = %id,
                response_time = %format_response_time(elapsed),
                "Response complete"
            );
        }
        self.processing_stage = ProcessingStage::None;
        self.in_flight = false;
    }
}

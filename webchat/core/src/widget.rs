//! Widget Controller
//!
//! `ChatWidget` is the instance a host creates. It turns user actions into
//! conversation and transport calls, pushes a fresh [`WidgetSnapshot`] to the
//! render layer after every state change, and publishes [`HostEvent`]s.
//!
//! # Event Loop
//!
//! The widget does not spawn anything itself. The host owns the
//! `mpsc::Receiver<TransportEvent>` returned by [`ChatWidget::new`] and feeds
//! each event back through [`ChatWidget::handle_transport_event`], next to its
//! own input handling, typically in one `tokio::select!` loop.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::{ConfigError, WidgetConfig};
use crate::conversation::{Conversation, SendRejection};
use crate::events::{self, HostEvent};
use crate::messages::{OutboundMessage, WidgetSnapshot, WidgetUpdate};
use crate::transport::{
    build_transport, event_channel, ChatTransport, TransportError, TransportEvent,
};

/// Error text when a message could not be handed to the transport
pub const SEND_FAILED_TEXT: &str = "Failed to send message. Please try again.";

/// Errors that prevent a widget from being created
#[derive(Debug, Error)]
pub enum WidgetError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The configured transport could not be built
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// One embedded chat widget
pub struct ChatWidget {
    config: WidgetConfig,
    conversation: Conversation,
    transport: Box<dyn ChatTransport>,
    updates: mpsc::Sender<WidgetUpdate>,
    host_events: broadcast::Sender<HostEvent>,
    is_open: bool,
    is_expanded: bool,
}

impl ChatWidget {
    /// Create a widget with the transport its configuration selects
    ///
    /// Returns the widget and the receiving end of its transport events.
    ///
    /// # Errors
    ///
    /// Fails without creating anything when the configuration is invalid
    /// (a missing chatbot id included) or the transport cannot be built.
    pub fn new(
        config: WidgetConfig,
        updates: mpsc::Sender<WidgetUpdate>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), WidgetError> {
        config.validate()?;
        let config = config.with_resolved_identity();

        let (events_tx, events_rx) = event_channel();
        let transport = build_transport(&config, events_tx)?;

        Ok((Self::assemble(config, transport, updates), events_rx))
    }

    /// Create a widget around an existing transport
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid.
    pub fn with_transport(
        config: WidgetConfig,
        transport: Box<dyn ChatTransport>,
        updates: mpsc::Sender<WidgetUpdate>,
    ) -> Result<Self, WidgetError> {
        config.validate()?;
        Ok(Self::assemble(
            config.with_resolved_identity(),
            transport,
            updates,
        ))
    }

    fn assemble(
        config: WidgetConfig,
        transport: Box<dyn ChatTransport>,
        updates: mpsc::Sender<WidgetUpdate>,
    ) -> Self {
        tracing::info!(
            chatbot_id = %config.chatbot_id,
            transport = transport.name(),
            position = %config.position,
            "Chat widget created"
        );

        Self {
            config,
            conversation: Conversation::new(),
            transport,
            updates,
            host_events: events::channel(),
            is_open: false,
            is_expanded: false,
        }
    }

    // ========================================================================
    // Overlay
    // ========================================================================

    /// Show the chat overlay, connecting if needed
    pub async fn open(&mut self) {
        if self.conversation.is_torn_down() {
            return;
        }

        self.is_open = true;
        self.render();
        self.emit(HostEvent::WidgetOpened);

        if !self.transport.status().is_open() {
            if let Err(e) = self.transport.connect().await {
                tracing::warn!(
                    transport = self.transport.name(),
                    error = %e,
                    "Connect on open failed"
                );
            }
        }
    }

    /// Hide the chat overlay; the conversation is kept
    pub fn close(&mut self) {
        self.is_open = false;
        self.render();
        self.emit(HostEvent::WidgetClosed);
    }

    /// Open when closed, close when open
    pub async fn toggle(&mut self) {
        if self.is_open {
            self.close();
        } else {
            self.open().await;
        }
    }

    /// Switch between normal and expanded size
    pub fn toggle_expand(&mut self) {
        self.is_expanded = !self.is_expanded;
        self.render();
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send typed text
    ///
    /// Transport failures do not surface here; they become an error message
    /// in the conversation.
    ///
    /// # Errors
    ///
    /// Returns the rejection when the conversation refuses the message.
    pub async fn send_message(&mut self, text: &str) -> Result<(), SendRejection> {
        let outbound = self.conversation.begin_send(text)?;
        self.push(WidgetUpdate::ClearInput);
        self.render();
        self.dispatch(outbound).await;
        Ok(())
    }

    /// Send the quick reply at `index` on the latest message
    ///
    /// # Errors
    ///
    /// [`SendRejection::NoSuchQuickReply`] when the latest message offers no
    /// reply at that position, otherwise as [`ChatWidget::send_message`].
    pub async fn send_quick_reply(&mut self, index: usize) -> Result<(), SendRejection> {
        let reply = self
            .conversation
            .messages()
            .last()
            .and_then(|m| m.quick_replies.get(index))
            .cloned()
            .ok_or(SendRejection::NoSuchQuickReply)?;

        let outbound = self.conversation.begin_quick_reply(&reply)?;
        self.render();
        self.dispatch(outbound).await;
        Ok(())
    }

    async fn dispatch(&mut self, outbound: OutboundMessage) {
        let result = if self.transport.status().is_open() {
            self.transport.send(&outbound).await
        } else {
            match self.transport.connect().await {
                Ok(()) => self.transport.send(&outbound).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            tracing::warn!(
                transport = self.transport.name(),
                error = %e,
                "Failed to send message"
            );
            self.conversation.handle_error(SEND_FAILED_TEXT);
            self.render();
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear the message history
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.render();
    }

    /// Tear down the transport; the widget ignores everything afterwards
    pub async fn cleanup(&mut self) {
        if self.conversation.is_torn_down() {
            return;
        }
        self.conversation.teardown();
        self.transport.close().await;
        tracing::info!(chatbot_id = %self.config.chatbot_id, "Chat widget cleaned up");
    }

    /// Apply one event from the transport
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.conversation.is_torn_down() {
            return;
        }

        let finished = self.conversation.apply(event);
        self.render();
        if let Some(message) = finished {
            self.emit(HostEvent::MessageReceived { message });
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Subscribe to host events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.host_events.subscribe()
    }

    /// Current view of the widget
    #[must_use]
    pub fn snapshot(&self) -> WidgetSnapshot {
        self.conversation
            .snapshot(self.is_open, self.is_expanded, &self.config)
    }

    /// Effective configuration (identity resolved)
    #[must_use]
    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    /// The conversation behind the widget
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Overlay visible
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Overlay expanded
    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn render(&self) {
        self.push(WidgetUpdate::Render(Box::new(self.snapshot())));
    }

    fn push(&self, update: WidgetUpdate) {
        // try_send keeps a slow render layer from stalling streaming
        if let Err(e) = self.updates.try_send(update) {
            tracing::warn!(error = %e, "Failed to deliver widget update");
        }
    }

    fn emit(&self, event: HostEvent) {
        tracing::debug!(event = event.name(), "Host event");
        // No subscribers is fine
        let _ = self.host_events.send(event);
    }
}

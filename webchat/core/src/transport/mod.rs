//! Transport Layer
//!
//! Transports own the network side of one conversation and translate a
//! backend's protocol into normalized [`TransportEvent`]s.
//!
//! # Supported Transports
//!
//! - **HTTP streaming**: One POST per message, response body read as it arrives
//! - **WebSocket**: Long-lived socket with auth handshake and bounded reconnection
//!   (requires the `websocket` feature)
//!
//! # Event Flow
//!
//! Every transport is constructed with an `mpsc::Sender<TransportEvent>`.
//! Whoever owns the widget holds the receiving end and feeds each event to
//! [`crate::ChatWidget::handle_transport_event`], so all conversation
//! mutation happens on one task in arrival order.

pub mod config;
pub mod http;
#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::WidgetConfig;
use crate::messages::{ConnectionStatus, OutboundMessage, ProcessingStage, QuickReply};

pub use config::{ReconnectPolicy, StreamProfile, TransportKind};
pub use http::HttpStreamingTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Capacity of the transport event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Normalized events every transport emits
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A piece of the bot's answer, shown immediately
    Chunk(String),
    /// The answer finished; `message` is the final text when the backend supplied one
    Complete {
        /// Final text (JSON-unwrapped where the profile calls for it)
        message: Option<String>,
    },
    /// Delivery failed; the text is user-facing
    Error(String),
    /// Connection status changed
    Status(ConnectionStatus),
    /// Typing indicator stage changed
    Stage(ProcessingStage),
    /// A complete bot message arrived in one piece
    BotMessage {
        /// Message text
        text: String,
        /// Options offered with the message
        quick_replies: Vec<QuickReply>,
    },
}

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation needs an open connection
    #[error("Not connected")]
    NotConnected,

    /// Message could not be handed to the network
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Endpoint URL is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A chatbot transport
///
/// Implementations push their output into the event sender they were built
/// with. `send` never waits for the answer; the answer arrives as events.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &'static str;

    /// Open the connection
    ///
    /// Returns once the transport can accept `send`, or with an error if the
    /// first attempt failed. HTTP has nothing to open.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Hand a message to the backend
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Tear down the connection and cancel in-flight work
    async fn close(&mut self);

    /// Current connection status
    fn status(&self) -> ConnectionStatus;
}

/// Create the event channel shared by a transport and its owner
#[must_use]
pub fn event_channel() -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Build the transport selected by the configuration
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built, or if WebSocket is
/// requested without the `websocket` feature.
pub fn build_transport(
    config: &WidgetConfig,
    events: mpsc::Sender<TransportEvent>,
) -> Result<Box<dyn ChatTransport>, TransportError> {
    match config.transport {
        TransportKind::Http => Ok(Box::new(HttpStreamingTransport::from_config(
            config, events,
        )?)),
        #[cfg(feature = "websocket")]
        TransportKind::WebSocket => Ok(Box::new(WebSocketTransport::from_config(config, events))),
        #[cfg(not(feature = "websocket"))]
        TransportKind::WebSocket => Err(TransportError::ConnectionFailed(
            "built without the websocket feature".to_string(),
        )),
    }
}

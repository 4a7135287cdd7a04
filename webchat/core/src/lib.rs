//! Webchat Core - Conversation Engine for the Embeddable Chat Widget
//!
//! This crate holds everything the chat widget does that is not drawing:
//! the conversation state machine, the two chatbot transports, widget
//! configuration, and the small display helpers a render layer needs.
//! It can sit behind a browser shell, a terminal host, or run headless in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Host (render layer)                       │
//! │        WidgetUpdate (down)          user actions (up)         │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                         ChatWidget                            │
//! │  ┌────────────────┐   ┌──────┴───────┐   ┌─────────────────┐  │
//! │  │  WidgetConfig  │   │ Conversation │   │   HostEvent     │  │
//! │  │                │   │ (messages,   │   │   broadcast     │  │
//! │  │                │   │  stages)     │   │                 │  │
//! │  └────────────────┘   └──────▲───────┘   └─────────────────┘  │
//! │                              │ TransportEvent                 │
//! │              ┌───────────────┴────────────────┐               │
//! │              │         ChatTransport          │               │
//! │              │  HTTP streaming  │  WebSocket  │               │
//! │              └────────────────────────────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatWidget`]: Controller wiring user actions, transport and rendering
//! - [`Conversation`]: The message list and its reconciliation rules
//! - [`TransportEvent`]: Normalized events produced by every transport
//! - [`WidgetConfig`]: Widget options loaded from file, env and CLI
//!
//! # Quick Start
//!
//! ```ignore
//! use webchat_core::{ChatWidget, WidgetConfig};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = WidgetConfig::new("bot-123");
//!
//!     let (updates_tx, mut updates_rx) = mpsc::channel(256);
//!     let (mut widget, mut transport_rx) = ChatWidget::new(config, updates_tx).unwrap();
//!
//!     widget.open().await;
//!     widget.send_message("hello").await.unwrap();
//!
//!     loop {
//!         tokio::select! {
//!             Some(event) = transport_rx.recv() => widget.handle_transport_event(event),
//!             Some(update) = updates_rx.recv() => { /* draw */ }
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod conversation;
pub mod display;
pub mod events;
pub mod messages;
pub mod transport;
pub mod widget;

pub use config::{ConfigError, ConfigOverrides, ConfigSource, WidgetConfig, WidgetPosition};
pub use conversation::{Conversation, SendRejection};
pub use events::HostEvent;
pub use messages::{
    ConnectionStatus, Message, MessageId, OutboundMessage, ProcessingStage, QuickReply, Sender,
    WidgetSnapshot, WidgetUpdate,
};
pub use transport::{ChatTransport, TransportError, TransportEvent};
pub use widget::{ChatWidget, WidgetError};

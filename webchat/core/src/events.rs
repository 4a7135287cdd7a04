//! Host Events
//!
//! Notifications the widget publishes for the embedding page. They are
//! observable only; the widget never consumes its own events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::messages::Message;

/// Capacity of the host event channel
///
/// Slow subscribers lose the oldest events, never block the widget.
pub const HOST_EVENT_CAPACITY: usize = 64;

/// Events published to the host page
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    /// The chat overlay became visible
    WidgetOpened,
    /// The chat overlay was hidden
    WidgetClosed,
    /// A bot message was finalized
    MessageReceived {
        /// The finalized message
        message: Message,
    },
}

impl HostEvent {
    /// Event name as seen by host pages
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WidgetOpened => "chatOpened",
            Self::WidgetClosed => "chatClosed",
            Self::MessageReceived { .. } => "messageReceived",
        }
    }
}

/// Create the broadcast channel used for host events
pub(crate) fn channel() -> broadcast::Sender<HostEvent> {
    let (tx, _rx) = broadcast::channel(HOST_EVENT_CAPACITY);
    tx
}

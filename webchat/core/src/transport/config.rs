//! Transport Configuration
//!
//! Types for selecting a transport and tuning its behavior.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which transport the widget uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// POST per message with a streamed response body
    #[default]
    Http,
    /// Persistent WebSocket at `{api_url}/webchat/ws`
    WebSocket,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "websocket" | "web-socket" | "ws" => Ok(Self::WebSocket),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::WebSocket => f.write_str("websocket"),
        }
    }
}

/// How an HTTP streaming backend frames its answer
///
/// Backends disagree here. Some stream plain text, others stream a JSON
/// document whose `message` field holds the answer. The profile is chosen
/// per deployment rather than guessed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamProfile {
    /// Chunks are shown raw, then the whole body is re-parsed as `{message}`
    #[default]
    JsonEnvelope,
    /// Chunks are plain text and the concatenation is final
    RawText,
}

impl FromStr for StreamProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json-envelope" | "json" => Ok(Self::JsonEnvelope),
            "raw-text" | "raw" | "text" => Ok(Self::RawText),
            other => Err(format!("unknown stream profile '{other}'")),
        }
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonEnvelope => f.write_str("json-envelope"),
            Self::RawText => f.write_str("raw-text"),
        }
    }
}

/// Reconnection policy for the WebSocket transport
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after an abnormal close (0 = never reconnect)
    pub max_attempts: u32,
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Factor applied to the delay after each attempt
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt N (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(ms as u64)
    }
}

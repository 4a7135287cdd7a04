//! HTTP Streaming Transport
//!
//! One POST per message. The response body is read as it arrives and every
//! piece is forwarded as a [`TransportEvent::Chunk`] right away, then a single
//! `Complete` or `Error` closes the turn.
//!
//! # Request
//!
//! ```text
//! POST {api_url}
//! Content-Type: application/json
//! X-API-Key: {api_key}            (optional)
//! Accept: text/plain              (raw-text profile only)
//!
//! {"chatbotId": "...", "email": "...", "message": "..."}
//! ```
//!
//! No retries happen here. A failed turn surfaces as an error message and
//! the user can send again. One request runs at a time; a new send aborts
//! whatever the previous one left running.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::config::StreamProfile;
use super::{ChatTransport, TransportError, TransportEvent};
use crate::config::WidgetConfig;
use crate::messages::{ConnectionStatus, OutboundMessage};

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shown when the chat service cannot be reached at all
pub const CONNECTIVITY_FAILURE_TEXT: &str =
    "Unable to connect to chat service. Please check your internet connection and try again.";

/// Shown when the connection is refused for security reasons (TLS, cross-origin)
pub const SECURITY_FAILURE_TEXT: &str =
    "Unable to connect to chat service due to security restrictions.";

// ============================================================================
// Failure Classification
// ============================================================================

/// Broad class of a request failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Host unreachable, connection refused, timed out
    Connectivity,
    /// Certificate or handshake rejected
    SecurityRestriction,
    /// Anything else, including non-success statuses
    Other,
}

/// A failed request with its underlying reason
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFailure {
    /// Failure class
    pub kind: FailureKind,
    /// Underlying reason, for logs and the generic message
    pub reason: String,
}

impl RequestFailure {
    fn other(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            reason: reason.into(),
        }
    }

    /// The text shown to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind {
            FailureKind::Connectivity => CONNECTIVITY_FAILURE_TEXT.to_string(),
            FailureKind::SecurityRestriction => SECURITY_FAILURE_TEXT.to_string(),
            FailureKind::Other => {
                format!("Failed to communicate with chat service: {}", self.reason)
            }
        }
    }
}

/// Classify a client error
fn classify(err: &reqwest::Error) -> RequestFailure {
    let chain = error_chain(err).to_lowercase();
    let kind = if ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|marker| chain.contains(marker))
    {
        FailureKind::SecurityRestriction
    } else if err.is_connect() || err.is_timeout() {
        FailureKind::Connectivity
    } else {
        FailureKind::Other
    };

    RequestFailure {
        kind,
        reason: err.to_string(),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

// ============================================================================
// Body Helpers
// ============================================================================

/// Extract a non-empty `message` string from a JSON document
#[must_use]
pub fn unwrap_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Error text for a non-success status
///
/// Prefers the JSON `message` of the body, else `HTTP {status}: {reason}`.
#[must_use]
pub fn status_error_message(status: reqwest::StatusCode, body: &str) -> String {
    unwrap_message(body).unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
    })
}

/// Take the longest decodable prefix out of `buf`
///
/// A multi-byte character split across two network reads stays in `buf`
/// until the rest arrives. Invalid bytes are replaced.
fn drain_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(text) => {
            let text = text.to_string();
            buf.clear();
            text
        }
        Err(e) if e.error_len().is_some() => {
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            text
        }
        Err(e) => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            text
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// HTTP streaming chat transport
pub struct HttpStreamingTransport {
    client: reqwest::Client,
    api_url: String,
    chatbot_id: String,
    email: String,
    api_key: Option<String>,
    profile: StreamProfile,
    incremental: bool,
    events: mpsc::Sender<TransportEvent>,
    in_flight: Mutex<Option<AbortHandle>>,
    status: ConnectionStatus,
}

impl HttpStreamingTransport {
    /// Create a transport with the default timeout and profile
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        chatbot_id: impl Into<String>,
        email: impl Into<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        Self::with_timeout(api_url, chatbot_id, email, DEFAULT_REQUEST_TIMEOUT, events)
    }

    fn with_timeout(
        api_url: impl Into<String>,
        chatbot_id: impl Into<String>,
        email: impl Into<String>,
        timeout: Duration,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            chatbot_id: chatbot_id.into(),
            email: email.into(),
            api_key: None,
            profile: StreamProfile::default(),
            incremental: true,
            events,
            in_flight: Mutex::new(None),
            status: ConnectionStatus::Disconnected,
        })
    }

    /// Create from widget configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(
        config: &WidgetConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let transport = Self::with_timeout(
            config.api_url.clone(),
            config.chatbot_id.clone(),
            config.user_email.clone().unwrap_or_default(),
            config.request_timeout,
            events,
        )?
        .with_profile(config.stream_profile)
        .with_incremental(config.incremental);

        Ok(match config.api_key.clone() {
            Some(key) => transport.with_api_key(key),
            None => transport,
        })
    }

    /// Send this key as `X-API-Key`
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Select the backend stream profile
    #[must_use]
    pub fn with_profile(mut self, profile: StreamProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Read the body incrementally (default) or in one piece
    #[must_use]
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Whether a request is currently running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn build_request(&self, text: &str) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "chatbotId": self.chatbot_id,
            "email": self.email,
            "message": text,
        });

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("X-API-Key", key);
        }
        if self.profile == StreamProfile::RawText {
            request = request.header(reqwest::header::ACCEPT, "text/plain");
        }
        request
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Transport event receiver dropped");
        }
    }
}

#[async_trait]
impl ChatTransport for HttpStreamingTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.status.is_open() {
            self.status = ConnectionStatus::Connected;
            self.emit(TransportEvent::Status(ConnectionStatus::Connected))
                .await;
        }
        Ok(())
    }

    /// Start a request; a newer send supersedes the previous one
    ///
    /// The conversation admits one turn at a time, so a previous request is
    /// normally done by now even if its task has not exited yet.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let request = self.build_request(&message.text);
        let events = self.events.clone();
        let profile = self.profile;
        let incremental = self.incremental;

        tracing::debug!(url = %self.api_url, %profile, "Sending chat request");
        let handle = tokio::spawn(run_request(request, profile, incremental, events));
        if let Some(previous) = self.in_flight.lock().replace(handle.abort_handle()) {
            if !previous.is_finished() {
                tracing::debug!("Superseding previous chat request");
            }
            previous.abort();
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(handle) = self.in_flight.lock().take() {
            if !handle.is_finished() {
                tracing::debug!("Aborting in-flight chat request");
            }
            handle.abort();
        }
        if self.status != ConnectionStatus::Disconnected {
            self.status = ConnectionStatus::Disconnected;
            self.emit(TransportEvent::Status(ConnectionStatus::Disconnected))
                .await;
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }
}

/// Drive one request to its terminal event
async fn run_request(
    request: reqwest::RequestBuilder,
    profile: StreamProfile,
    incremental: bool,
    events: mpsc::Sender<TransportEvent>,
) {
    let started = Instant::now();
    let terminal = match fetch(request, profile, incremental, &events).await {
        Ok(Some(message)) => {
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                chars = message.len(),
                "Chat response complete"
            );
            TransportEvent::Complete {
                message: Some(message),
            }
        }
        // Receiver gone, nobody to tell
        Ok(None) => return,
        Err(failure) => {
            tracing::warn!(kind = ?failure.kind, reason = %failure.reason, "Chat request failed");
            TransportEvent::Error(failure.user_message())
        }
    };
    let _ = events.send(terminal).await;
}

/// Perform the request, forwarding chunks; returns the final text
async fn fetch(
    request: reqwest::RequestBuilder,
    profile: StreamProfile,
    incremental: bool,
    events: &mpsc::Sender<TransportEvent>,
) -> Result<Option<String>, RequestFailure> {
    let response = request.send().await.map_err(|e| classify(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RequestFailure::other(status_error_message(status, &body)));
    }

    if !incremental {
        let body = response.text().await.map_err(|e| classify(&e))?;
        return Ok(Some(unwrap_message(&body).unwrap_or(body)));
    }

    let mut stream = response.bytes_stream();
    let mut pending = Vec::new();
    let mut accumulated = String::new();

    while let Some(piece) = stream.next().await {
        let bytes = piece.map_err(|e| classify(&e))?;
        pending.extend_from_slice(&bytes);

        let text = drain_utf8(&mut pending);
        if text.is_empty() {
            continue;
        }
        accumulated.push_str(&text);
        if events.send(TransportEvent::Chunk(text)).await.is_err() {
            return Ok(None);
        }
    }

    if !pending.is_empty() {
        let tail = String::from_utf8_lossy(&pending).into_owned();
        accumulated.push_str(&tail);
        if events.send(TransportEvent::Chunk(tail)).await.is_err() {
            return Ok(None);
        }
    }

    let message = match profile {
        StreamProfile::JsonEnvelope => unwrap_message(&accumulated).unwrap_or(accumulated),
        StreamProfile::RawText => accumulated,
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unwrap_message() {
        assert_eq!(
            unwrap_message(r#"{"message":"Hello there"}"#),
            Some("Hello there".to_string())
        );
        assert_eq!(unwrap_message(r#"{"message":""}"#), None);
        assert_eq!(unwrap_message(r#"{"text":"nope"}"#), None);
        assert_eq!(unwrap_message("plain text"), None);
    }

    #[test]
    fn test_status_error_message() {
        assert_eq!(
            status_error_message(
                reqwest::StatusCode::BAD_REQUEST,
                r#"{"message":"chatbotId is invalid"}"#
            ),
            "chatbotId is invalid"
        );
        assert_eq!(
            status_error_message(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            "HTTP 500: Internal Server Error"
        );
    }

    #[test]
    fn test_user_messages() {
        let failure = RequestFailure {
            kind: FailureKind::Connectivity,
            reason: "connection refused".to_string(),
        };
        assert_eq!(failure.user_message(), CONNECTIVITY_FAILURE_TEXT);

        let failure = RequestFailure {
            kind: FailureKind::SecurityRestriction,
            reason: "invalid certificate".to_string(),
        };
        assert_eq!(failure.user_message(), SECURITY_FAILURE_TEXT);

        let failure = RequestFailure::other("HTTP 502: Bad Gateway");
        assert_eq!(
            failure.user_message(),
            "Failed to communicate with chat service: HTTP 502: Bad Gateway"
        );
    }

    #[test]
    fn test_drain_utf8_holds_split_characters() {
        // "é" is 0xC3 0xA9
        let mut buf = vec![b'c', b'a', b'f', 0xC3];
        assert_eq!(drain_utf8(&mut buf), "caf");
        assert_eq!(buf, vec![0xC3]);

        buf.push(0xA9);
        assert_eq!(drain_utf8(&mut buf), "é");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut buf = vec![b'a', 0xFF, b'b'];
        assert_eq!(drain_utf8(&mut buf), "a\u{FFFD}b");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_connectivity_message() {
        // Reserve a port, then free it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = crate::transport::event_channel();
        let transport =
            HttpStreamingTransport::new(format!("http://{addr}/chat"), "bot", "a@b.c", tx).unwrap();

        transport
            .send(&OutboundMessage {
                text: "hello".to_string(),
                quick_reply_value: None,
            })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Error(CONNECTIVITY_FAILURE_TEXT.to_string()))
        );
    }

    #[tokio::test]
    async fn test_connect_and_close_report_status() {
        let (tx, mut rx) = crate::transport::event_channel();
        let mut transport =
            HttpStreamingTransport::new("http://127.0.0.1:9/chat", "bot", "a@b.c", tx).unwrap();

        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        transport.connect().await.unwrap();
        assert_eq!(transport.status(), ConnectionStatus::Connected);
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Status(ConnectionStatus::Connected))
        );

        transport.close().await;
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Status(ConnectionStatus::Disconnected))
        );
    }
}

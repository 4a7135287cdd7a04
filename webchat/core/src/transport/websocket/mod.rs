//! WebSocket Transport
//!
//! A persistent socket to `{api_url}/webchat/ws` (scheme swapped to `ws`).
//!
//! # Connection Lifecycle
//!
//! ```text
//! disconnected → connecting → connected → authenticated
//!       ▲             │            │              │
//!       │             ▼            ▼              ▼
//!       └──── backoff ◄──── abnormal close ◄──────┘
//! ```
//!
//! On open the client sends `{type:"auth", email, chatbotId}` and reports
//! `connected`; `authenticated` follows only when the server says
//! `auth_success`. An abnormal close (anything but code 1000) schedules a
//! reconnect after `1s, 2s, 4s, ...`, at most [`ReconnectPolicy::max_attempts`]
//! times in a row. A successful open resets the count. A local close sends
//! code 1000 and never reconnects.

pub mod protocol;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::config::ReconnectPolicy;
use super::{ChatTransport, TransportError, TransportEvent};
use crate::config::{WidgetConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::display::websocket_url;
use crate::messages::{ConnectionStatus, OutboundMessage};

/// Error text once reconnection gives up
pub const RECONNECT_EXHAUSTED_TEXT: &str = "Connection lost. Please try again later.";

/// How long `close` waits for the socket task to say goodbye
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the transport handle and its socket task
pub(crate) struct Shared {
    status: watch::Sender<ConnectionStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            status,
            outbound: Mutex::new(None),
            shutdown,
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Record a status and emit it if it changed
    async fn report(&self, events: &mpsc::Sender<TransportEvent>, status: ConnectionStatus) {
        if self.status.send_replace(status) != status {
            let _ = events.send(TransportEvent::Status(status)).await;
        }
    }
}

// ============================================================================
// Reconnect Supervisor
// ============================================================================

/// How a single socket session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Local close, or the server closed with code 1000
    Closed,
    /// Connection failed or dropped abnormally
    Dropped {
        /// The socket had opened before it dropped
        opened: bool,
    },
}

/// Why the supervisor stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SupervisorExit {
    /// Closed normally, no reconnect wanted
    Closed,
    /// Gave up after this many consecutive reconnect attempts
    Exhausted {
        /// Attempts made since the last successful open
        attempts: u32,
    },
}

/// Run sessions until a normal close or until the retry budget is spent
pub(crate) async fn supervise<F, Fut>(
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
    mut session: F,
) -> SupervisorExit
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionEnd>,
{
    let mut shutdown = shared.shutdown.subscribe();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow_and_update() {
            shared.report(&events, ConnectionStatus::Disconnected).await;
            return SupervisorExit::Closed;
        }

        shared.report(&events, ConnectionStatus::Connecting).await;
        match session().await {
            SessionEnd::Closed => {
                shared.report(&events, ConnectionStatus::Disconnected).await;
                return SupervisorExit::Closed;
            }
            SessionEnd::Dropped { opened: true } => {
                attempt = 0;
                shared.report(&events, ConnectionStatus::Disconnected).await;
            }
            // A failed connect already reported the error
            SessionEnd::Dropped { opened: false } => {}
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(attempts = attempt, "WebSocket reconnect attempts exhausted");
            shared.report(&events, ConnectionStatus::Error).await;
            let _ = events
                .send(TransportEvent::Error(RECONNECT_EXHAUSTED_TEXT.to_string()))
                .await;
            return SupervisorExit::Exhausted { attempts: attempt };
        }

        // Exponential backoff between reconnect attempts
        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        tracing::info!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting WebSocket after backoff"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                shared.report(&events, ConnectionStatus::Disconnected).await;
                return SupervisorExit::Closed;
            }
        }
    }
}

// ============================================================================
// Socket Session
// ============================================================================

/// Connect once and pump frames until the socket ends
async fn run_session(
    url: String,
    auth: String,
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
) -> SessionEnd {
    let mut shutdown = shared.shutdown.subscribe();
    if *shutdown.borrow_and_update() {
        return SessionEnd::Closed;
    }

    let socket = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((socket, _response)) => socket,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "WebSocket connection failed");
                shared.report(&events, ConnectionStatus::Error).await;
                return SessionEnd::Dropped { opened: false };
            }
        },
        _ = shutdown.changed() => return SessionEnd::Closed,
    };

    tracing::info!(url = %url, "WebSocket connected");
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(outbound_tx);
    shared.report(&events, ConnectionStatus::Connected).await;

    let end = if let Err(e) = sink.send(WsMessage::Text(auth)).await {
        tracing::warn!(error = %e, "Failed to send WebSocket auth frame");
        SessionEnd::Dropped { opened: true }
    } else {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Client disconnect".into(),
                    };
                    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "WebSocket close frame not delivered");
                    }
                    break SessionEnd::Closed;
                }
                Some(message) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        tracing::warn!(error = %e, "WebSocket write failed");
                        break SessionEnd::Dropped { opened: true };
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !dispatch_frame(&text, &shared, &events).await {
                            break SessionEnd::Closed;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        tracing::info!(?code, "WebSocket closed by server");
                        break if code == Some(CloseCode::Normal) {
                            SessionEnd::Closed
                        } else {
                            SessionEnd::Dropped { opened: true }
                        };
                    }
                    // Ping/pong are answered by the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        break SessionEnd::Dropped { opened: true };
                    }
                    None => break SessionEnd::Dropped { opened: true },
                },
            }
        }
    };

    *shared.outbound.lock() = None;
    end
}

/// Forward one text frame; returns false once nobody is listening
async fn dispatch_frame(
    text: &str,
    shared: &Shared,
    events: &mpsc::Sender<TransportEvent>,
) -> bool {
    for event in protocol::parse_frame(text) {
        if let TransportEvent::Status(status) = event {
            shared.report(events, status).await;
            continue;
        }
        if events.send(event).await.is_err() {
            tracing::debug!("Transport event receiver dropped, closing socket");
            return false;
        }
    }
    true
}

// ============================================================================
// Transport
// ============================================================================

/// WebSocket chat transport
pub struct WebSocketTransport {
    url: String,
    email: String,
    chatbot_id: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<Shared>,
    supervisor: Option<JoinHandle<SupervisorExit>>,
}

impl WebSocketTransport {
    /// Create a transport for an explicit `ws://` or `wss://` URL
    pub fn new(
        url: impl Into<String>,
        email: impl Into<String>,
        chatbot_id: impl Into<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            email: email.into(),
            chatbot_id: chatbot_id.into(),
            policy: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            events,
            shared: Arc::new(Shared::new()),
            supervisor: None,
        }
    }

    /// Create from widget configuration, deriving the URL from `api_url`
    pub fn from_config(config: &WidgetConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self::new(
            websocket_url(&config.api_url),
            config.user_email.clone().unwrap_or_default(),
            config.chatbot_id.clone(),
            events,
        )
        .with_reconnect_policy(config.reconnect.clone())
        .with_connect_timeout(config.connect_timeout)
    }

    /// Override the reconnect policy
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override how long `connect` waits for the socket to open
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Endpoint this transport connects to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue a raw text frame; false when the socket is not open
    pub fn send_text(&self, text: String) -> bool {
        if !self.shared.status().is_open() {
            return false;
        }
        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(WsMessage::Text(text)).is_ok(),
            None => false,
        }
    }

    fn supervisor_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn spawn_supervisor(&mut self) {
        let url = self.url.clone();
        let auth = protocol::auth_frame(&self.email, &self.chatbot_id);
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();

        let session = move || {
            run_session(url.clone(), auth.clone(), Arc::clone(&shared), events.clone())
        };

        self.shared.shutdown.send_replace(false);
        self.supervisor = Some(tokio::spawn(supervise(
            self.policy.clone(),
            Arc::clone(&self.shared),
            self.events.clone(),
            session,
        )));
    }

    async fn wait_until_open(&self) -> Result<(), TransportError> {
        let mut status = self.shared.status.subscribe();
        let outcome = tokio::time::timeout(
            self.connect_timeout,
            status.wait_for(|s| s.is_open() || *s == ConnectionStatus::Error),
        )
        .await;

        let opened = match outcome {
            Ok(Ok(current)) => current.is_open(),
            Ok(Err(_)) => false,
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "timed out connecting to {}",
                    self.url
                )))
            }
        };

        if opened {
            Ok(())
        } else {
            Err(TransportError::ConnectionFailed(format!(
                "could not connect to {}",
                self.url
            )))
        }
    }
}

#[async_trait]
impl ChatTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.supervisor_running() {
            tracing::info!(url = %self.url, "Opening WebSocket");
            self.shared
                .report(&self.events, ConnectionStatus::Connecting)
                .await;
            self.spawn_supervisor();
        }
        self.wait_until_open().await
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.send_text(protocol::chat_frame(message)) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn close(&mut self) {
        self.shared.shutdown.send_replace(true);

        if let Some(handle) = self.supervisor.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                tracing::warn!("WebSocket task did not stop in time, aborting");
                abort.abort();
            }
        }

        *self.shared.outbound.lock() = None;
        self.shared
            .report(&self.events, ConnectionStatus::Disconnected)
            .await;
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

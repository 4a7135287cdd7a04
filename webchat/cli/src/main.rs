//! Webchat CLI - Terminal Host for the Chat Widget
//!
//! Embeds a [`ChatWidget`] the way a web page would, with the terminal as the
//! render layer. Type a line to send it; commands start with `/`.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local HTTP streaming backend
//! webchat-cli --chatbot-id bot-123
//!
//! # WebSocket backend with a raw-text profile
//! webchat-cli --chatbot-id bot-123 --api-url https://chat.example.com --transport websocket
//!
//! # With config file
//! webchat-cli --config ~/.config/webchat/widget.toml
//!
//! # Verbose logging
//! RUST_LOG=webchat_core=debug webchat-cli --chatbot-id bot-123
//! ```

mod commands;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webchat_core::config::{default_config_path, load_config_from_path};
use webchat_core::display::format_response_time;
use webchat_core::transport::{StreamProfile, TransportKind};
use webchat_core::{ChatWidget, ConfigOverrides, HostEvent, SendRejection};

use commands::{Command, HELP};
use render::Renderer;

/// Capacity of the render update channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Webchat CLI - chat with a widget backend from the terminal
#[derive(Parser, Debug)]
#[command(name = "webchat-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chatbot endpoint (HTTP POST target, WebSocket base)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Chatbot identifier
    #[arg(short = 'b', long, value_name = "ID")]
    chatbot_id: Option<String>,

    /// User identity (anonymous when omitted)
    #[arg(short = 'e', long, value_name = "EMAIL")]
    email: Option<String>,

    /// Transport: http or websocket
    #[arg(short = 't', long, value_name = "KIND")]
    transport: Option<TransportKind>,

    /// HTTP stream profile: json-envelope or raw-text
    #[arg(short = 'p', long, value_name = "PROFILE")]
    profile: Option<StreamProfile>,

    /// Key sent as X-API-Key
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "WEBCHAT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "WEBCHAT_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command-line values that override file and environment settings
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            chatbot_id: self.chatbot_id.clone(),
            user_email: self.email.clone(),
            chatbot_name: None,
            transport: self.transport,
            stream_profile: self.profile,
            api_key: self.api_key.clone(),
        }
    }
}

/// Initialize logging to stderr so it does not mix with the conversation
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("webchat_cli={level},webchat_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn print(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        warn!(error = %e, "Failed to write to stdout");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Webchat CLI starting");

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load widget configuration")?;
    args.overrides().apply(&mut config);
    info!(source = %config.source(), api_url = %config.api_url, "Configuration loaded");

    let (updates_tx, mut updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let (mut widget, mut transport_rx) =
        ChatWidget::new(config, updates_tx).context("Failed to create chat widget")?;
    let mut host_events = widget.subscribe();

    let mut renderer = Renderer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_latency: Option<Duration> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    widget.open().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run_command(&mut widget, command).await,
                    Err(message) => print(&format!("{message}\n")),
                }
            }
            Some(event) = transport_rx.recv() => {
                widget.handle_transport_event(event);
                let latency = widget.conversation().last_response_time();
                if latency != last_latency {
                    last_latency = latency;
                    if let Some(elapsed) = latency {
                        print(&format!("    (answered in {})\n", format_response_time(elapsed)));
                    }
                }
            }
            Some(update) = updates_rx.recv() => {
                print(&renderer.apply(&update));
            }
            Ok(event) = host_events.recv() => {
                debug!(event = event.name(), "Host event");
                if let HostEvent::MessageReceived { message } = event {
                    debug!(id = %message.id, chars = message.text.len(), "Bot message received");
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    widget.cleanup().await;
    info!("Webchat CLI stopped");
    Ok(())
}

async fn run_command(widget: &mut ChatWidget, command: Command) {
    let rejected = match command {
        Command::Send(text) => widget.send_message(&text).await.err(),
        Command::Reply(index) => widget.send_quick_reply(index).await.err(),
        Command::Open => {
            widget.open().await;
            None
        }
        Command::Close => {
            widget.close();
            None
        }
        Command::Expand => {
            widget.toggle_expand();
            None
        }
        Command::Reset => {
            widget.reset();
            None
        }
        Command::Help => {
            print(&format!("{HELP}\n"));
            None
        }
        Command::Quit | Command::Nothing => None,
    };

    match rejected {
        Some(SendRejection::Busy) => print("(still waiting for the last answer)\n"),
        Some(rejection) => print(&format!("({rejection})\n")),
        None => {}
    }
}

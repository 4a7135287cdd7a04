//! Widget Configuration
//!
//! Loads the options a host passes when it embeds the widget, with an optional
//! TOML file at `~/.config/webchat/widget.toml` for terminal hosts.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`WEBCHAT_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [widget]
//! api_url = "https://chat.example.com/api/chatbot/stream"
//! chatbot_id = "bot-123"
//! chatbot_name = "Support"
//! position = "bottom-left"
//!
//! [transport]
//! kind = "websocket"
//! stream_profile = "raw-text"
//! request_timeout_secs = 60
//!
//! [reconnect]
//! max_attempts = 5
//! initial_delay_ms = 1000
//! multiplier = 2.0
//! ```
//!
//! A missing `chatbot_id` is fatal: [`WidgetConfig::validate`] fails and no
//! widget is created.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::anonymous_email;
use crate::transport::config::{ReconnectPolicy, StreamProfile, TransportKind};
use crate::transport::http::DEFAULT_REQUEST_TIMEOUT;

/// Default chatbot endpoint
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/chatbot/stream";

/// Default bot display name
pub const DEFAULT_CHATBOT_NAME: &str = "GeniStudio Support";

/// Default time to wait for a WebSocket to open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The chatbot identifier is required
    #[error("chatbotId is required")]
    MissingChatbotId,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Widget Placement
// =============================================================================

/// Corner the chat button is anchored to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetPosition {
    /// Bottom right corner
    #[default]
    BottomRight,
    /// Bottom left corner
    BottomLeft,
    /// Top right corner
    TopRight,
    /// Top left corner
    TopLeft,
}

impl FromStr for WidgetPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bottom-right" => Ok(Self::BottomRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "top-right" => Ok(Self::TopRight),
            "top-left" => Ok(Self::TopLeft),
            other => Err(format!("unknown position '{other}'")),
        }
    }
}

impl fmt::Display for WidgetPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BottomRight => "bottom-right",
            Self::BottomLeft => "bottom-left",
            Self::TopRight => "top-right",
            Self::TopLeft => "top-left",
        };
        f.write_str(label)
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Widget section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetToml {
    /// Chatbot endpoint
    pub api_url: Option<String>,
    /// Chatbot identifier
    pub chatbot_id: Option<String>,
    /// User identity
    pub user_email: Option<String>,
    /// Bot display name
    pub chatbot_name: Option<String>,
    /// Button color
    pub button_color: Option<String>,
    /// Button corner
    pub position: Option<String>,
    /// Bot avatar image
    pub avatar_url: Option<String>,
    /// Inject the stylesheet
    pub inject_css: Option<bool>,
    /// Isolate in a shadow root
    pub use_shadow_dom: Option<bool>,
}

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// `http` or `websocket`
    pub kind: Option<String>,
    /// `json-envelope` or `raw-text`
    pub stream_profile: Option<String>,
    /// Read the HTTP body incrementally
    pub incremental: Option<bool>,
    /// Key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// WebSocket open timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Reconnect section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectToml {
    /// Consecutive reconnect attempts
    pub max_attempts: Option<u32>,
    /// First reconnect delay in milliseconds
    pub initial_delay_ms: Option<u64>,
    /// Delay growth factor
    pub multiplier: Option<f64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebchatToml {
    /// Widget section
    pub widget: WidgetToml,
    /// Transport section
    pub transport: TransportToml,
    /// Reconnect section
    pub reconnect: ReconnectToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Options for one widget instance
#[derive(Clone, Debug)]
pub struct WidgetConfig {
    /// Chatbot endpoint (HTTP POST target, WebSocket base)
    pub api_url: String,
    /// Chatbot identifier, required
    pub chatbot_id: String,
    /// User identity; an anonymous one is generated when absent
    pub user_email: Option<String>,
    /// Bot display name
    pub chatbot_name: String,
    /// Button color
    pub button_color: Option<String>,
    /// Button corner
    pub position: WidgetPosition,
    /// Bot avatar image
    pub avatar_url: Option<String>,
    /// Inject the stylesheet into the host page
    pub inject_css: bool,
    /// Isolate the widget in a shadow root
    pub use_shadow_dom: bool,
    /// Which transport to use
    pub transport: TransportKind,
    /// HTTP stream framing
    pub stream_profile: StreamProfile,
    /// Read the HTTP body incrementally
    pub incremental: bool,
    /// Key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// WebSocket open timeout
    pub connect_timeout: Duration,
    /// WebSocket reconnect policy
    pub reconnect: ReconnectPolicy,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            chatbot_id: String::new(),
            user_email: None,
            chatbot_name: DEFAULT_CHATBOT_NAME.to_string(),
            button_color: None,
            position: WidgetPosition::default(),
            avatar_url: None,
            inject_css: false,
            use_shadow_dom: false,
            transport: TransportKind::default(),
            stream_profile: StreamProfile::default(),
            incremental: true,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl WidgetConfig {
    /// Create a configuration for a chatbot, all else default
    #[must_use]
    pub fn new(chatbot_id: impl Into<String>) -> Self {
        Self {
            chatbot_id: chatbot_id.into(),
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check the configuration can drive a widget
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingChatbotId`] when the chatbot id is blank,
    /// [`ConfigError::ValidationError`] for an unusable endpoint or policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chatbot_id.trim().is_empty() {
            return Err(ConfigError::MissingChatbotId);
        }

        let url = reqwest::Url::parse(&self.api_url).map_err(|e| {
            ConfigError::ValidationError(format!("api_url '{}': {e}", self.api_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "api_url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "reconnect multiplier must be at least 1.0, got {}",
                self.reconnect.multiplier
            )));
        }

        Ok(())
    }

    /// Fill in an anonymous identity when no email was configured
    #[must_use]
    pub fn with_resolved_identity(mut self) -> Self {
        let missing = self
            .user_email
            .as_deref()
            .map_or(true, |email| email.trim().is_empty());
        if missing {
            self.user_email = Some(anonymous_email());
        }
        self
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/webchat/widget.toml` or
/// `~/.config/webchat/widget.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("webchat").join("widget.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<WidgetConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or holds an unknown position, transport or profile name.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<WidgetConfig, ConfigError> {
    let mut config = WidgetConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: WebchatToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

fn parse_setting<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{name}: {e}")))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut WidgetConfig, toml: &WebchatToml) -> Result<(), ConfigError> {
    // Widget settings
    let widget = &toml.widget;
    if let Some(ref url) = widget.api_url {
        config.api_url = url.clone();
    }
    if let Some(ref id) = widget.chatbot_id {
        config.chatbot_id = id.clone();
    }
    if widget.user_email.is_some() {
        config.user_email = widget.user_email.clone();
    }
    if let Some(ref name) = widget.chatbot_name {
        config.chatbot_name = name.clone();
    }
    if widget.button_color.is_some() {
        config.button_color = widget.button_color.clone();
    }
    if let Some(ref position) = widget.position {
        config.position = parse_setting("widget.position", position)?;
    }
    if widget.avatar_url.is_some() {
        config.avatar_url = widget.avatar_url.clone();
    }
    if let Some(inject) = widget.inject_css {
        config.inject_css = inject;
    }
    if let Some(shadow) = widget.use_shadow_dom {
        config.use_shadow_dom = shadow;
    }

    // Transport settings
    let transport = &toml.transport;
    if let Some(ref kind) = transport.kind {
        config.transport = parse_setting("transport.kind", kind)?;
    }
    if let Some(ref profile) = transport.stream_profile {
        config.stream_profile = parse_setting("transport.stream_profile", profile)?;
    }
    if let Some(incremental) = transport.incremental {
        config.incremental = incremental;
    }
    if transport.api_key.is_some() {
        config.api_key = transport.api_key.clone();
    }
    if let Some(secs) = transport.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = transport.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }

    // Reconnect settings
    let reconnect = &toml.reconnect;
    if let Some(attempts) = reconnect.max_attempts {
        config.reconnect.max_attempts = attempts;
    }
    if let Some(ms) = reconnect.initial_delay_ms {
        config.reconnect.initial_delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = reconnect.multiplier {
        config.reconnect.multiplier = multiplier;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut WidgetConfig) {
    if let Ok(url) = std::env::var("WEBCHAT_API_URL") {
        config.api_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(id) = std::env::var("WEBCHAT_CHATBOT_ID") {
        config.chatbot_id = id;
        config.source = ConfigSource::Env;
    }
    if let Ok(email) = std::env::var("WEBCHAT_USER_EMAIL") {
        config.user_email = Some(email);
        config.source = ConfigSource::Env;
    }
    if let Ok(name) = std::env::var("WEBCHAT_CHATBOT_NAME") {
        config.chatbot_name = name;
        config.source = ConfigSource::Env;
    }
    if let Ok(kind) = std::env::var("WEBCHAT_TRANSPORT") {
        match kind.parse() {
            Ok(kind) => {
                config.transport = kind;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring WEBCHAT_TRANSPORT"),
        }
    }
    if let Ok(profile) = std::env::var("WEBCHAT_STREAM_PROFILE") {
        match profile.parse() {
            Ok(profile) => {
                config.stream_profile = profile;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring WEBCHAT_STREAM_PROFILE"),
        }
    }
    if let Ok(key) = std::env::var("WEBCHAT_API_KEY") {
        config.api_key = Some(key);
        config.source = ConfigSource::Env;
    }
    if let Ok(attempts) = std::env::var("WEBCHAT_RECONNECT_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.reconnect.max_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub api_url: Option<String>,
    /// Chatbot id override
    pub chatbot_id: Option<String>,
    /// User identity override
    pub user_email: Option<String>,
    /// Bot display name override
    pub chatbot_name: Option<String>,
    /// Transport override
    pub transport: Option<TransportKind>,
    /// Stream profile override
    pub stream_profile: Option<StreamProfile>,
    /// API key override
    pub api_key: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Set chatbot id override
    #[must_use]
    pub fn with_chatbot_id(mut self, id: String) -> Self {
        self.chatbot_id = Some(id);
        self
    }

    /// Set user identity override
    #[must_use]
    pub fn with_user_email(mut self, email: String) -> Self {
        self.user_email = Some(email);
        self
    }

    /// Set bot display name override
    #[must_use]
    pub fn with_chatbot_name(mut self, name: String) -> Self {
        self.chatbot_name = Some(name);
        self
    }

    /// Set transport override
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set stream profile override
    #[must_use]
    pub fn with_stream_profile(mut self, profile: StreamProfile) -> Self {
        self.stream_profile = Some(profile);
        self
    }

    /// Set API key override
    #[must_use]
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut WidgetConfig) {
        if self.api_url.is_some()
            || self.chatbot_id.is_some()
            || self.user_email.is_some()
            || self.chatbot_name.is_some()
            || self.transport.is_some()
            || self.stream_profile.is_some()
            || self.api_key.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(ref id) = self.chatbot_id {
            config.chatbot_id = id.clone();
        }
        if self.user_email.is_some() {
            config.user_email = self.user_email.clone();
        }
        if let Some(ref name) = self.chatbot_name {
            config.chatbot_name = name.clone();
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(profile) = self.stream_profile {
            config.stream_profile = profile;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

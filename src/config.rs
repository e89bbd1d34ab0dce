//! Realtime configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). The socket base URL is the switch
//! between a local backend and a deployed one; nothing else changes.

use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::connection::reconnect::{
    DEFAULT_MAX_RECONNECT_DELAY, DEFAULT_RECONNECT_DELAY, ReconnectPolicy, ReconnectStrategy,
};
use crate::error::RealtimeError;
use crate::telemetry::LogFormat;

/// Which transport implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// In-process simulation, no network.
    Stub,
    /// STOMP over WebSocket against the real broker.
    Live,
}

impl std::str::FromStr for TransportKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stub" | "mock" => Ok(Self::Stub),
            "live" | "stomp" => Ok(Self::Live),
            other => Err(RealtimeError::Config(format!("unknown transport {other:?}"))),
        }
    }
}

/// Top-level realtime configuration.
///
/// Loaded once at startup via [`RealtimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Transport selected at construction time.
    pub transport: TransportKind,

    /// Socket base URL (e.g. `ws://localhost:8080`).
    pub ws_base_url: String,

    /// Handshake endpoint path appended to the base URL.
    pub ws_endpoint: String,

    /// REST collaborator base URL (e.g. `http://localhost:8080`).
    pub api_base_url: String,

    /// Bearer token forwarded to the broker and the REST collaborator.
    pub auth_token: Option<String>,

    /// Reconnect delay schedule after involuntary disconnects.
    pub reconnect: ReconnectPolicy,

    /// Bound on the live transport's handshake.
    pub connect_timeout: Duration,

    /// Bound on a single `send`.
    pub send_timeout: Duration,

    /// Simulated latency of the stub transport.
    pub stub_latency: Duration,

    /// Whether the stub transport answers each sent message with a bot reply.
    pub stub_scripted_replies: bool,

    /// Age after which a cached entity is stale.
    pub cache_ttl: Duration,

    /// Capacity of each room session's event channel.
    pub session_event_capacity: usize,

    /// Log output format for [`crate::telemetry::init_tracing`].
    pub log_format: LogFormat,
}

impl RealtimeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file, then
    /// delegates to [`RealtimeConfig::from_lookup`].
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Config`] if a URL or an enumerated value is
    /// set but invalid.
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Numeric values that are missing or unparseable fall back to their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Config`] if a URL or an enumerated value is
    /// set but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RealtimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = match lookup("CHAT_TRANSPORT") {
            Some(raw) => raw.parse()?,
            None => TransportKind::Stub,
        };

        let ws_base_url = lookup("CHAT_WS_BASE_URL")
            .unwrap_or_else(|| "ws://localhost:8080".to_string());
        let ws_endpoint = lookup("CHAT_WS_ENDPOINT")
            .unwrap_or_else(|| "/ws-chat/websocket".to_string());
        let api_base_url = lookup("CHAT_API_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8080".to_string());
        let auth_token = lookup("CHAT_AUTH_TOKEN").filter(|t| !t.trim().is_empty());

        let strategy = match lookup("CHAT_RECONNECT_STRATEGY") {
            Some(raw) => raw.parse()?,
            None => ReconnectStrategy::Fixed,
        };
        let base_delay = parse_millis(&lookup, "CHAT_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY);
        let max_delay = parse_millis(
            &lookup,
            "CHAT_RECONNECT_MAX_DELAY_MS",
            DEFAULT_MAX_RECONNECT_DELAY,
        );
        let max_attempts: u32 = parse_value(&lookup, "CHAT_RECONNECT_MAX_ATTEMPTS", 0);
        let mut reconnect = match strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::fixed(base_delay),
            ReconnectStrategy::Exponential => {
                ReconnectPolicy::exponential(base_delay, max_delay.max(base_delay))
            }
        };
        if max_attempts > 0 {
            reconnect = reconnect.with_max_attempts(max_attempts);
        }

        let log_format = match lookup("CHAT_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::Text,
        };

        let config = Self {
            transport,
            ws_base_url,
            ws_endpoint,
            api_base_url,
            auth_token,
            reconnect,
            connect_timeout: parse_millis(
                &lookup,
                "CHAT_CONNECT_TIMEOUT_MS",
                Duration::from_secs(10),
            ),
            send_timeout: parse_millis(&lookup, "CHAT_SEND_TIMEOUT_MS", Duration::from_secs(10)),
            stub_latency: parse_millis(&lookup, "CHAT_STUB_LATENCY_MS", Duration::from_millis(350)),
            stub_scripted_replies: parse_bool(&lookup, "CHAT_STUB_SCRIPTED_REPLIES", true),
            cache_ttl: Duration::from_secs(parse_value(&lookup, "CHAT_CACHE_TTL_SECS", 300)),
            session_event_capacity: parse_value(&lookup, "CHAT_SESSION_EVENT_CAPACITY", 256),
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Full handshake URL: base URL joined with the endpoint path.
    #[must_use]
    pub fn socket_url(&self) -> String {
        join_url(&self.ws_base_url, &self.ws_endpoint)
    }

    fn validate(&self) -> Result<(), RealtimeError> {
        let socket_url = self.socket_url();
        let uri: Uri = socket_url
            .parse()
            .map_err(|e| RealtimeError::Config(format!("invalid socket url {socket_url:?}: {e}")))?;
        match uri.scheme_str() {
            Some("ws" | "wss") => {}
            other => {
                return Err(RealtimeError::Config(format!(
                    "socket url must use ws or wss, got {other:?}"
                )));
            }
        }
        let api: Uri = self.api_base_url.parse().map_err(|e| {
            RealtimeError::Config(format!("invalid api url {:?}: {e}", self.api_base_url))
        })?;
        if !matches!(api.scheme_str(), Some("http" | "https")) {
            return Err(RealtimeError::Config(format!(
                "api url must use http or https: {:?}",
                self.api_base_url
            )));
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stub,
            ws_base_url: "ws://localhost:8080".to_string(),
            ws_endpoint: "/ws-chat/websocket".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            stub_latency: Duration::from_millis(350),
            stub_scripted_replies: true,
            cache_ttl: Duration::from_secs(300),
            session_event_capacity: 256,
            log_format: LogFormat::Text,
        }
    }
}

/// Joins a base URL and a path with exactly one slash between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Parses a lookup value as `T`, returning `default` on missing or invalid
/// values.
fn parse_value<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// Parses a lookup value as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

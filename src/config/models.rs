//! Configuration data structures for the reactor.
//!
//! Two families live here: the gateway-level [`ReactorConfig`] (timeouts,
//! draining, logging limits) and the per-API [`ApiDefinition`] a reactor is
//! built from. Both map directly to YAML / JSON / TOML documents and carry
//! defaults so that minimal files stay concise.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_pending_requests_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> i64 {
    30_000
}

fn default_grace_delay_ms() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_slow_call_duration_ms() -> u64 {
    2_000
}

fn default_open_state_duration_ms() -> u64 {
    10_000
}

fn default_max_failures() -> u32 {
    5
}

/// Gateway-wide settings shared by every reactor instance.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReactorConfig {
    /// Upper bound on how long a graceful stop waits for in-flight requests.
    #[serde(default = "default_pending_requests_timeout_ms")]
    pub pending_requests_timeout_ms: u64,
    #[serde(default)]
    pub request_timeout: RequestTimeoutConfig,
    /// Whether plans must validate the caller's subscription.
    #[serde(default = "default_true")]
    pub validate_subscription: bool,
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ReactorConfig {
    pub fn pending_requests_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_requests_timeout_ms)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            pending_requests_timeout_ms: default_pending_requests_timeout_ms(),
            request_timeout: RequestTimeoutConfig::default(),
            validate_subscription: true,
            tracing: TracingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Request deadline settings. A `request_timeout_ms` of zero or less means
/// requests are never timed out.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeoutConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: i64,
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,
}

impl Default for RequestTimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            grace_delay_ms: default_grace_delay_ms(),
        }
    }
}

impl RequestTimeoutConfig {
    /// Timeout disabled entirely.
    pub fn disabled() -> Self {
        Self {
            request_timeout_ms: 0,
            grace_delay_ms: default_grace_delay_ms(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.request_timeout_ms > 0
    }

    /// Remaining budget for a request that has already been running for
    /// `elapsed`, never less than the grace delay. `None` when disabled.
    pub fn deadline(&self, elapsed: Duration) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        let timeout = Duration::from_millis(self.request_timeout_ms.unsigned_abs());
        let grace = Duration::from_millis(self.grace_delay_ms);
        Some(timeout.saturating_sub(elapsed).max(grace))
    }
}

/// Global tracing switch; API level analytics settings are combined with it.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TracingSettings {
    pub enabled: bool,
}

/// Limits applied by the logging hook.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingSettings {
    /// Maximum logged payload size, e.g. `"512"` bytes or `"2KB"`.
    pub max_size: Option<String>,
    /// Comma separated content types whose payloads are never logged.
    pub excluded_response_types: Option<String>,
}

/// The kind of API a definition describes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    #[default]
    Proxy,
    Message,
}

impl ApiType {
    pub fn label(&self) -> &'static str {
        match self {
            ApiType::Proxy => "proxy",
            ApiType::Message => "message",
        }
    }
}

/// A deployed API. Immutable for the lifetime of the reactor built from it.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApiDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub environment_id: String,
    #[serde(default)]
    pub api_type: ApiType,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub deployed_at: DateTime<Utc>,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl ApiDefinition {
    pub fn failover_enabled(&self) -> bool {
        self.failover.enabled
    }

    /// True when every listener is a raw TCP listener.
    pub fn is_tcp_only(&self) -> bool {
        !self.listeners.is_empty()
            && self
                .listeners
                .iter()
                .all(|listener| matches!(listener, Listener::Tcp(_)))
    }

    pub fn http_listeners(&self) -> impl Iterator<Item = &HttpListener> {
        self.listeners.iter().filter_map(|listener| match listener {
            Listener::Http(http) => Some(http),
            _ => None,
        })
    }

    pub fn tcp_listeners(&self) -> impl Iterator<Item = &TcpListener> {
        self.listeners.iter().filter_map(|listener| match listener {
            Listener::Tcp(tcp) => Some(tcp),
            _ => None,
        })
    }
}

/// How inbound traffic reaches an API.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Listener {
    Http(HttpListener),
    Tcp(TcpListener),
    Subscription(SubscriptionListener),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HttpListener {
    pub paths: Vec<ListenerPath>,
    /// Server tags restricting which gateway servers expose the listener.
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub entrypoints: Vec<EntrypointConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ListenerPath {
    /// Explicit virtual host. When absent the host comes from the
    /// environment's access points.
    #[serde(default)]
    pub host: Option<String>,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TcpListener {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub entrypoints: Vec<EntrypointConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SubscriptionListener {
    #[serde(default)]
    pub entrypoints: Vec<EntrypointConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EntrypointConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub configuration: Option<serde_json::Value>,
}

/// Retry-across-endpoints settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailoverConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Budget for one attempt; slower attempts count as failures.
    #[serde(default = "default_slow_call_duration_ms")]
    pub slow_call_duration_ms: u64,
    #[serde(default = "default_open_state_duration_ms")]
    pub open_state_duration_ms: u64,
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_true")]
    pub per_subscription: bool,
}

impl FailoverConfig {
    pub fn slow_call_duration(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_ms)
    }

    pub fn open_state_duration(&self) -> Duration {
        Duration::from_millis(self.open_state_duration_ms)
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            slow_call_duration_ms: default_slow_call_duration_ms(),
            open_state_duration_ms: default_open_state_duration_ms(),
            max_failures: default_max_failures(),
            per_subscription: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub logging: Option<AnalyticsLoggingConfig>,
    pub tracing: Option<AnalyticsTracingConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoggingMode {
    #[default]
    None,
    Entrypoint,
    Endpoint,
    EntrypointAndEndpoint,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AnalyticsLoggingConfig {
    pub mode: LoggingMode,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AnalyticsTracingConfig {
    pub enabled: bool,
    pub verbose: bool,
}

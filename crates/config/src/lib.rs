//! Connection configuration for the hub bridge.
//!
//! [`HubOptions`] is merged twice: once at registration time over
//! [`HubOptions::defaults`], and again each time a connect intent carries
//! overrides. In both merges a field set on the overriding side wins.
//!
//! Options can also be read from TOML, e.g.
//!
//! ```toml
//! url = "wss://example.com/hub"
//! transport = "web_sockets"
//! retry_delays_ms = [0, 1000, 5000]
//! type_key = "kind"
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use eyre::WrapErr;
use serde::Deserialize;
use transport::{HttpConnectionOptions, HubProtocol, LogLevel, RetryPolicy, TransportKind};

/// Field of an inbound message that carries the bus event discriminator by default
pub const DEFAULT_TYPE_KEY: &str = "type";

pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 15_000;

pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 30_000;

/// Connection configuration record.
///
/// Every field is optional so that a record can act as a partial override.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubOptions {
    /// URL of the hub endpoint
    pub url: Option<String>,

    /// Base URL set on the connection after it is built
    pub base_url: Option<String>,

    /// Specific HTTP transport to use
    pub transport: Option<TransportKind>,

    /// Options for the HTTP connection, takes precedence over `transport`
    pub http_connection_options: Option<HttpConnectionOptions>,

    /// Retry policy implementation, takes precedence over `retry_delays_ms`
    #[serde(skip)]
    pub reconnect_policy: Option<Arc<dyn RetryPolicy>>,

    /// Retry delays, takes precedence over `automatic_reconnect`
    pub retry_delays_ms: Option<Vec<u64>>,

    /// Reconnect with the default backoff
    pub automatic_reconnect: Option<bool>,

    pub protocol: Option<HubProtocol>,

    /// Name of the inbound message field that identifies the bus event.
    /// Default: `type`
    pub type_key: Option<String>,

    pub logging: Option<LogLevel>,

    pub keep_alive_interval_ms: Option<u64>,

    pub server_timeout_ms: Option<u64>,
}

impl HubOptions {
    /// Registration defaults
    pub fn defaults() -> Self {
        Self {
            transport: Some(TransportKind::WebSockets),
            automatic_reconnect: Some(true),
            protocol: Some(HubProtocol::Json),
            type_key: Some(DEFAULT_TYPE_KEY.to_string()),
            keep_alive_interval_ms: Some(DEFAULT_KEEP_ALIVE_INTERVAL_MS),
            server_timeout_ms: Some(DEFAULT_SERVER_TIMEOUT_MS),
            ..Self::default()
        }
    }

    /// Caller options laid over [`HubOptions::defaults`]
    pub fn with_defaults(user: HubOptions) -> Self {
        Self::defaults().merged(user)
    }

    /// Field-by-field merge where every field set in `overrides` wins
    pub fn merged(self, overrides: HubOptions) -> Self {
        Self {
            url: overrides.url.or(self.url),
            base_url: overrides.base_url.or(self.base_url),
            transport: overrides.transport.or(self.transport),
            http_connection_options: overrides
                .http_connection_options
                .or(self.http_connection_options),
            reconnect_policy: overrides.reconnect_policy.or(self.reconnect_policy),
            retry_delays_ms: overrides.retry_delays_ms.or(self.retry_delays_ms),
            automatic_reconnect: overrides.automatic_reconnect.or(self.automatic_reconnect),
            protocol: overrides.protocol.or(self.protocol),
            type_key: overrides.type_key.or(self.type_key),
            logging: overrides.logging.or(self.logging),
            keep_alive_interval_ms: overrides
                .keep_alive_interval_ms
                .or(self.keep_alive_interval_ms),
            server_timeout_ms: overrides.server_timeout_ms.or(self.server_timeout_ms),
        }
    }

    /// Discriminator field name, ignoring an empty override
    pub fn type_key(&self) -> &str {
        self.type_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(DEFAULT_TYPE_KEY)
    }

    pub fn retry_delays(&self) -> Option<Vec<Duration>> {
        self.retry_delays_ms
            .as_ref()
            .map(|delays| delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Keep-alive interval; zero counts as unset
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        positive_millis(self.keep_alive_interval_ms)
    }

    /// Server timeout; zero counts as unset
    pub fn server_timeout(&self) -> Option<Duration> {
        positive_millis(self.server_timeout_ms)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_http_connection_options(mut self, options: HttpConnectionOptions) -> Self {
        self.http_connection_options = Some(options);
        self
    }

    pub fn with_reconnect_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    pub fn with_retry_delays(mut self, delays: &[Duration]) -> Self {
        self.retry_delays_ms = Some(delays.iter().map(|d| d.as_millis() as u64).collect());
        self
    }

    pub fn with_automatic_reconnect(mut self, enabled: bool) -> Self {
        self.automatic_reconnect = Some(enabled);
        self
    }

    pub fn with_type_key(mut self, type_key: impl Into<String>) -> Self {
        self.type_key = Some(type_key.into());
        self
    }

    pub fn from_toml_str(contents: &str) -> eyre::Result<Self> {
        toml::from_str(contents).wrap_err("parsing hub options")
    }

    /// Read options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading hub options from {}", path.display()))?;
        Self::from_toml_str(&contents)
            .wrap_err_with(|| format!("invalid hub options in {}", path.display()))
    }
}

fn positive_millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|ms| *ms > 0).map(Duration::from_millis)
}

/// Location of the per-user options file
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hub-bridge").join("hub.toml"))
}

/// Load the per-user options file, if there is one
pub fn load_user_options() -> eyre::Result<Option<HubOptions>> {
    let Some(path) = default_path() else {
        tracing::warn!("cannot determine config directory, skipping user hub options");
        return Ok(None);
    };
    load_optional(&path)
}

fn load_optional(path: &Path) -> eyre::Result<Option<HubOptions>> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no hub options file");
        return Ok(None);
    }
    HubOptions::load(path).map(Some)
}

use std::time::Duration;

use crate::{HttpConnectionOptions, HubProtocol, LogLevel, ReconnectPolicy, TransportKind};

/// Where and how to reach the hub
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Endpoint {
    /// No URL configured; the client falls back to its own default
    #[default]
    None,
    Url(String),
    WithTransport {
        url: String,
        transport: TransportKind,
    },
    WithOptions {
        url: String,
        options: HttpConnectionOptions,
    },
}

impl Endpoint {
    pub fn url(&self) -> Option<&str> {
        match self {
            Endpoint::None => None,
            Endpoint::Url(url)
            | Endpoint::WithTransport { url, .. }
            | Endpoint::WithOptions { url, .. } => Some(url),
        }
    }
}

/// Everything a [`crate::HubConnectionFactory`] needs to build a connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionSpec {
    pub endpoint: Endpoint,

    /// Base URL applied to the connection after it is built
    pub base_url: Option<String>,

    /// `None` disables automatic reconnect
    pub reconnect: Option<ReconnectPolicy>,

    pub protocol: Option<HubProtocol>,

    pub logging: Option<LogLevel>,

    /// Interval between client pings
    pub keep_alive_interval: Option<Duration>,

    /// Time without server traffic before the connection is considered lost
    pub server_timeout: Option<Duration>,
}

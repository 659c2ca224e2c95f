use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// HTTP transport used to carry the hub connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

/// Wire protocol spoken over the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubProtocol {
    #[default]
    Json,
    MessagePack,
}

/// Minimum level the hub client should log at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
    None,
}

/// Options for the HTTP connection underneath the hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConnectionOptions {
    /// Extra headers sent with every HTTP request
    pub headers: BTreeMap<String, String>,

    /// Bearer token attached to requests
    pub access_token: Option<String>,

    /// Skip the negotiate round-trip (WebSockets only)
    pub skip_negotiation: bool,

    /// Transport to force, if any
    pub transport: Option<TransportKind>,

    /// Send credentials on cross-origin requests
    pub with_credentials: bool,

    /// Timeout for HTTP requests, in milliseconds
    pub timeout_ms: Option<u64>,
}

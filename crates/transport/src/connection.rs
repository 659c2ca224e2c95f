use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ConnectionSpec, HubStream, TransportError};

/// Error returned by a [`MessageHandler`] back to the hub client
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invoked when the connection closes, with the error that closed it (if any)
pub type ClosedCallback = Arc<dyn Fn(Option<TransportError>) + Send + Sync>;

/// Invoked when the connection is lost and a reconnect cycle starts
pub type ReconnectingCallback = Arc<dyn Fn(Option<TransportError>) + Send + Sync>;

/// Invoked when a reconnect cycle succeeds, with the new connection id (if any)
pub type ReconnectedCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Invoked for every server-to-client call of a hub method
pub type MessageHandler = Arc<dyn Fn(Value) -> Result<(), HandlerError> + Send + Sync>;

/// State reported by the hub client itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

/// A single hub connection.
///
/// Callbacks are invoked synchronously by the client, in the order the
/// underlying events happen, and may be registered more than once.
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// Current state as seen by the client
    fn state(&self) -> HubConnectionState;

    /// Server assigned id of the current underlying connection
    fn connection_id(&self) -> Option<String>;

    /// Open the connection
    async fn start(&self) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed connection succeeds.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Fire-and-forget call of a hub method
    async fn send(&self, method: &str, payload: Value) -> Result<(), TransportError>;

    /// Call a hub method and wait for its result
    async fn invoke(&self, method: &str, payload: Value) -> Result<Value, TransportError>;

    /// Open a server-to-client stream
    async fn stream(&self, method: &str, payload: Value) -> Result<HubStream, TransportError>;

    fn on_closed(&self, callback: ClosedCallback);

    fn on_reconnecting(&self, callback: ReconnectingCallback);

    fn on_reconnected(&self, callback: ReconnectedCallback);

    /// Register a handler for server-to-client calls of `method`
    fn on(&self, method: &str, handler: MessageHandler);
}

/// Builds hub connections from a [`ConnectionSpec`]
pub trait HubConnectionFactory: Send + Sync {
    fn build(&self, spec: ConnectionSpec) -> Result<Arc<dyn HubConnection>, TransportError>;
}

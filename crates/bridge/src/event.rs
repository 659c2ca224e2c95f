use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use transport::TransportError;

use crate::{BUS_TYPE_FIELD, InboundMessage, StreamId};

/// Events published to the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connected,
    /// The connection closed, with the error that closed it
    Disconnected(Option<TransportError>),
    /// The connection was lost and the hub client is reconnecting
    Reconnecting(Option<TransportError>),
    /// The hub client reconnected, with the new connection id
    Reconnected(Option<String>),
    /// A connect intent replaced the existing connection
    ConnectionSuperseded,
    /// The connection could not be built or started
    ConnectionError(TransportError),
    StreamCompleted {
        stream: StreamId,
    },
    StreamError {
        stream: StreamId,
        error: TransportError,
    },
    /// A server message, routed by its own discriminator
    Message(InboundMessage),
}

impl BridgeEvent {
    /// Discriminator the bus routes this event by
    pub fn kind(&self) -> &str {
        match self {
            BridgeEvent::Connected => "[SignalR] Connected",
            BridgeEvent::Disconnected(_) => "[SignalR] Disconnected",
            BridgeEvent::Reconnecting(_) => "[SignalR] Reconnecting",
            BridgeEvent::Reconnected(_) => "[SignalR] Reconnected",
            BridgeEvent::ConnectionSuperseded => "[SignalR] Connection Updated",
            BridgeEvent::ConnectionError(_) => "[SignalR] Connection Error",
            BridgeEvent::StreamCompleted { .. } => "[SignalR] Stream Completed",
            BridgeEvent::StreamError { .. } => "[SignalR] Stream Error",
            BridgeEvent::Message(message) => &message.kind,
        }
    }

    /// JSON form of the event with its discriminator under `type`
    pub fn into_value(self) -> Value {
        let kind = self.kind().to_string();
        let mut value = match self {
            BridgeEvent::Message(message) => return message.into_value(),
            BridgeEvent::Disconnected(error) | BridgeEvent::Reconnecting(error) => {
                json!({ "error": error.map(|e| e.to_string()) })
            }
            BridgeEvent::Reconnected(connection_id) => json!({ "connectionId": connection_id }),
            BridgeEvent::ConnectionError(error) => json!({ "error": error.to_string() }),
            BridgeEvent::StreamCompleted { stream } => json!({ "stream": stream.get() }),
            BridgeEvent::StreamError { stream, error } => {
                json!({ "stream": stream.get(), "error": error.to_string() })
            }
            BridgeEvent::Connected | BridgeEvent::ConnectionSuperseded => json!({}),
        };
        if let Value::Object(fields) = &mut value {
            fields.insert(BUS_TYPE_FIELD.to_string(), Value::String(kind));
        }
        value
    }
}

/// Destination for bridge events
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: BridgeEvent);
}

impl EventSink for mpsc::UnboundedSender<BridgeEvent> {
    fn dispatch(&self, event: BridgeEvent) {
        if let Err(mpsc::error::SendError(event)) = self.send(event) {
            tracing::warn!(event = event.kind(), "event receiver dropped, discarding event");
        }
    }
}

impl EventSink for broadcast::Sender<BridgeEvent> {
    fn dispatch(&self, event: BridgeEvent) {
        if let Err(broadcast::error::SendError(event)) = self.send(event) {
            tracing::debug!(event = event.kind(), "no event subscribers");
        }
    }
}

/// Receiving side of [`crate::HubBridge::with_channel`]
pub struct BridgeEventReceiver {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl BridgeEventReceiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<BridgeEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl futures::Stream<Item = BridgeEvent> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.rx)
    }
}

use config::HubOptions;
use serde_json::Value;

use crate::StreamId;

/// Caller requests consumed by the bridge
#[derive(Debug, Clone)]
pub enum Intent {
    /// Open a connection, replacing any existing one. Overrides are merged
    /// into the held options and kept for later connects.
    Connect(Option<HubOptions>),
    Disconnect,
    /// Fire-and-forget call of a hub method
    Send { method: String, payload: Value },
    /// Call a hub method and wait for its result
    Invoke { method: String, payload: Value },
    /// Open a server stream whose items are republished as bus events
    OpenStream { method: String, payload: Value },
}

/// Kind of an [`Intent`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Connect,
    Disconnect,
    Send,
    Invoke,
    OpenStream,
}

impl IntentKind {
    /// Bus discriminator of the intent
    pub fn label(self) -> &'static str {
        match self {
            IntentKind::Connect => "[SignalR] Connect",
            IntentKind::Disconnect => "[SignalR] Disconnect",
            IntentKind::Send => "[SignalR] Send Message",
            IntentKind::Invoke => "[SignalR] Invoke Message",
            IntentKind::OpenStream => "[SignalR] Stream Message",
        }
    }
}

impl Intent {
    pub fn connect() -> Self {
        Intent::Connect(None)
    }

    pub fn connect_with(overrides: HubOptions) -> Self {
        Intent::Connect(Some(overrides))
    }

    pub fn send(method: impl Into<String>, payload: Value) -> Self {
        Intent::Send {
            method: method.into(),
            payload,
        }
    }

    pub fn invoke(method: impl Into<String>, payload: Value) -> Self {
        Intent::Invoke {
            method: method.into(),
            payload,
        }
    }

    pub fn open_stream(method: impl Into<String>, payload: Value) -> Self {
        Intent::OpenStream {
            method: method.into(),
            payload,
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Connect(_) => IntentKind::Connect,
            Intent::Disconnect => IntentKind::Disconnect,
            Intent::Send { .. } => IntentKind::Send,
            Intent::Invoke { .. } => IntentKind::Invoke,
            Intent::OpenStream { .. } => IntentKind::OpenStream,
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind().label()
    }
}

/// Successful outcome of an intent
#[derive(Debug, Clone, PartialEq)]
pub enum IntentReply {
    Done,
    /// Result of an invoked hub method
    Invoked(Value),
    /// Id of the stream now relayed to the bus
    StreamOpened(StreamId),
}

impl IntentReply {
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            IntentReply::StreamOpened(id) => Some(*id),
            _ => None,
        }
    }

    pub fn into_invoked(self) -> Option<Value> {
        match self {
            IntentReply::Invoked(value) => Some(value),
            _ => None,
        }
    }
}

//! Bridge between an application bus and a single hub connection.
//!
//! The bridge turns caller intents (connect, disconnect, send, invoke, open
//! stream) into calls on a [`transport::HubConnection`], and turns the
//! connection's lifecycle callbacks, server messages and stream items back
//! into [`BridgeEvent`]s.
//!
//! # Architecture
//!
//! - The supervisor task owns the connection. Connect and disconnect intents
//!   are processed one at a time; replacing a connection tears the old one
//!   down (and disposes its streams) before the new one is built
//! - One worker task per intent kind runs send, invoke and open-stream jobs
//!   in arrival order, after checking the connection is connected
//! - An event relay per connection republishes its callbacks. A replaced
//!   or torn-down connection's relay is muted, so it can never publish or
//!   change state
//! - The stream registry keeps the disposer of every open stream until the
//!   stream finishes or the connection goes away
//!
//! Protocol violations (server messages without the configured type key) are
//! never published; they are logged and reported on [`HubBridge::faults`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bridge::{BridgeEvent, HubBridge};
//! use config::HubOptions;
//! use transport::testing::MemoryHub;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = MemoryHub::new();
//! let (bridge, mut events) =
//!     HubBridge::with_channel(HubOptions::default().with_url("wss://x"), Arc::new(hub.clone()));
//!
//! bridge.connect(None).await.unwrap();
//! assert_eq!(events.recv().await, Some(BridgeEvent::Connected));
//!
//! bridge.shutdown().await.unwrap();
//! # }
//! ```

mod bridge;
mod context;
mod dispatcher;
mod envelope;
mod error;
mod event;
mod intent;
mod link;
mod relay;
mod streams;
mod supervisor;

pub use bridge::HubBridge;
pub use envelope::{BUS_TYPE_FIELD, HUB_BROADCAST_METHOD, InboundMessage};
pub use error::BridgeError;
pub use event::{BridgeEvent, BridgeEventReceiver, EventSink};
pub use intent::{Intent, IntentKind, IntentReply};
pub use link::LinkState;
pub use streams::StreamId;

//! Hub connection interface consumed by the hub bridge.
//!
//! This crate describes the stateful, reconnecting duplex connection that the
//! bridge drives, without implementing one. A concrete hub client (SignalR
//! style: start/stop, fire-and-forget sends, invocations, server streams and
//! server-to-client method calls) plugs in by implementing
//! [`HubConnectionFactory`] and [`HubConnection`].
//!
//! # Architecture
//!
//! - [`ConnectionSpec`] is everything needed to build a connection: the
//!   selected [`Endpoint`], an optional [`ReconnectPolicy`], protocol, logging
//!   and keep-alive settings
//! - [`HubConnectionFactory`] turns a spec into a shared [`HubConnection`]
//! - [`HubConnection`] exposes the async network calls plus a small callback
//!   table for lifecycle transitions and inbound messages
//! - [`HubStream`] pairs a stream of items with the [`Disposer`] that cancels
//!   the server stream
//!
//! # Scope
//!
//! Framing, negotiation, serialization and retry timing belong to the hub
//! client. Routing its events onto an application bus belongs upstream
//! (e.g., `bridge`).

mod connection;
mod error;
mod options;
mod retry;
mod spec;
mod stream;

pub mod testing;

pub use connection::{
    ClosedCallback, HandlerError, HubConnection, HubConnectionFactory, HubConnectionState,
    MessageHandler, ReconnectedCallback, ReconnectingCallback,
};
pub use error::TransportError;
pub use options::{HttpConnectionOptions, HubProtocol, LogLevel, TransportKind};
pub use retry::{DEFAULT_RETRY_DELAYS, DelaySequence, ReconnectPolicy, RetryContext, RetryPolicy};
pub use spec::{ConnectionSpec, Endpoint};
pub use stream::{Disposer, HubStream};

//! In-memory hub for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::lock;
use crate::{
    ClosedCallback, ConnectionSpec, Disposer, HandlerError, HubConnection, HubConnectionFactory,
    HubConnectionState, HubStream, MessageHandler, ReconnectedCallback, ReconnectingCallback,
    TransportError,
};

/// A call that reached a [`MemoryConnection`], accepted or not
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Send { method: String, payload: Value },
    Invoke { method: String, payload: Value },
    Stream { method: String, payload: Value },
}

#[derive(Debug, Default)]
struct LiveCounter {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl LiveCounter {
    fn acquire(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds calls of a [`MemoryConnection`] in flight until released.
///
/// Released gates stay open: later calls pass straight through.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
    waiting: Arc<AtomicUsize>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    /// Number of calls currently held
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn pass(&self) {
        let mut open = self.open.subscribe();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        // the sender lives in `self`, so this only returns once released
        let _ = open.wait_for(|open| *open).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct HubShared {
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
    start_gates: Mutex<VecDeque<Gate>>,
    start_failures: Mutex<VecDeque<TransportError>>,
    build_failures: Mutex<VecDeque<TransportError>>,
    counter: Arc<LiveCounter>,
}

/// Instrumented [`HubConnectionFactory`] that builds [`MemoryConnection`]s.
///
/// A handle counts as live from the moment it is built until it is stopped,
/// closed, or fails to start. [`MemoryHub::peak_live_handles`] records the
/// highest number of live handles ever observed at once.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use transport::testing::MemoryHub;
/// use transport::{ConnectionSpec, HubConnectionFactory};
///
/// let hub = MemoryHub::new();
/// let factory: Arc<dyn HubConnectionFactory> = Arc::new(hub.clone());
/// let _conn = factory.build(ConnectionSpec::default()).unwrap();
///
/// assert_eq!(hub.builds(), 1);
/// assert_eq!(hub.live_handles(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MemoryHub {
    shared: Arc<HubShared>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `start()` of the next built connection fail with `error`
    pub fn fail_next_start(&self, error: TransportError) {
        lock(&self.shared.start_failures).push_back(error);
    }

    /// Hold the `start()` of the next built connection until the returned
    /// gate is released
    pub fn hold_next_start(&self) -> Gate {
        let gate = Gate::new();
        lock(&self.shared.start_gates).push_back(gate.clone());
        gate
    }

    /// Make the next `build()` fail with `error`
    pub fn fail_next_build(&self, error: TransportError) {
        lock(&self.shared.build_failures).push_back(error);
    }

    /// Number of connections built so far
    pub fn builds(&self) -> usize {
        lock(&self.shared.connections).len()
    }

    pub fn connection(&self, index: usize) -> Option<Arc<MemoryConnection>> {
        lock(&self.shared.connections).get(index).cloned()
    }

    /// Most recently built connection
    pub fn latest(&self) -> Option<Arc<MemoryConnection>> {
        lock(&self.shared.connections).last().cloned()
    }

    pub fn live_handles(&self) -> usize {
        self.shared.counter.live.load(Ordering::SeqCst)
    }

    pub fn peak_live_handles(&self) -> usize {
        self.shared.counter.peak.load(Ordering::SeqCst)
    }
}

impl HubConnectionFactory for MemoryHub {
    fn build(&self, spec: ConnectionSpec) -> Result<Arc<dyn HubConnection>, TransportError> {
        if let Some(error) = lock(&self.shared.build_failures).pop_front() {
            return Err(error);
        }

        let start_failure = lock(&self.shared.start_failures).pop_front();
        let start_gate = lock(&self.shared.start_gates).pop_front();
        let mut connections = lock(&self.shared.connections);
        let connection = Arc::new(MemoryConnection::new(
            connections.len(),
            spec,
            start_failure,
            start_gate,
            Arc::clone(&self.shared.counter),
        ));
        connections.push(Arc::clone(&connection));
        tracing::debug!(index = connection.index, "built memory connection");

        Ok(connection)
    }
}

#[derive(Default)]
struct Callbacks {
    closed: Vec<ClosedCallback>,
    reconnecting: Vec<ReconnectingCallback>,
    reconnected: Vec<ReconnectedCallback>,
    handlers: HashMap<String, Vec<MessageHandler>>,
}

/// In-memory [`HubConnection`] driven by the test.
pub struct MemoryConnection {
    index: usize,
    spec: ConnectionSpec,
    start_failure: Mutex<Option<TransportError>>,
    start_gate: Mutex<Option<Gate>>,
    stream_gate: Mutex<Option<Gate>>,
    state: Mutex<HubConnectionState>,
    connection_id: Mutex<Option<String>>,
    live: AtomicBool,
    counter: Arc<LiveCounter>,
    callbacks: Mutex<Callbacks>,
    calls: Mutex<Vec<RecordedCall>>,
    streams: Mutex<Vec<Arc<MemoryStream>>>,
    call_failure: Mutex<Option<TransportError>>,
    stops: AtomicUsize,
}

impl MemoryConnection {
    fn new(
        index: usize,
        spec: ConnectionSpec,
        start_failure: Option<TransportError>,
        start_gate: Option<Gate>,
        counter: Arc<LiveCounter>,
    ) -> Self {
        counter.acquire();
        Self {
            index,
            spec,
            start_failure: Mutex::new(start_failure),
            start_gate: Mutex::new(start_gate),
            stream_gate: Mutex::new(None),
            state: Mutex::new(HubConnectionState::Disconnected),
            connection_id: Mutex::new(None),
            live: AtomicBool::new(true),
            counter,
            callbacks: Mutex::default(),
            calls: Mutex::default(),
            streams: Mutex::default(),
            call_failure: Mutex::new(None),
            stops: AtomicUsize::new(0),
        }
    }

    fn release(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.counter.release();
        }
    }

    fn set_state(&self, state: HubConnectionState) {
        *lock(&self.state) = state;
    }

    /// Position of this connection in build order
    pub fn index(&self) -> usize {
        self.index
    }

    /// The spec this connection was built from
    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of times `stop()` was called
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Make every following send, invoke and stream call fail with `error`
    pub fn fail_calls_with(&self, error: TransportError) {
        *lock(&self.call_failure) = Some(error);
    }

    /// Hold every following `stream()` call, after it was recorded and its
    /// server side created, until the returned gate is released
    pub fn hold_streams(&self) -> Gate {
        let gate = Gate::new();
        *lock(&self.stream_gate) = Some(gate.clone());
        gate
    }

    /// Streams opened on this connection, in order
    pub fn server_streams(&self) -> Vec<Arc<MemoryStream>> {
        lock(&self.streams).clone()
    }

    pub fn server_stream(&self, index: usize) -> Option<Arc<MemoryStream>> {
        lock(&self.streams).get(index).cloned()
    }

    /// Deliver a server-to-client call of `method` to every registered handler
    pub fn deliver(&self, method: &str, message: Value) -> Vec<Result<(), HandlerError>> {
        let handlers = lock(&self.callbacks)
            .handlers
            .get(method)
            .cloned()
            .unwrap_or_default();
        handlers
            .iter()
            .map(|handler| handler(message.clone()))
            .collect()
    }

    /// Number of handlers registered for `method`
    pub fn handler_count(&self, method: &str) -> usize {
        lock(&self.callbacks)
            .handlers
            .get(method)
            .map_or(0, Vec::len)
    }

    /// Simulate the server dropping the connection for good
    pub fn trigger_closed(&self, error: Option<TransportError>) {
        self.set_state(HubConnectionState::Disconnected);
        self.release();
        let callbacks = lock(&self.callbacks).closed.clone();
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Simulate the connection being lost and a reconnect cycle starting
    pub fn trigger_reconnecting(&self, error: Option<TransportError>) {
        self.set_state(HubConnectionState::Reconnecting);
        let callbacks = lock(&self.callbacks).reconnecting.clone();
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Simulate a reconnect cycle succeeding
    pub fn trigger_reconnected(&self, connection_id: Option<String>) {
        self.set_state(HubConnectionState::Connected);
        *lock(&self.connection_id) = connection_id.clone();
        let callbacks = lock(&self.callbacks).reconnected.clone();
        for callback in callbacks {
            callback(connection_id.clone());
        }
    }

    fn record(&self, call: RecordedCall) -> Result<(), TransportError> {
        lock(&self.calls).push(call);
        if let Some(error) = lock(&self.call_failure).clone() {
            return Err(error);
        }
        if self.state() != HubConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl HubConnection for MemoryConnection {
    fn state(&self) -> HubConnectionState {
        *lock(&self.state)
    }

    fn connection_id(&self) -> Option<String> {
        lock(&self.connection_id).clone()
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.set_state(HubConnectionState::Connecting);
        let gate = lock(&self.start_gate).take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let failure = lock(&self.start_failure).take();
        if let Some(error) = failure {
            self.set_state(HubConnectionState::Disconnected);
            self.release();
            return Err(error);
        }
        *lock(&self.connection_id) = Some(uuid::Uuid::new_v4().to_string());
        self.set_state(HubConnectionState::Connected);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.state() == HubConnectionState::Disconnected {
            self.release();
            return Ok(());
        }
        self.trigger_closed(None);
        Ok(())
    }

    async fn send(&self, method: &str, payload: Value) -> Result<(), TransportError> {
        self.record(RecordedCall::Send {
            method: method.to_string(),
            payload,
        })
    }

    async fn invoke(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        self.record(RecordedCall::Invoke {
            method: method.to_string(),
            payload: payload.clone(),
        })?;
        Ok(payload)
    }

    async fn stream(&self, method: &str, payload: Value) -> Result<HubStream, TransportError> {
        self.record(RecordedCall::Stream {
            method: method.to_string(),
            payload: payload.clone(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Arc::new(MemoryStream {
            method: method.to_string(),
            payload,
            tx: Mutex::new(Some(tx)),
            disposals: AtomicUsize::new(0),
        });
        lock(&self.streams).push(Arc::clone(&stream));

        let gate = lock(&self.stream_gate).clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let disposed = Arc::clone(&stream);
        Ok(HubStream::new(
            Box::pin(UnboundedReceiverStream::new(rx)),
            Disposer::new(move || disposed.dispose()),
        ))
    }

    fn on_closed(&self, callback: ClosedCallback) {
        lock(&self.callbacks).closed.push(callback);
    }

    fn on_reconnecting(&self, callback: ReconnectingCallback) {
        lock(&self.callbacks).reconnecting.push(callback);
    }

    fn on_reconnected(&self, callback: ReconnectedCallback) {
        lock(&self.callbacks).reconnected.push(callback);
    }

    fn on(&self, method: &str, handler: MessageHandler) {
        lock(&self.callbacks)
            .handlers
            .entry(method.to_string())
            .or_default()
            .push(handler);
    }
}

/// Server side of one stream opened on a [`MemoryConnection`]
pub struct MemoryStream {
    method: String,
    payload: Value,
    tx: Mutex<Option<mpsc::UnboundedSender<Result<Value, TransportError>>>>,
    disposals: AtomicUsize,
}

impl MemoryStream {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Push an item; returns false once the stream is finished or disposed
    pub fn push(&self, item: Value) -> bool {
        lock(&self.tx)
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(item)).is_ok())
    }

    /// Finish the stream naturally
    pub fn complete(&self) {
        lock(&self.tx).take();
    }

    /// Finish the stream with an error
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = lock(&self.tx).take() {
            let _ = tx.send(Err(error));
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.tx).is_some()
    }

    /// Number of times the client disposed this stream
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        lock(&self.tx).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn connect(hub: &MemoryHub) -> Arc<dyn HubConnection> {
        hub.build(ConnectionSpec::default()).unwrap()
    }

    #[tokio::test]
    async fn start_and_stop_track_live_handles() {
        let hub = MemoryHub::new();
        let conn = connect(&hub);
        conn.start().await.unwrap();
        assert_eq!(conn.state(), HubConnectionState::Connected);
        assert!(conn.connection_id().is_some());
        assert_eq!(hub.live_handles(), 1);

        conn.stop().await.unwrap();
        assert_eq!(conn.state(), HubConnectionState::Disconnected);
        assert_eq!(hub.live_handles(), 0);
        assert_eq!(hub.peak_live_handles(), 1);
    }

    #[tokio::test]
    async fn scripted_start_failure() {
        let hub = MemoryHub::new();
        hub.fail_next_start(TransportError::Network("refused".into()));
        let conn = connect(&hub);

        let err = conn.start().await.unwrap_err();
        assert_eq!(err, TransportError::Network("refused".into()));
        assert_eq!(hub.live_handles(), 0);

        // only the next connection is affected
        let conn = connect(&hub);
        conn.start().await.unwrap();
    }

    #[tokio::test]
    async fn stop_fires_closed_callbacks_once() {
        let hub = MemoryHub::new();
        let conn = connect(&hub);
        conn.start().await.unwrap();

        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        conn.on_closed(Arc::new(move |error: Option<TransportError>| {
            assert!(error.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        conn.stop().await.unwrap();
        conn.stop().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(hub.latest().unwrap().stops(), 2);
    }

    #[tokio::test]
    async fn calls_are_recorded_even_when_rejected() {
        let hub = MemoryHub::new();
        let conn = connect(&hub);

        let err = conn.send("Echo", json!(1)).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(
            hub.latest().unwrap().calls(),
            vec![RecordedCall::Send {
                method: "Echo".into(),
                payload: json!(1)
            }]
        );
    }

    #[tokio::test]
    async fn stream_items_flow_until_disposed() {
        let hub = MemoryHub::new();
        let conn = connect(&hub);
        conn.start().await.unwrap();

        let (mut items, disposer) = conn.stream("Feed", json!({})).await.unwrap().into_parts();
        let server = hub.latest().unwrap().server_stream(0).unwrap();
        assert_eq!(server.method(), "Feed");

        assert!(server.push(json!({"n": 1})));
        assert_eq!(items.next().await.unwrap().unwrap(), json!({"n": 1}));

        disposer.dispose();
        assert_eq!(server.disposals(), 1);
        assert!(!server.push(json!({"n": 2})));
        assert!(items.next().await.is_none());
    }

    #[tokio::test]
    async fn deliver_reaches_registered_handlers() {
        let hub = MemoryHub::new();
        let conn = connect(&hub);
        conn.on(
            "send",
            Arc::new(|message: Value| -> Result<(), HandlerError> {
                if message.get("type").is_some() {
                    Ok(())
                } else {
                    Err("no type".into())
                }
            }),
        );

        let memory = hub.latest().unwrap();
        assert_eq!(memory.handler_count("send"), 1);
        let results = memory.deliver("send", json!({"type": "x"}));
        assert!(results[0].is_ok());
        let results = memory.deliver("send", json!({}));
        assert!(results[0].is_err());
        assert!(memory.deliver("other", json!({})).is_empty());
    }

    #[tokio::test]
    async fn held_start_waits_for_release() {
        let hub = MemoryHub::new();
        let gate = hub.hold_next_start();
        let conn = connect(&hub);

        let starting = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.start().await }
        });
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(conn.state(), HubConnectionState::Connecting);

        gate.release();
        starting.await.unwrap().unwrap();
        assert_eq!(conn.state(), HubConnectionState::Connected);
        assert_eq!(gate.waiting(), 0);
    }
}

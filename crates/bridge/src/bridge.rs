use std::{future::Future, sync::Arc};

use config::HubOptions;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use transport::HubConnectionFactory;

use crate::{
    BridgeError, BridgeEventReceiver, EventSink, Intent, IntentKind, IntentReply, LinkState,
    StreamId,
    context::Shared,
    dispatcher::{IntentRouter, spawn_worker},
    supervisor::{Command, Supervisor},
};

/// Handle to a running hub bridge.
///
/// The bridge owns at most one hub connection. Intents go in through
/// [`HubBridge::dispatch`] (or [`HubBridge::attach`]); lifecycle events,
/// stream outcomes and server messages come out through the [`EventSink`].
///
/// Dropping the handle stops the bridge's tasks, disposes open streams and
/// stops the connection in the background. Call [`HubBridge::shutdown`] to
/// wait for the close.
pub struct HubBridge {
    shared: Arc<Shared>,
    router: IntentRouter,
    commands: mpsc::UnboundedSender<Command>,
    faults: Option<mpsc::UnboundedReceiver<BridgeError>>,
    cancel_token: CancellationToken,

    // Task handles for cleanup
    handles: Vec<JoinHandle<()>>,
}

impl HubBridge {
    /// Start a bridge publishing to `sink`.
    ///
    /// `options` are laid over [`HubOptions::defaults`]. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        options: HubOptions,
        factory: Arc<dyn HubConnectionFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let shared = Arc::new(Shared::new(sink, fault_tx, cancel_token.clone()));

        let supervisor = Supervisor::new(
            HubOptions::with_defaults(options),
            factory,
            Arc::clone(&shared),
            command_tx.clone(),
        );
        let (router, queues) = IntentRouter::new(command_tx.clone());

        let handles = vec![
            tokio::spawn(supervisor.run(command_rx, cancel_token.clone())),
            spawn_worker(
                IntentKind::Send,
                queues.send,
                Arc::clone(&shared),
                cancel_token.clone(),
            ),
            spawn_worker(
                IntentKind::Invoke,
                queues.invoke,
                Arc::clone(&shared),
                cancel_token.clone(),
            ),
            spawn_worker(
                IntentKind::OpenStream,
                queues.stream,
                Arc::clone(&shared),
                cancel_token.clone(),
            ),
        ];
        tracing::debug!("hub bridge started");

        Self {
            shared,
            router,
            commands: command_tx,
            faults: Some(fault_rx),
            cancel_token,
            handles,
        }
    }

    /// Start a bridge publishing to a fresh channel
    pub fn with_channel(
        options: HubOptions,
        factory: Arc<dyn HubConnectionFactory>,
    ) -> (Self, BridgeEventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let bridge = Self::spawn(options, factory, Arc::new(event_tx));
        (bridge, BridgeEventReceiver::new(event_rx))
    }

    /// Enqueue an intent and return a future for its outcome.
    ///
    /// Intents of the same kind are processed in the order they are
    /// dispatched, even if the returned futures are polled out of order or
    /// not at all.
    pub fn dispatch(
        &self,
        intent: Intent,
    ) -> impl Future<Output = Result<IntentReply, BridgeError>> + Send + 'static {
        self.router.dispatch(intent)
    }

    /// Connect, merging `overrides` into the held options
    pub async fn connect(&self, overrides: Option<HubOptions>) -> Result<(), BridgeError> {
        self.dispatch(Intent::Connect(overrides)).await.map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.dispatch(Intent::Disconnect).await.map(|_| ())
    }

    pub async fn send(&self, method: &str, payload: Value) -> Result<(), BridgeError> {
        self.dispatch(Intent::send(method, payload)).await.map(|_| ())
    }

    pub async fn invoke(&self, method: &str, payload: Value) -> Result<Value, BridgeError> {
        let reply = self.dispatch(Intent::invoke(method, payload)).await?;
        Ok(reply.into_invoked().unwrap_or(Value::Null))
    }

    pub async fn open_stream(&self, method: &str, payload: Value) -> Result<StreamId, BridgeError> {
        let reply = self.dispatch(Intent::open_stream(method, payload)).await?;
        reply.stream_id().ok_or(BridgeError::NotConnected)
    }

    /// Process every intent of `intents` until it ends or the bridge stops.
    /// Failed intents are logged.
    pub fn attach<S>(&self, intents: S) -> JoinHandle<()>
    where
        S: Stream<Item = Intent> + Send + 'static,
    {
        let router = self.router.clone();
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut intents = std::pin::pin!(intents);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("intent subscription cancelled");
                        break;
                    }
                    intent = intents.next() => {
                        let Some(intent) = intent else {
                            tracing::debug!("intent stream ended");
                            break;
                        };
                        let label = intent.label();
                        let outcome = router.dispatch(intent);
                        tokio::spawn(async move {
                            if let Err(error) = outcome.await {
                                tracing::warn!(intent = label, %error, "intent failed");
                            }
                        });
                    }
                }
            }
        })
    }

    pub fn state(&self) -> LinkState {
        self.shared.link.state()
    }

    /// Wait until the link reaches `state`
    pub async fn wait_for_state(&self, state: LinkState) -> Result<(), BridgeError> {
        let mut rx = self.shared.link.subscribe();
        rx.wait_for(|link| link.state == state)
            .await
            .map(|_| ())
            .map_err(|_| BridgeError::Shutdown)
    }

    /// Number of streams currently relayed
    pub async fn active_streams(&self) -> usize {
        self.shared.streams.len().await
    }

    /// Take the receiver of protocol violations; `None` once taken
    pub fn faults(&mut self) -> Option<mpsc::UnboundedReceiver<BridgeError>> {
        self.faults.take()
    }

    /// Close the connection, then stop the bridge
    pub async fn shutdown(mut self) -> Result<(), BridgeError> {
        let (done, closed) = oneshot::channel();
        let result = match self.commands.send(Command::Shutdown { done }) {
            Ok(()) => closed.await.map_err(|_| BridgeError::Shutdown),
            Err(_) => Err(BridgeError::Shutdown),
        };

        self.cancel_token.cancel();

        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.await;
        }
        tracing::debug!("hub bridge stopped");

        result
    }
}

impl Drop for HubBridge {
    fn drop(&mut self) {
        self.cancel_token.cancel();

        // the connection's callbacks hold the shared state, which holds the
        // connection: take it out of the link so both can go
        if self.shared.streams.try_dispose_all().is_none() {
            tracing::warn!("stream registry busy, streams left to the server");
        }
        let Some(handle) = self.shared.link.retire() else {
            return;
        };
        self.shared.link.clear();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(error) = handle.stop().await {
                        tracing::warn!(%error, "failed to stop dropped hub connection");
                    }
                });
            }
            Err(_) => tracing::warn!("hub bridge dropped outside a runtime, connection not stopped"),
        }
    }
}

//! Routing of intents to their queues.
//!
//! Connect and disconnect go to the supervisor. Send, invoke and open-stream
//! each have a worker of their own: jobs of one kind run in arrival order,
//! each to completion, while different kinds do not wait for each other.

use std::{future::Future, sync::Arc};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    BridgeError, Intent, IntentKind, IntentReply,
    context::Shared,
    streams::relay_stream,
    supervisor::{Command, Reply},
};

pub(crate) struct Job {
    method: String,
    payload: Value,
    reply: Reply,
}

/// Cheap handle that enqueues intents
#[derive(Clone)]
pub(crate) struct IntentRouter {
    commands: mpsc::UnboundedSender<Command>,
    send: mpsc::UnboundedSender<Job>,
    invoke: mpsc::UnboundedSender<Job>,
    stream: mpsc::UnboundedSender<Job>,
}

pub(crate) struct WorkerQueues {
    pub(crate) send: mpsc::UnboundedReceiver<Job>,
    pub(crate) invoke: mpsc::UnboundedReceiver<Job>,
    pub(crate) stream: mpsc::UnboundedReceiver<Job>,
}

impl IntentRouter {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> (Self, WorkerQueues) {
        let (send, send_rx) = mpsc::unbounded_channel();
        let (invoke, invoke_rx) = mpsc::unbounded_channel();
        let (stream, stream_rx) = mpsc::unbounded_channel();
        let router = Self {
            commands,
            send,
            invoke,
            stream,
        };
        let queues = WorkerQueues {
            send: send_rx,
            invoke: invoke_rx,
            stream: stream_rx,
        };
        (router, queues)
    }

    /// Enqueue `intent` now and return a future for its outcome.
    ///
    /// The intent takes its place in its queue before this returns, whether
    /// or not the future is ever polled.
    pub(crate) fn dispatch(
        &self,
        intent: Intent,
    ) -> impl Future<Output = Result<IntentReply, BridgeError>> + Send + 'static {
        let kind = intent.kind();
        let (reply, outcome) = oneshot::channel();
        let queued = match intent {
            Intent::Connect(overrides) => self
                .commands
                .send(Command::Connect { overrides, reply })
                .is_ok(),
            Intent::Disconnect => self.commands.send(Command::Disconnect { reply }).is_ok(),
            Intent::Send { method, payload } => self.send.send(Job { method, payload, reply }).is_ok(),
            Intent::Invoke { method, payload } => {
                self.invoke.send(Job { method, payload, reply }).is_ok()
            }
            Intent::OpenStream { method, payload } => {
                self.stream.send(Job { method, payload, reply }).is_ok()
            }
        };
        tracing::debug!(intent = kind.label(), queued, "dispatched intent");

        async move {
            if !queued {
                return Err(BridgeError::Shutdown);
            }
            match outcome.await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::Shutdown),
            }
        }
    }
}

pub(crate) fn spawn_worker(
    kind: IntentKind,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(intent = kind.label(), "intent worker cancelled");
                    break;
                }
                job = jobs.recv() => {
                    let Some(Job { method, payload, reply }) = job else {
                        tracing::debug!(intent = kind.label(), "intent queue closed");
                        break;
                    };
                    let result = match kind {
                        IntentKind::Send => send(&shared, &method, payload).await,
                        IntentKind::Invoke => invoke(&shared, &method, payload).await,
                        IntentKind::OpenStream => open_stream(&shared, &method, payload).await,
                        IntentKind::Connect | IntentKind::Disconnect => {
                            tracing::warn!(intent = kind.label(), "intent routed to a worker");
                            Err(BridgeError::Shutdown)
                        }
                    };
                    if let Err(error) = &result {
                        tracing::debug!(intent = kind.label(), %method, %error, "intent rejected");
                    }
                    let _ = reply.send(result);
                }
            }
        }
    })
}

async fn send(shared: &Shared, method: &str, payload: Value) -> Result<IntentReply, BridgeError> {
    let ready = shared.link.ready()?;
    ready
        .handle
        .send(method, payload)
        .await
        .map_err(|error| BridgeError::from_transport(method, error))?;
    Ok(IntentReply::Done)
}

async fn invoke(shared: &Shared, method: &str, payload: Value) -> Result<IntentReply, BridgeError> {
    let ready = shared.link.ready()?;
    let result = ready
        .handle
        .invoke(method, payload)
        .await
        .map_err(|error| BridgeError::from_transport(method, error))?;
    Ok(IntentReply::Invoked(result))
}

async fn open_stream(
    shared: &Arc<Shared>,
    method: &str,
    payload: Value,
) -> Result<IntentReply, BridgeError> {
    let ready = shared.link.ready()?;
    let (items, disposer) = ready
        .handle
        .stream(method, payload)
        .await
        .map_err(|error| BridgeError::from_transport(method, error))?
        .into_parts();

    let id = shared.streams.next_id();
    let cancel = shared.cancel.child_token();
    shared.streams.track(id, disposer, cancel.clone()).await;

    // a teardown that retired the link before the stream was tracked would
    // have missed it
    if !shared.link.is_active(ready.generation) {
        shared.streams.dispose(id).await;
        return Err(BridgeError::NotConnected);
    }

    tracing::debug!(stream = %id, %method, generation = ready.generation, "relaying stream");
    tokio::spawn(relay_stream(
        id,
        items,
        cancel,
        ready.type_key,
        Arc::clone(shared),
    ));
    Ok(IntentReply::StreamOpened(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeEvent, EventSink, LinkState};
    use serde_json::json;
    use transport::testing::MemoryHub;
    use transport::{ConnectionSpec, HubConnectionFactory, TransportError};

    async fn connected() -> (Arc<Shared>, MemoryHub, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (fault_tx, _faults) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(event_tx);
        let shared = Arc::new(Shared::new(sink, fault_tx, CancellationToken::new()));

        let hub = MemoryHub::new();
        let handle = hub.build(ConnectionSpec::default()).unwrap();
        handle.start().await.unwrap();
        shared.link.install(1, handle, Arc::from("type"));
        shared
            .link
            .transition(1, &[LinkState::Starting], LinkState::Connected);
        (shared, hub, events)
    }

    #[tokio::test]
    async fn invoke_returns_the_hub_result() {
        let (shared, _hub, _events) = connected().await;
        let reply = invoke(&shared, "Echo", json!({"n": 1})).await.unwrap();
        assert_eq!(reply, IntentReply::Invoked(json!({"n": 1})));
    }

    #[tokio::test]
    async fn rejections_are_mapped() {
        let (shared, hub, _events) = connected().await;
        let conn = hub.latest().unwrap();

        conn.fail_calls_with(TransportError::Hub {
            method: "Echo".into(),
            message: "denied".into(),
        });
        let err = send(&shared, "Echo", json!(1)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport { ref method, .. } if method == "Echo"));

        conn.fail_calls_with(TransportError::Closed("stopped".into()));
        let err = send(&shared, "Echo", json!(1)).await.unwrap_err();
        assert_eq!(err, BridgeError::NotConnected);
    }

    #[tokio::test]
    async fn guard_stops_calls_before_the_transport() {
        let (shared, hub, _events) = connected().await;
        shared.link.retire();

        assert_eq!(
            open_stream(&shared, "feed", json!({})).await.unwrap_err(),
            BridgeError::NotConnected
        );
        assert!(hub.latest().unwrap().calls().is_empty());
    }

    #[tokio::test]
    async fn stream_items_reach_the_sink() {
        let (shared, hub, mut events) = connected().await;
        let reply = open_stream(&shared, "feed", json!({})).await.unwrap();
        let id = reply.stream_id().unwrap();
        assert_eq!(shared.streams.len().await, 1);

        let server = hub.latest().unwrap().server_stream(0).unwrap();
        server.push(json!({"type": "X", "v": 1}));
        server.complete();

        let Some(BridgeEvent::Message(message)) = events.recv().await else {
            panic!("expected a message event");
        };
        assert_eq!(message.kind, "X");
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::StreamCompleted { stream: id })
        );
        assert_eq!(shared.streams.len().await, 0);
        assert_eq!(server.disposals(), 0);
    }

    #[tokio::test]
    async fn router_enqueues_in_order() {
        let (commands, _command_rx) = mpsc::unbounded_channel();
        let (router, mut queues) = IntentRouter::new(commands);

        let _first = router.dispatch(Intent::send("A", json!(1)));
        let _second = router.dispatch(Intent::send("B", json!(2)));

        assert_eq!(queues.send.recv().await.unwrap().method, "A");
        assert_eq!(queues.send.recv().await.unwrap().method, "B");
        assert!(queues.invoke.try_recv().is_err());
    }

    #[tokio::test]
    async fn router_reports_shutdown() {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (router, queues) = IntentRouter::new(commands);
        drop(command_rx);
        drop(queues);

        assert_eq!(
            router.dispatch(Intent::Disconnect).await,
            Err(BridgeError::Shutdown)
        );
        assert_eq!(
            router.dispatch(Intent::invoke("Echo", json!(1))).await,
            Err(BridgeError::Shutdown)
        );
    }
}

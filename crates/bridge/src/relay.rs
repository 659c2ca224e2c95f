use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Value;
use tokio::sync::mpsc;
use transport::{HandlerError, HubConnection, TransportError};

use crate::{
    BridgeEvent, HUB_BROADCAST_METHOD, InboundMessage, LinkState, context::Shared,
    supervisor::Command,
};

/// Republishes the callbacks of one connection generation as bus events.
///
/// Once muted, the relay stays silent for good; the supervisor mutes the
/// relay of a connection it replaces, tears down or fails to start. Apart from
/// the close, callbacks of a generation that no longer owns the link are
/// dropped as well.
pub(crate) struct EventRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    generation: u64,
    muted: AtomicBool,
    type_key: Arc<str>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl EventRelay {
    pub(crate) fn new(
        generation: u64,
        type_key: Arc<str>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                generation,
                muted: AtomicBool::new(false),
                type_key,
                shared,
                commands,
            }),
        }
    }

    pub(crate) fn attach(&self, handle: &dyn HubConnection) {
        let inner = Arc::clone(&self.inner);
        handle.on_closed(Arc::new(move |error: Option<TransportError>| {
            inner.closed(error)
        }));

        let inner = Arc::clone(&self.inner);
        handle.on_reconnecting(Arc::new(move |error: Option<TransportError>| {
            inner.reconnecting(error)
        }));

        let inner = Arc::clone(&self.inner);
        handle.on_reconnected(Arc::new(move |connection_id: Option<String>| {
            inner.reconnected(connection_id)
        }));

        let inner = Arc::clone(&self.inner);
        handle.on(
            HUB_BROADCAST_METHOD,
            Arc::new(move |envelope: Value| inner.message(envelope)),
        );
    }

    pub(crate) fn mute(&self) {
        self.inner.muted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation
    }
}

impl RelayInner {
    fn is_muted(&self) -> bool {
        let muted = self.muted.load(Ordering::SeqCst);
        if muted {
            tracing::debug!(generation = self.generation, "ignoring callback from muted relay");
        }
        muted
    }

    fn is_current(&self) -> bool {
        if self.is_muted() {
            return false;
        }
        let live = self.shared.link.is_live(self.generation);
        if !live {
            tracing::debug!(generation = self.generation, "ignoring callback from retired connection");
        }
        live
    }

    fn closed(&self, error: Option<TransportError>) {
        if self.is_muted() {
            return;
        }
        self.shared.link.transition(
            self.generation,
            &[
                LinkState::Starting,
                LinkState::Connected,
                LinkState::Reconnecting,
            ],
            LinkState::Closed,
        );
        tracing::info!(generation = self.generation, ?error, "hub connection closed");
        self.shared.sink.dispatch(BridgeEvent::Disconnected(error));

        let generation = self.generation;
        if self.commands.send(Command::Closed { generation }).is_err() {
            tracing::debug!(generation, "supervisor gone, skipping teardown");
        }
    }

    fn reconnecting(&self, error: Option<TransportError>) {
        if !self.is_current() {
            return;
        }
        self.shared.link.transition(
            self.generation,
            &[LinkState::Connected],
            LinkState::Reconnecting,
        );
        tracing::warn!(generation = self.generation, ?error, "hub connection lost, reconnecting");
        self.shared.sink.dispatch(BridgeEvent::Reconnecting(error));
    }

    fn reconnected(&self, connection_id: Option<String>) {
        if !self.is_current() {
            return;
        }
        self.shared.link.transition(
            self.generation,
            &[LinkState::Reconnecting],
            LinkState::Connected,
        );
        tracing::info!(generation = self.generation, ?connection_id, "hub connection resumed");
        self.shared
            .sink
            .dispatch(BridgeEvent::Reconnected(connection_id));
    }

    fn message(&self, envelope: Value) -> Result<(), HandlerError> {
        if !self.is_current() {
            return Ok(());
        }
        match InboundMessage::from_envelope(envelope, &self.type_key) {
            Ok(message) => {
                self.shared.sink.dispatch(BridgeEvent::Message(message));
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    generation = self.generation,
                    %error,
                    "hub message violates the message contract"
                );
                self.shared.report_fault(error.clone());
                Err(Box::new(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeError, EventSink};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use transport::testing::{MemoryConnection, MemoryHub};
    use transport::{ConnectionSpec, HubConnectionFactory};

    struct Fixture {
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<BridgeEvent>,
        faults: mpsc::UnboundedReceiver<BridgeError>,
        commands: mpsc::UnboundedReceiver<Command>,
        relay: EventRelay,
        conn: Arc<MemoryConnection>,
    }

    async fn fixture() -> Fixture {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (fault_tx, faults) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(event_tx);
        let shared = Arc::new(Shared::new(sink, fault_tx, CancellationToken::new()));

        let hub = MemoryHub::new();
        let handle = hub.build(ConnectionSpec::default()).unwrap();
        let relay = EventRelay::new(1, Arc::from("type"), Arc::clone(&shared), command_tx);
        relay.attach(handle.as_ref());
        shared.link.install(1, Arc::clone(&handle), Arc::from("type"));
        handle.start().await.unwrap();
        shared
            .link
            .transition(1, &[LinkState::Starting], LinkState::Connected);

        Fixture {
            shared,
            events,
            faults,
            commands,
            relay,
            conn: hub.latest().unwrap(),
        }
    }

    #[tokio::test]
    async fn lifecycle_callbacks_become_events() {
        let mut f = fixture().await;

        f.conn
            .trigger_reconnecting(Some(TransportError::Network("reset".into())));
        assert_eq!(f.shared.link.state(), LinkState::Reconnecting);
        f.conn.trigger_reconnected(Some("second".into()));
        assert_eq!(f.shared.link.state(), LinkState::Connected);
        f.conn.trigger_closed(None);
        assert_eq!(f.shared.link.state(), LinkState::Closed);

        assert_eq!(
            f.events.recv().await,
            Some(BridgeEvent::Reconnecting(Some(TransportError::Network(
                "reset".into()
            ))))
        );
        assert_eq!(
            f.events.recv().await,
            Some(BridgeEvent::Reconnected(Some("second".into())))
        );
        assert_eq!(f.events.recv().await, Some(BridgeEvent::Disconnected(None)));
        assert!(matches!(
            f.commands.recv().await,
            Some(Command::Closed { generation: 1 })
        ));
    }

    #[tokio::test]
    async fn broadcast_messages_are_validated() {
        let mut f = fixture().await;

        let results = f.conn.deliver("send", json!({"type": "Joined", "user": "ana"}));
        assert!(results[0].is_ok());
        let Some(BridgeEvent::Message(message)) = f.events.recv().await else {
            panic!("expected a message event");
        };
        assert_eq!(message.kind, "Joined");

        let results = f.conn.deliver("send", json!({"user": "ana"}));
        assert!(results[0].is_err());
        assert_eq!(
            f.faults.recv().await,
            Some(BridgeError::MissingTypeKey {
                type_key: "type".into()
            })
        );
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn muted_relay_is_silent() {
        let mut f = fixture().await;
        f.relay.mute();
        assert_eq!(f.relay.generation(), 1);

        f.conn.trigger_reconnecting(None);
        let results = f.conn.deliver("send", json!({}));
        f.conn.trigger_closed(None);

        assert!(results[0].is_ok());
        assert!(f.events.try_recv().is_err());
        assert!(f.faults.try_recv().is_err());
        assert!(f.commands.try_recv().is_err());
        assert_eq!(f.shared.link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn retired_generation_is_ignored() {
        let mut f = fixture().await;
        f.shared.link.retire();
        f.shared.link.clear();

        f.conn.trigger_reconnecting(None);
        f.conn.trigger_reconnected(None);
        let results = f.conn.deliver("send", json!({"type": "Late"}));

        assert!(results[0].is_ok());
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.shared.link.state(), LinkState::Absent);
    }
}

//! Owner of the bridge's single hub connection.
//!
//! The supervisor is an actor: connect, disconnect, teardown after a close
//! and shutdown are processed strictly one after another, so two connect
//! intents can never race to build independent connections.

use std::sync::Arc;

use config::HubOptions;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use transport::{ConnectionSpec, Endpoint, HubConnectionFactory, ReconnectPolicy};

use crate::{
    BridgeError, BridgeEvent, IntentReply, LinkState, context::Shared, relay::EventRelay,
};

pub(crate) type Reply = oneshot::Sender<Result<IntentReply, BridgeError>>;

pub(crate) enum Command {
    Connect {
        overrides: Option<HubOptions>,
        reply: Reply,
    },
    Disconnect {
        reply: Reply,
    },
    /// The connection of `generation` closed by itself
    Closed {
        generation: u64,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct Supervisor {
    options: HubOptions,
    factory: Arc<dyn HubConnectionFactory>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    relay: Option<EventRelay>,
    generation: u64,
}

impl Supervisor {
    pub(crate) fn new(
        options: HubOptions,
        factory: Arc<dyn HubConnectionFactory>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            options,
            factory,
            shared,
            commands,
            relay: None,
            generation: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("supervisor cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Connect { overrides, reply }) => {
                        self.connect(overrides).await;
                        let _ = reply.send(Ok(IntentReply::Done));
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.disconnect().await;
                        let _ = reply.send(Ok(IntentReply::Done));
                    }
                    Some(Command::Closed { generation }) => {
                        if self.shared.link.is_live(generation) {
                            tracing::debug!(generation, "tearing down closed connection");
                            self.teardown().await;
                        }
                    }
                    Some(Command::Shutdown { done }) => {
                        self.disconnect().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        tracing::debug!("command channel closed");
                        break;
                    }
                }
            }
        }
    }

    async fn connect(&mut self, overrides: Option<HubOptions>) {
        if self.shared.link.has_handle() {
            if let Some(relay) = self.relay.take() {
                tracing::debug!(generation = relay.generation(), "connection superseded");
                relay.mute();
            }
            self.teardown().await;
            self.shared.sink.dispatch(BridgeEvent::ConnectionSuperseded);
        }

        if let Some(overrides) = overrides {
            self.options = std::mem::take(&mut self.options).merged(overrides);
        }

        let spec = connection_spec(&self.options);
        let handle = match self.factory.build(spec) {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(%error, "could not build hub connection");
                self.shared.sink.dispatch(BridgeEvent::ConnectionError(error));
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let type_key: Arc<str> = Arc::from(self.options.type_key());

        let relay = EventRelay::new(
            generation,
            Arc::clone(&type_key),
            Arc::clone(&self.shared),
            self.commands.clone(),
        );
        relay.attach(handle.as_ref());
        self.shared
            .link
            .install(generation, Arc::clone(&handle), type_key);

        tracing::debug!(generation, url = ?self.options.url, "starting hub connection");
        match handle.start().await {
            Ok(()) => {
                self.relay = Some(relay);
                if self.shared.link.transition(
                    generation,
                    &[LinkState::Starting],
                    LinkState::Connected,
                ) {
                    tracing::info!(generation, "hub connection started");
                    self.shared.sink.dispatch(BridgeEvent::Connected);
                }
            }
            Err(error) => {
                tracing::warn!(generation, %error, "hub connection failed to start");
                relay.mute();
                self.shared.link.retire();
                self.shared.link.clear();
                self.shared.sink.dispatch(BridgeEvent::ConnectionError(error));
            }
        }
    }

    async fn disconnect(&mut self) {
        if !self.shared.link.has_handle() {
            tracing::debug!("disconnect without a connection");
            return;
        }
        tracing::info!(generation = self.generation, "disconnecting hub connection");
        self.teardown().await;
    }

    /// Dispose every stream, stop the connection and clear the link. Safe to
    /// call without a connection.
    ///
    /// The relay is muted only once `stop()` has returned, so the close it
    /// reports is still published.
    async fn teardown(&mut self) {
        let relay = self.relay.take();
        let Some(handle) = self.shared.link.retire() else {
            if let Some(relay) = relay {
                relay.mute();
            }
            self.shared.link.clear();
            return;
        };

        let disposed = self.shared.streams.dispose_all().await;
        tracing::debug!(generation = self.generation, disposed, "disposed streams");

        if let Err(error) = handle.stop().await {
            tracing::warn!(generation = self.generation, %error, "failed to stop hub connection");
        }
        if let Some(relay) = relay {
            relay.mute();
        }
        self.shared.link.clear();
    }
}

/// Build a [`ConnectionSpec`] from merged options
pub(crate) fn connection_spec(options: &HubOptions) -> ConnectionSpec {
    ConnectionSpec {
        endpoint: endpoint(options),
        base_url: options.base_url.clone(),
        reconnect: reconnect_policy(options),
        protocol: options.protocol,
        logging: options.logging,
        keep_alive_interval: options.keep_alive_interval(),
        server_timeout: options.server_timeout(),
    }
}

fn endpoint(options: &HubOptions) -> Endpoint {
    let Some(url) = options.url.clone() else {
        return Endpoint::None;
    };
    if let Some(http) = &options.http_connection_options {
        Endpoint::WithOptions {
            url,
            options: http.clone(),
        }
    } else if let Some(transport) = options.transport {
        Endpoint::WithTransport { url, transport }
    } else {
        Endpoint::Url(url)
    }
}

fn reconnect_policy(options: &HubOptions) -> Option<ReconnectPolicy> {
    if let Some(policy) = &options.reconnect_policy {
        Some(ReconnectPolicy::Custom(Arc::clone(policy)))
    } else if let Some(delays) = options.retry_delays() {
        Some(ReconnectPolicy::Delays(delays))
    } else if options.automatic_reconnect == Some(true) {
        Some(ReconnectPolicy::Default)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use transport::{DelaySequence, HttpConnectionOptions, TransportKind};

    #[test]
    fn endpoint_priority() {
        let options = HubOptions::default();
        assert_eq!(endpoint(&options), Endpoint::None);

        let options = options.with_url("wss://x");
        assert_eq!(endpoint(&options), Endpoint::Url("wss://x".into()));

        let options = options.with_transport(TransportKind::LongPolling);
        assert_eq!(
            endpoint(&options),
            Endpoint::WithTransport {
                url: "wss://x".into(),
                transport: TransportKind::LongPolling
            }
        );

        let http = HttpConnectionOptions {
            skip_negotiation: true,
            ..HttpConnectionOptions::default()
        };
        let options = options.with_http_connection_options(http.clone());
        assert_eq!(
            endpoint(&options),
            Endpoint::WithOptions {
                url: "wss://x".into(),
                options: http
            }
        );
    }

    #[test]
    fn transport_without_url_has_no_endpoint() {
        let options = HubOptions::default().with_transport(TransportKind::WebSockets);
        assert_eq!(endpoint(&options), Endpoint::None);
    }

    #[test]
    fn reconnect_priority() {
        let options = HubOptions::default();
        assert!(reconnect_policy(&options).is_none());

        let options = options.with_automatic_reconnect(false);
        assert!(reconnect_policy(&options).is_none());

        let options = options.with_automatic_reconnect(true);
        assert!(matches!(
            reconnect_policy(&options),
            Some(ReconnectPolicy::Default)
        ));

        let options = options.with_retry_delays(&[Duration::from_secs(1)]);
        assert!(matches!(
            reconnect_policy(&options),
            Some(ReconnectPolicy::Delays(delays)) if delays == vec![Duration::from_secs(1)]
        ));

        let options =
            options.with_reconnect_policy(Arc::new(DelaySequence::new([Duration::from_secs(9)])));
        assert!(matches!(
            reconnect_policy(&options),
            Some(ReconnectPolicy::Custom(_))
        ));
    }

    #[test]
    fn spec_carries_timing_settings() {
        let spec = connection_spec(&HubOptions::defaults().with_url("wss://x"));
        assert_eq!(spec.keep_alive_interval, Some(Duration::from_secs(15)));
        assert_eq!(spec.server_timeout, Some(Duration::from_secs(30)));
        assert!(matches!(spec.reconnect, Some(ReconnectPolicy::Default)));
        assert_eq!(
            spec.endpoint,
            Endpoint::WithTransport {
                url: "wss://x".into(),
                transport: TransportKind::WebSockets
            }
        );
    }
}

//! The bridge's view of its single connection.
//!
//! Only the supervisor installs and retires handles. Event relays may move
//! the state of the generation they were attached to, and only while that
//! generation still owns the handle.

use std::sync::Arc;

use tokio::sync::watch;
use transport::{HubConnection, HubConnectionState};

use crate::BridgeError;

/// Connection lifecycle as seen by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Starting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) generation: u64,
    pub(crate) state: LinkState,
    pub(crate) handle: Option<Arc<dyn HubConnection>>,
    pub(crate) type_key: Arc<str>,
}

impl Link {
    fn owned_by(&self, generation: u64) -> bool {
        self.generation == generation && self.handle.is_some()
    }
}

/// A connected handle, fetched for one network call
pub(crate) struct Ready {
    pub(crate) generation: u64,
    pub(crate) handle: Arc<dyn HubConnection>,
    pub(crate) type_key: Arc<str>,
}

#[derive(Clone)]
pub(crate) struct LinkCell {
    tx: Arc<watch::Sender<Link>>,
}

impl LinkCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Link {
            generation: 0,
            state: LinkState::Absent,
            handle: None,
            type_key: Arc::from(config::DEFAULT_TYPE_KEY),
        });
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn state(&self) -> LinkState {
        self.tx.borrow().state
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Link> {
        self.tx.subscribe()
    }

    pub(crate) fn has_handle(&self) -> bool {
        self.tx.borrow().handle.is_some()
    }

    /// Whether `generation` still owns a connected (or reconnecting) handle
    pub(crate) fn is_active(&self, generation: u64) -> bool {
        let link = self.tx.borrow();
        link.owned_by(generation)
            && matches!(link.state, LinkState::Connected | LinkState::Reconnecting)
    }

    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.tx.borrow().owned_by(generation)
    }

    /// The current handle, if both the bridge and the hub client consider it
    /// connected
    pub(crate) fn ready(&self) -> Result<Ready, BridgeError> {
        let link = self.tx.borrow();
        match &link.handle {
            Some(handle)
                if link.state == LinkState::Connected
                    && handle.state() == HubConnectionState::Connected =>
            {
                Ok(Ready {
                    generation: link.generation,
                    handle: Arc::clone(handle),
                    type_key: Arc::clone(&link.type_key),
                })
            }
            _ => Err(BridgeError::NotConnected),
        }
    }

    pub(crate) fn install(
        &self,
        generation: u64,
        handle: Arc<dyn HubConnection>,
        type_key: Arc<str>,
    ) {
        self.tx.send_modify(|link| {
            *link = Link {
                generation,
                state: LinkState::Starting,
                handle: Some(handle),
                type_key,
            };
        });
    }

    /// Move `generation` from one of `from` to `to`; returns whether it moved
    pub(crate) fn transition(&self, generation: u64, from: &[LinkState], to: LinkState) -> bool {
        self.tx.send_if_modified(|link| {
            if link.owned_by(generation) && from.contains(&link.state) {
                link.state = to;
                true
            } else {
                false
            }
        })
    }

    /// Mark the link closed and take its handle
    pub(crate) fn retire(&self) -> Option<Arc<dyn HubConnection>> {
        let mut retired = None;
        self.tx.send_modify(|link| {
            retired = link.handle.take();
            if retired.is_some() {
                link.state = LinkState::Closed;
            }
        });
        retired
    }

    pub(crate) fn clear(&self) {
        self.tx.send_if_modified(|link| {
            link.handle = None;
            if link.state == LinkState::Absent {
                return false;
            }
            link.state = LinkState::Absent;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::testing::MemoryHub;
    use transport::{ConnectionSpec, HubConnectionFactory};

    fn handle(hub: &MemoryHub) -> Arc<dyn HubConnection> {
        hub.build(ConnectionSpec::default()).unwrap()
    }

    #[tokio::test]
    async fn ready_needs_both_sides_connected() {
        let hub = MemoryHub::new();
        let cell = LinkCell::new();
        assert!(matches!(cell.ready(), Err(BridgeError::NotConnected)));

        let conn = handle(&hub);
        cell.install(1, Arc::clone(&conn), Arc::from("type"));
        assert!(cell.ready().is_err());

        assert!(cell.transition(1, &[LinkState::Starting], LinkState::Connected));
        // bridge says connected, hub client has not started
        assert!(cell.ready().is_err());

        conn.start().await.unwrap();
        let ready = cell.ready().unwrap();
        assert_eq!(ready.generation, 1);
        assert_eq!(&*ready.type_key, "type");
    }

    #[test]
    fn stale_generations_cannot_move_the_state() {
        let hub = MemoryHub::new();
        let cell = LinkCell::new();
        cell.install(2, handle(&hub), Arc::from("type"));

        assert!(!cell.transition(1, &[LinkState::Starting], LinkState::Connected));
        assert_eq!(cell.state(), LinkState::Starting);
        assert!(!cell.is_live(1));
        assert!(cell.is_live(2));
    }

    #[test]
    fn retire_then_clear() {
        let hub = MemoryHub::new();
        let cell = LinkCell::new();
        cell.install(1, handle(&hub), Arc::from("type"));
        cell.transition(1, &[LinkState::Starting], LinkState::Connected);

        assert!(cell.retire().is_some());
        assert_eq!(cell.state(), LinkState::Closed);
        assert!(!cell.is_active(1));
        assert!(cell.retire().is_none());

        cell.clear();
        assert_eq!(cell.state(), LinkState::Absent);
        assert!(!cell.has_handle());
    }
}

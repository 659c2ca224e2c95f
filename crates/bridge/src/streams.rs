//! Tracking and relaying of server streams.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use transport::{Disposer, TransportError};

use crate::{BridgeEvent, InboundMessage, context::Shared};

/// Identifies one stream opened through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

struct Tracked {
    disposer: Disposer,
    cancel: CancellationToken,
}

impl Tracked {
    fn dispose(self) {
        self.cancel.cancel();
        self.disposer.dispose();
    }
}

/// Open streams, each with the disposer that cancels it on the server.
///
/// An entry leaves the registry exactly once, either released (the stream
/// finished by itself) or disposed, so no disposer runs twice.
#[derive(Default)]
pub(crate) struct StreamRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<StreamId, Tracked>>,
}

impl StreamRegistry {
    pub(crate) fn next_id(&self) -> StreamId {
        StreamId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) async fn track(&self, id: StreamId, disposer: Disposer, cancel: CancellationToken) {
        self.entries
            .lock()
            .await
            .insert(id, Tracked { disposer, cancel });
    }

    /// Forget a stream that finished by itself; returns whether it was tracked
    pub(crate) async fn release(&self, id: StreamId) -> bool {
        self.entries.lock().await.remove(&id).is_some()
    }

    /// Cancel one stream; returns whether it was tracked
    pub(crate) async fn dispose(&self, id: StreamId) -> bool {
        let tracked = self.entries.lock().await.remove(&id);
        match tracked {
            Some(tracked) => {
                tracked.dispose();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked stream; returns how many there were
    pub(crate) async fn dispose_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (id, tracked) in drained {
            tracing::debug!(stream = %id, "disposing stream");
            tracked.dispose();
        }
        count
    }

    /// [`Self::dispose_all`] for callers that cannot wait; `None` if the
    /// registry is busy
    pub(crate) fn try_dispose_all(&self) -> Option<usize> {
        let drained: Vec<_> = self.entries.try_lock().ok()?.drain().collect();
        let count = drained.len();
        for (_, tracked) in drained {
            tracked.dispose();
        }
        Some(count)
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Forward the items of one stream to the bus until it ends, fails, breaks
/// the message contract, or is cancelled.
pub(crate) async fn relay_stream(
    id: StreamId,
    mut items: BoxStream<'static, Result<Value, TransportError>>,
    cancel: CancellationToken,
    type_key: Arc<str>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(stream = %id, "stream relay cancelled");
                break;
            }
            item = items.next() => match item {
                Some(Ok(value)) => match InboundMessage::from_envelope(value, &type_key) {
                    Ok(message) => shared.sink.dispatch(BridgeEvent::Message(message)),
                    Err(error) => {
                        tracing::error!(stream = %id, %error, "stream item violates the message contract");
                        shared.report_fault(error);
                        shared.streams.dispose(id).await;
                        break;
                    }
                },
                Some(Err(error)) => {
                    if shared.streams.release(id).await {
                        tracing::debug!(stream = %id, %error, "stream failed");
                        shared.sink.dispatch(BridgeEvent::StreamError { stream: id, error });
                    }
                    break;
                }
                None => {
                    if shared.streams.release(id).await {
                        tracing::debug!(stream = %id, "stream completed");
                        shared.sink.dispatch(BridgeEvent::StreamCompleted { stream: id });
                    }
                    break;
                }
            }
        }
    }
}

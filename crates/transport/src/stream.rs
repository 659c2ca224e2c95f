use std::fmt;

use futures::stream::BoxStream;
use serde_json::Value;

use crate::TransportError;

/// Cancels a server stream.
///
/// A disposer runs at most once: [`Disposer::dispose`] consumes it, and
/// dropping an unused disposer does nothing.
pub struct Disposer(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Disposer {
    pub fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(dispose)))
    }

    /// A disposer with nothing to cancel
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn dispose(mut self) {
        if let Some(dispose) = self.0.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.0.is_some())
            .finish()
    }
}

/// Items pushed by the server for one streamed invocation.
///
/// The item stream ending is natural completion; an `Err` item is the stream
/// failing, after which no further items are expected.
pub struct HubStream {
    pub items: BoxStream<'static, Result<Value, TransportError>>,
    pub disposer: Disposer,
}

impl HubStream {
    pub fn new(items: BoxStream<'static, Result<Value, TransportError>>, disposer: Disposer) -> Self {
        Self { items, disposer }
    }

    pub fn into_parts(self) -> (BoxStream<'static, Result<Value, TransportError>>, Disposer) {
        (self.items, self.disposer)
    }
}

impl fmt::Debug for HubStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubStream")
            .field("disposer", &self.disposer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn disposer_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let disposer = Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        disposer.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_disposer_does_not_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        drop(Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

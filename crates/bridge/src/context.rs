use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{BridgeError, EventSink, link::LinkCell, streams::StreamRegistry};

/// State shared by the supervisor, the intent workers and the relays
pub(crate) struct Shared {
    pub(crate) link: LinkCell,
    pub(crate) streams: StreamRegistry,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) cancel: CancellationToken,
    faults: mpsc::UnboundedSender<BridgeError>,
}

impl Shared {
    pub(crate) fn new(
        sink: Arc<dyn EventSink>,
        faults: mpsc::UnboundedSender<BridgeError>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link: LinkCell::new(),
            streams: StreamRegistry::default(),
            sink,
            cancel,
            faults,
        }
    }

    /// Raise a protocol violation on the fault channel
    pub(crate) fn report_fault(&self, error: BridgeError) {
        if self.faults.send(error).is_err() {
            tracing::debug!("fault receiver dropped");
        }
    }
}

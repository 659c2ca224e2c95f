//! Error types for the bridge.

use transport::TransportError;

/// Errors returned for an intent, or raised on the fault channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The intent needs a connected hub and there is none.
    #[error("you must connect to the hub before sending any data")]
    NotConnected,

    /// An inbound message or stream item lacks the configured discriminator.
    ///
    /// This is a broken server contract, never an ordinary data error.
    #[error("property {type_key} is missing on the hub message")]
    MissingTypeKey {
        /// The configured type key.
        type_key: String,
    },

    /// The hub client rejected the call.
    #[error("hub method {method} failed")]
    Transport {
        method: String,
        #[source]
        source: TransportError,
    },

    /// The bridge stopped before the intent was processed.
    #[error("hub bridge has shut down")]
    Shutdown,
}

impl BridgeError {
    /// Map a rejection from the hub client, folding "connection gone"
    /// rejections into [`BridgeError::NotConnected`].
    pub(crate) fn from_transport(method: &str, error: TransportError) -> Self {
        if error.is_disconnect() {
            Self::NotConnected
        } else {
            Self::Transport {
                method: method.to_string(),
                source: error,
            }
        }
    }

    /// Whether the error signals a server breaking the message contract.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::MissingTypeKey { .. })
    }
}

//! Error types for the transport layer.

/// Errors reported by a hub connection.
///
/// Errors are carried inside bus events, so they are cheap to clone and
/// compare rather than wrapping I/O sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is not in a state that accepts the operation.
    #[error("connection is not in the connected state")]
    NotConnected,

    /// The underlying network failed (negotiation, socket, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected or failed a hub method.
    #[error("hub method {method} failed: {message}")]
    Hub {
        /// The hub method that was called.
        method: String,
        /// The server supplied error message.
        message: String,
    },

    /// The connection was closed while the operation was outstanding.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The connection could not be built from the supplied settings.
    #[error("invalid connection configuration: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Whether the error means the connection is gone rather than the call failed.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_class_errors() {
        assert!(TransportError::NotConnected.is_disconnect());
        assert!(TransportError::Closed("stopped".into()).is_disconnect());
        assert!(!TransportError::Network("reset".into()).is_disconnect());
        assert!(
            !TransportError::Hub {
                method: "Join".into(),
                message: "denied".into()
            }
            .is_disconnect()
        );
    }

    #[test]
    fn hub_error_message_names_method() {
        let err = TransportError::Hub {
            method: "Join".into(),
            message: "denied".into(),
        };
        assert_eq!(err.to_string(), "hub method Join failed: denied");
    }
}

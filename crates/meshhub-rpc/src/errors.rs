//! Error types for outbound calls and inbound dispatch.

/// Failure of an outbound call issued through a channel handle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The channel was torn down before a reply arrived.
    #[error("channel closed")]
    Closed,

    /// The call exceeded its time bound. The remote operation is not
    /// cancelled; its eventual reply is discarded.
    #[error("call timed out")]
    TimedOut,

    /// The remote side answered with an application error.
    #[error("{0}")]
    Remote(String),
}

/// Error returned by an inbound method handler, surfaced to the remote
/// caller as the reply's error message.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required argument missing or of the wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// No handler registered under the requested name.
    #[error("method \"{method}\" not found")]
    MethodNotFound {
        /// The requested method name.
        method: String,
    },

    /// The target peer id is not connected.
    #[error("unknown client \"{id}\"")]
    UnknownClient {
        /// The requested peer id.
        id: String,
    },

    /// Unexpected internal failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Convenience constructor for missing/invalid arguments.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}

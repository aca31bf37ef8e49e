//! RPC wire frames — the multiplexed call/reply protocol unit.
//!
//! Frames travel as JSON inside length-delimited chunks on the duplex
//! stream. Every call carries a correlation id that the matching reply
//! echoes back, so any number of calls may be outstanding at once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single protocol frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    /// An outbound method invocation.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Correlation id, unique per channel direction.
        id: u64,
        /// Method name (e.g. `setPeerId`).
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// The response to a previous call with the same `id`.
    #[serde(rename_all = "camelCase")]
    Reply {
        /// Correlation id echoed from the call.
        id: u64,
        /// Result value (present on success).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error message (present on failure).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    /// The correlation id of this frame.
    pub fn id(&self) -> u64 {
        match self {
            Self::Call { id, .. } | Self::Reply { id, .. } => *id,
        }
    }

    /// Build a success reply for a call id.
    pub fn reply_ok(id: u64, result: Value) -> Self {
        Self::Reply {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error reply for a call id.
    pub fn reply_err(id: u64, message: impl Into<String>) -> Self {
        Self::Reply {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

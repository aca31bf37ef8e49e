//! Concurrent, independently timeout-bounded call fan-out.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use meshhub_core::state::TIMEOUT_SENTINEL;
use meshhub_rpc::CallError;

use crate::registry::ConnectionRegistry;

/// Result of one timeout-raced remote call.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// The remote answered in time.
    Reply(Value),
    /// The remote (or the transport) answered with an error.
    Error(String),
    /// The per-call timer won the race. The remote operation is not
    /// cancelled; its late reply is discarded.
    TimedOut,
}

impl CallOutcome {
    /// Classify a raced call result.
    pub fn from_call(result: Result<Value, CallError>) -> Self {
        match result {
            Ok(value) => Self::Reply(value),
            Err(CallError::TimedOut) => Self::TimedOut,
            Err(err) => Self::Error(err.to_string()),
        }
    }

    /// Wire shape: the reply value, the error message, or the timeout
    /// sentinel string.
    pub fn into_value(self) -> Value {
        match self {
            Self::Reply(value) => value,
            Self::Error(message) => Value::String(message),
            Self::TimedOut => Value::String(TIMEOUT_SENTINEL.to_owned()),
        }
    }

    /// Whether this outcome is the timeout sentinel.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Fans calls out to every live session, each raced against its own timer.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over the given registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Invoke `method` on every currently live session concurrently.
    ///
    /// Each invocation is bounded by its own `per_call_timeout`; one
    /// session timing out or failing yields an outcome for that session
    /// only. The dispatcher settles once every race has settled, so its
    /// wall-clock bound is the maximum of the per-call timeouts. No
    /// separate overall deadline exists.
    pub async fn broadcast(
        &self,
        method: &str,
        args: Vec<Value>,
        per_call_timeout: Duration,
    ) -> Vec<(String, CallOutcome)> {
        let sessions = self.registry.all();
        info!(method, targets = sessions.len(), "broadcasting");

        let calls = sessions.into_iter().map(|session| {
            let args = args.clone();
            async move {
                let outcome = CallOutcome::from_call(
                    session.rpc().call_with_timeout(method, args, per_call_timeout).await,
                );
                (session.label(), outcome)
            }
        });
        join_all(calls).await
    }

    /// Invoke `method` on one session, raced against `timeout`.
    ///
    /// An unknown peer id yields an explicit unknown-client error outcome.
    pub async fn send_to(
        &self,
        peer_id: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> CallOutcome {
        let Some(session) = self.registry.lookup(peer_id) else {
            warn!(peer_id, method, "direct call to unknown client");
            return CallOutcome::Error(format!("unknown client \"{peer_id}\""));
        };
        info!(peer_id, method, "forwarding direct call");
        CallOutcome::from_call(session.rpc().call_with_timeout(method, args, timeout).await)
    }
}

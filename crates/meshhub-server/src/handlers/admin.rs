//! Privileged RPC methods for the admin channel.
//!
//! Reachability of the secret admin path is the only access control
//! (capability-style, see `secret`); every method here trusts the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use meshhub_rpc::{MethodHandler, MethodRegistry, RpcError};

use super::{array_arg, str_arg};
use crate::dispatch::BroadcastDispatcher;
use crate::service::HubService;

/// Handler context for a privileged admin session.
pub struct AdminCtx {
    /// The owning service.
    pub service: Arc<HubService>,
    /// Dispatcher over the service's live sessions.
    pub dispatcher: BroadcastDispatcher,
}

/// Build the admin method table.
pub fn methods() -> MethodRegistry<AdminCtx> {
    let mut registry = MethodRegistry::new();
    registry.register("ping", PingHandler);
    registry.register("getPeerCount", GetPeerCountHandler);
    registry.register("getNetworkState", GetNetworkStateHandler);
    registry.register("sendToClient", SendToClientHandler);
    registry.register("send", SendHandler);
    registry.register("refresh", BroadcastFixedHandler { method: "refresh" });
    registry.register(
        "refreshShortDelay",
        BroadcastFixedHandler {
            method: "refreshShortDelay",
        },
    );
    registry.register(
        "refreshLongDelay",
        BroadcastFixedHandler {
            method: "refreshLongDelay",
        },
    );
    registry
}

fn broadcast_results_value(results: Vec<(String, crate::dispatch::CallOutcome)>) -> Value {
    Value::Array(
        results
            .into_iter()
            .map(|(id, outcome)| json!({ "id": id, "result": outcome.into_value() }))
            .collect(),
    )
}

/// Returns the fixed liveness token.
struct PingHandler;

#[async_trait]
impl MethodHandler<AdminCtx> for PingHandler {
    async fn handle(&self, _args: Vec<Value>, _ctx: &AdminCtx) -> Result<Value, RpcError> {
        Ok(json!("pong"))
    }
}

/// Number of connected sessions.
struct GetPeerCountHandler;

#[async_trait]
impl MethodHandler<AdminCtx> for GetPeerCountHandler {
    async fn handle(&self, _args: Vec<Value>, ctx: &AdminCtx) -> Result<Value, RpcError> {
        Ok(json!(ctx.service.peer_count()))
    }
}

/// Snapshot of the full topology map.
struct GetNetworkStateHandler;

#[async_trait]
impl MethodHandler<AdminCtx> for GetNetworkStateHandler {
    async fn handle(&self, _args: Vec<Value>, ctx: &AdminCtx) -> Result<Value, RpcError> {
        serde_json::to_value(ctx.service.network_state()).map_err(|e| RpcError::Internal {
            message: e.to_string(),
        })
    }
}

/// Forward a call to one client: `sendToClient(clientId, method, args)`.
///
/// An unknown client id yields the explicit unknown-client message as the
/// result value, mirroring broadcast's per-session outcome shape.
struct SendToClientHandler;

#[async_trait]
impl MethodHandler<AdminCtx> for SendToClientHandler {
    async fn handle(&self, args: Vec<Value>, ctx: &AdminCtx) -> Result<Value, RpcError> {
        let client_id = str_arg(&args, 0, "clientId")?;
        let method = str_arg(&args, 1, "method")?;
        let call_args = array_arg(&args, 2)?;
        info!(client_id, method, "admin direct call");
        let outcome = ctx
            .dispatcher
            .send_to(&client_id, &method, call_args, ctx.service.config().call_timeout())
            .await;
        Ok(outcome.into_value())
    }
}

/// Broadcast an arbitrary call: `send(method, args)`.
struct SendHandler;

#[async_trait]
impl MethodHandler<AdminCtx> for SendHandler {
    async fn handle(&self, args: Vec<Value>, ctx: &AdminCtx) -> Result<Value, RpcError> {
        let method = str_arg(&args, 0, "method")?;
        let call_args = array_arg(&args, 1)?;
        info!(method, "admin broadcast");
        let results = ctx
            .dispatcher
            .broadcast(&method, call_args, ctx.service.config().call_timeout())
            .await;
        Ok(broadcast_results_value(results))
    }
}

/// Broadcast one of the fixed restart/refresh client methods; the delay
/// window of the short/long variants is interpreted client-side.
struct BroadcastFixedHandler {
    method: &'static str,
}

#[async_trait]
impl MethodHandler<AdminCtx> for BroadcastFixedHandler {
    async fn handle(&self, _args: Vec<Value>, ctx: &AdminCtx) -> Result<Value, RpcError> {
        info!(method = self.method, "admin broadcast");
        let results = ctx
            .dispatcher
            .broadcast(self.method, Vec::new(), ctx.service.config().call_timeout())
            .await;
        Ok(broadcast_results_value(results))
    }
}

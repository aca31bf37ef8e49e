//! RPC methods the hub exposes to ordinary nodes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use meshhub_core::PeerReport;
use meshhub_rpc::{MethodHandler, MethodRegistry, RpcError};

use super::str_arg;
use crate::service::HubService;
use crate::session::PeerSession;

/// Per-connection handler context for an ordinary node.
pub struct ClientCtx {
    /// The owning service.
    pub service: Arc<HubService>,
    /// This connection's session.
    pub session: Arc<PeerSession>,
}

/// Build the client method table.
pub fn methods() -> MethodRegistry<ClientCtx> {
    let mut registry = MethodRegistry::new();
    registry.register("ping", PingHandler);
    registry.register("setPeerId", SetPeerIdHandler);
    registry.register("submitNetworkState", SubmitNetworkStateHandler);
    registry.register("disconnect", DisconnectHandler);
    registry
}

/// Returns the fixed liveness token.
struct PingHandler;

#[async_trait]
impl MethodHandler<ClientCtx> for PingHandler {
    async fn handle(&self, _args: Vec<Value>, ctx: &ClientCtx) -> Result<Value, RpcError> {
        ctx.session.touch();
        Ok(json!("pong"))
    }
}

/// Binds this session's peer identity (last-write-wins).
struct SetPeerIdHandler;

#[async_trait]
impl MethodHandler<ClientCtx> for SetPeerIdHandler {
    async fn handle(&self, args: Vec<Value>, ctx: &ClientCtx) -> Result<Value, RpcError> {
        let peer_id = str_arg(&args, 0, "peerId")?;
        ctx.service.identify(&ctx.session, &peer_id);
        Ok(json!("ok"))
    }
}

/// Replaces this peer's entry in the network-state store.
///
/// Reports arriving before `setPeerId` are silently dropped.
struct SubmitNetworkStateHandler;

#[async_trait]
impl MethodHandler<ClientCtx> for SubmitNetworkStateHandler {
    async fn handle(&self, args: Vec<Value>, ctx: &ClientCtx) -> Result<Value, RpcError> {
        let Some(raw) = args.into_iter().next() else {
            return Err(RpcError::invalid_params("missing report argument"));
        };
        let report: PeerReport = serde_json::from_value(raw)
            .map_err(|e| RpcError::invalid_params(format!("malformed report: {e}")))?;
        let _ = ctx.service.submit_report(&ctx.session, report);
        Ok(Value::Null)
    }
}

/// Voluntary session teardown.
struct DisconnectHandler;

#[async_trait]
impl MethodHandler<ClientCtx> for DisconnectHandler {
    async fn handle(&self, _args: Vec<Value>, ctx: &ClientCtx) -> Result<Value, RpcError> {
        info!(label = %ctx.session.label(), "client sent disconnect request");
        ctx.service.evict(&ctx.session, "disconnect requested");
        Ok(Value::Null)
    }
}

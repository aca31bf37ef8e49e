//! RPC method tables for the two session roles.

pub mod admin;
pub mod client;

use serde_json::Value;

use meshhub_rpc::RpcError;

/// Extract a required string argument.
pub(crate) fn str_arg(args: &[Value], index: usize, name: &str) -> Result<String, RpcError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            RpcError::invalid_params(format!("argument {index} ({name}) must be a string"))
        })
}

/// Extract an optional argument-list argument (absent or null means empty).
pub(crate) fn array_arg(args: &[Value], index: usize) -> Result<Vec<Value>, RpcError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(RpcError::invalid_params(format!(
            "argument {index} must be an array"
        ))),
    }
}

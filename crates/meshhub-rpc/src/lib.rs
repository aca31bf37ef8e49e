//! # meshhub-rpc
//!
//! Bidirectional, multiplexed RPC over one duplex byte stream:
//!
//! - `RpcChannel` pairs a cloneable [`channel::ChannelHandle`] for outbound
//!   calls with a [`channel::ChannelDriver`] that pumps frames and
//!   dispatches inbound calls through a [`registry::MethodRegistry`]
//! - Any number of calls may be outstanding at once, matched by
//!   correlation id regardless of reply order
//! - Channel closure rejects every pending call with a transport error

#![deny(unsafe_code)]

pub mod channel;
pub mod errors;
pub mod registry;

pub use channel::{ChannelHandle, RpcChannel};
pub use errors::{CallError, RpcError};
pub use registry::{MethodHandler, MethodRegistry};

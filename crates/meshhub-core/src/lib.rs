//! # meshhub-core
//!
//! Foundation types shared by every meshhub crate:
//!
//! - **Wire frames**: the correlation-id call/reply protocol unit
//! - **Network state**: per-peer connectivity reports and the hub-wide map
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod frame;
pub mod logging;
pub mod state;

pub use frame::Frame;
pub use state::{NetworkState, PeerReport, RttSample};

//! Multiplexed JSON-RPC dispatcher over a single duplex stream.
//!
//! One connection carries every concurrent call. Frames are newline-delimited
//! JSON and each response is routed back to its caller by the request `id`,
//! so replies may arrive in any order.

use tokio_util::codec::LinesCodec;

pub mod client;
pub mod server;

pub use client::RpcClient;
pub use server::{dispatch, serve_connection, serve_plugin};

/// Upper bound on one frame, which bounds a base64-encoded body.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub(crate) fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_BYTES)
}

//! Out-of-process HTTP handler plugins.
//!
//! A plugin is an independently built executable. The host starts it, reads a
//! handshake line from its stdout, connects to the loopback address it
//! announced and from then on drives it with `Serve` and `SetConfig` calls.
//!
//! - `process`: spawning, handshake, termination
//! - `client`: typed handle combining a process with its RPC channel
//! - `registry`: every plugin of one host, by name
//! - `handler`: the trait a plugin executable implements

pub mod client;
pub mod handler;
pub mod process;
pub mod registry;

pub use client::HandlerClient;
pub use handler::{Handler, PassThroughHandler};
pub use process::{PluginProcess, Timeouts};
pub use registry::PluginRegistry;

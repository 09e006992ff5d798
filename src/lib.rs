pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod plugin;
pub mod protocol;
pub mod rpc;
pub mod signal;
pub mod static_files;

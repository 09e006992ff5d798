use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use http_handler_plugin::error::PluginError;
use http_handler_plugin::protocol::HandshakeConfig;
use http_handler_plugin::rpc::serve_plugin;
use http_handler_plugin::static_files::{DirFs, StaticFileResolver};

#[derive(Parser, Debug)]
#[command(name = "static-plugin")]
#[command(about = "Handler plugin serving static files; started by a plugin host", long_about = None)]
struct Args {
    /// Directory served until the host configures a `root`
    #[arg(long, value_name = "DIR", default_value = "dist")]
    root: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout carries the handshake line, so logs go to stderr.
    let log_level = if args.debug { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match format!("http_handler_plugin={log_level}").parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log directive: {e}"),
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let resolver = StaticFileResolver::new(Arc::new(DirFs::new(args.root)));

    match serve_plugin(resolver, &HandshakeConfig::default()).await {
        Ok(()) => {}
        Err(e @ PluginError::MissingMagicCookie { .. }) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Plugin failed: {}", e);
            std::process::exit(1);
        }
    }
}

//! s4 server node.
//!
//! Usage:
//!     s4-server [--conf ~/.s4.conf] [--data-root s4_data]
//!
//! The conf file lists every cluster member as `address:port`, one per
//! line, identical on every node. This node serves on the port of the
//! entry naming a local address.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use s4_protocol::{ClusterConfig, Settings};
use s4_server::node::{self, Node};
use s4_server::{gc, http};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "s4-server", about = "s4 storage and compute node")]
struct Args {
    /// Cluster conf file, one address:port per line.
    #[arg(long, env = "S4_CONF_PATH")]
    conf: Option<PathBuf>,

    /// Blob storage root.
    #[arg(long, default_value = "s4_data")]
    data_root: PathBuf,

    /// Mirror the full log filter to stderr.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    s4_logging::init_logging("s4-server", args.verbose)?;

    node::preflight(node::REQUIRED_COMMANDS)?;

    let config = match &args.conf {
        Some(path) => ClusterConfig::from_path(path)?,
        None => ClusterConfig::load()?,
    };
    let settings = Settings::from_env()?;
    let port = config.http_port()?;
    let node: Arc<Node> = Node::new(config, settings, args.data_root)?;

    gc::spawn(Arc::clone(&node));

    info!("starting s4 server on port: {}", port);
    http::serve(node, port).await
}

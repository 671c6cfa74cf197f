//! One-shot TCP sender: copy stdin to `<host>:<port>` until EOF.
//!
//! Counterpart of `recv`. No framing; the connection close is the end
//! of stream.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "send", about = "Copy stdin to a TCP connection")]
struct Args {
    host: String,
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let mut socket = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    let mut stdin = tokio::io::stdin();
    tokio::io::copy(&mut stdin, &mut socket)
        .await
        .context("copy to socket failed")?;
    socket.shutdown().await.context("socket shutdown failed")?;
    Ok(())
}

//! One-shot TCP receiver: accept a single connection on `<port>` and
//! copy it to stdout until the peer closes.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "recv", about = "Accept one TCP connection and copy it to stdout")]
struct Args {
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    let (mut socket, _peer) = listener.accept().await.context("accept failed")?;
    drop(listener);
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut socket, &mut stdout)
        .await
        .context("copy from socket failed")?;
    stdout.flush().await?;
    Ok(())
}

//! In-process cluster client.
//!
//! The map operators push their outputs to whatever server owns each
//! output key. That copy speaks the normal wire protocol (prepare over
//! HTTP, raw bytes over TCP, confirm over HTTP) but hashes in-line
//! instead of forking a hasher; the digest format is unchanged.

use std::path::Path;

use s4_protocol::{ClusterConfig, CmdOutput, Result, S4Error};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Client onto the whole cluster, cheap to clone per task.
#[derive(Clone)]
pub struct ClusterClient {
    config: ClusterConfig,
    http: reqwest::Client,
    timeout: std::time::Duration,
}

impl ClusterClient {
    pub fn new(config: ClusterConfig, http: reqwest::Client, timeout: std::time::Duration) -> Self {
        Self {
            config,
            http,
            timeout,
        }
    }

    /// Copy a local file to a key via the put protocol.
    pub async fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        let owner = self.config.owner(key)?.clone();
        debug!("put {} -> {} (owner {})", local.display(), key, owner);

        let resp = self
            .http
            .post(format!("http://{}/prepare_put", owner))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(request_error)?;
        let resp = check_status(resp).await?;
        let (uuid, port): (String, u16) = resp
            .json()
            .await
            .map_err(|e| S4Error::internal(format!("bad prepare_put response: {}", e)))?;

        let digest = self.stream_file(local, &owner.host, port).await?;

        let resp = self
            .http
            .post(format!("http://{}/confirm_put", owner))
            .query(&[("uuid", uuid.as_str()), ("checksum", digest.as_str())])
            .send()
            .await
            .map_err(request_error)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn stream_file(&self, local: &Path, host: &str, port: u16) -> Result<String> {
        let connect = TcpStream::connect((host, port));
        let mut socket = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| {
                S4Error::internal(format!("timeout connecting to {}:{}", host, port))
            })??;
        let mut file = tokio::fs::File::open(local).await?;
        let (_, digest) = s4_xfer::copy_and_hash(&mut file, &mut socket).await?;
        socket.shutdown().await?;
        Ok(digest)
    }
}

fn request_error(e: reqwest::Error) -> S4Error {
    S4Error::internal(format!("cluster request failed: {}", e))
}

/// Translate a peer's HTTP status back into the error it meant.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status().as_u16();
    match status {
        200 => Ok(resp),
        409 => Err(S4Error::conflict(peer_detail(resp).await)),
        404 => Err(S4Error::not_found(peer_detail(resp).await)),
        429 => Err(S4Error::Overloaded(peer_detail(resp).await)),
        400 => {
            let out = resp.json::<CmdOutput>().await.unwrap_or_default();
            Err(S4Error::UserCommand(out))
        }
        500 => {
            let out = resp.json::<CmdOutput>().await.unwrap_or_default();
            Err(S4Error::Integrity(out))
        }
        code => Err(S4Error::internal(format!(
            "unexpected status {} from peer",
            code
        ))),
    }
}

async fn peer_detail(resp: reqwest::Response) -> String {
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    if body.is_empty() {
        url
    } else {
        format!("{}: {}", url, body)
    }
}

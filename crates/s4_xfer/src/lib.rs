//! Streaming xxh3 hashing used by the side-channel copiers and the
//! in-process client.
//!
//! The digest format is the 16-hex-digit lowercase xxh3_64 of the byte
//! stream, identical on every sidecar in the cluster. Changing it would
//! orphan existing blobs.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Hex form of an xxh3_64 value.
pub fn format_digest(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Digest of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    format_digest(xxh3_64(data))
}

/// Copy `reader` to `writer` until EOF, hashing in-line. Returns the
/// byte count and hex digest. The writer is flushed, not shut down.
pub async fn copy_and_hash<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<(u64, String)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok((total, format_digest(hasher.digest())))
}

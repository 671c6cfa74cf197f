//! The two-phase prepare/confirm transfer protocol.
//!
//! Put: reserve the slot (empty sidecar) on solo, pick a port, submit
//! the receiver pipeline to io, and hand `(uuid, port)` back once the
//! io pool actually starts it. The client streams raw bytes to the
//! port, then confirms with its own digest; commit happens only when
//! the copier exited clean and both digests agree.
//!
//! Get is symmetric, with the sidecar digest captured at prepare time
//! and a three-way digest comparison at confirm.
//!
//! Every failure path releases what prepare reserved; anything a
//! vanished client leaves behind is reaped by the GC.

use std::sync::Arc;
use std::time::Instant;

use s4_protocol::{keys, CmdOutput, Result, S4Error};
use tracing::info;

use crate::node::{IoJob, JobKind, Node};
use crate::shell;
use crate::storage;

/// Handle `POST /prepare_put?key=`.
pub async fn prepare_put(node: &Arc<Node>, key: &str) -> Result<(String, u16)> {
    keys::validate_blob_key(key)?;
    node.assert_owner(key)?;
    let blob = node.abs_blob_path(key)?;

    {
        let blob = blob.clone();
        node.pools
            .solo
            .run_blocking(move || storage::reserve_slot(&blob))
            .await??;
    }

    match prepare_put_reserved(node, &blob).await {
        Ok(ok) => {
            info!("prepare_put {} -> port {}", key, ok.1);
            Ok(ok)
        }
        Err(e) => {
            let blob = blob.clone();
            let _ = node
                .pools
                .solo
                .run_blocking(move || storage::release_slot(&blob, None))
                .await;
            Err(e)
        }
    }
}

async fn prepare_put_reserved(
    node: &Arc<Node>,
    blob: &std::path::Path,
) -> Result<(String, u16)> {
    let temp = storage::new_temp_file_path(&node.data_root);
    let port = node.allocate_port()?;

    let cmd = format!("recv {} | xxh3 --stream > {}", port, temp.display());
    let deadline = node.settings.max_timeout();
    let (handle, gate) = node
        .pools
        .io
        .submit(async move { shell::run(&cmd, None, Some(deadline)).await });

    let uuid = match node.new_job_id() {
        Ok(uuid) => uuid,
        Err(e) => {
            handle.abort();
            node.release_port(port);
            return Err(e);
        }
    };
    node.insert_job(
        uuid.clone(),
        IoJob {
            kind: JobKind::Put,
            started_at: Instant::now(),
            handle,
            blob_path: Some(blob.to_path_buf()),
            temp_path: Some(temp.clone()),
            disk_checksum: None,
            port: Some(port),
        },
    );

    match gate.wait(node.settings.timeout).await {
        Ok(()) => Ok((uuid, port)),
        Err(e) => {
            if let Some(job) = node.take_job(&uuid) {
                job.handle.abort();
            }
            node.release_port(port);
            let _ = node
                .pools
                .solo
                .run_blocking(move || storage::remove_file_quiet(&temp))
                .await;
            Err(e)
        }
    }
}

/// Handle `POST /confirm_put?uuid=&checksum=`.
pub async fn confirm_put(node: &Arc<Node>, uuid: &str, client_checksum: &str) -> Result<()> {
    let job = node
        .take_job(uuid)
        .ok_or_else(|| S4Error::not_found(format!("no such transfer: {}", uuid)))?;
    if let Some(port) = job.port {
        node.release_port(port);
    }
    let blob = job
        .blob_path
        .clone()
        .ok_or_else(|| S4Error::internal("put job without a blob path"))?;
    let temp = job
        .temp_path
        .clone()
        .ok_or_else(|| S4Error::internal("put job without a temp path"))?;

    let committed = commit_put(node, job, &blob, &temp, client_checksum).await;
    if committed.is_err() {
        let blob = blob.clone();
        let _ = node
            .pools
            .solo
            .run_blocking(move || {
                storage::delete_blob(&blob);
                storage::remove_file_quiet(&temp);
            })
            .await;
    }
    committed
}

async fn commit_put(
    node: &Arc<Node>,
    job: IoJob,
    blob: &std::path::Path,
    temp: &std::path::Path,
    client_checksum: &str,
) -> Result<()> {
    let out = join_copier(job).await?;
    if !out.success() {
        return Err(S4Error::Integrity(out));
    }
    let server_checksum = out.stderr.clone();
    if server_checksum != client_checksum {
        return Err(S4Error::Integrity(CmdOutput {
            exitcode: 1,
            stdout: out.stdout,
            stderr: format!(
                "checksum mismatch: client={} server={}",
                client_checksum, server_checksum
            ),
        }));
    }

    let blob = blob.to_path_buf();
    let temp = temp.to_path_buf();
    node.pools
        .solo
        .run_blocking(move || storage::commit_blob(&temp, &blob, &server_checksum))
        .await?
        .map_err(S4Error::Io)?;
    Ok(())
}

/// Handle `POST /prepare_get?key=&port=`. `remote` is the peer address
/// of the HTTP request.
pub async fn prepare_get(
    node: &Arc<Node>,
    key: &str,
    remote: std::net::IpAddr,
    port: u16,
) -> Result<String> {
    keys::validate_blob_key(key)?;
    node.assert_owner(key)?;
    let blob = node.abs_blob_path(key)?;

    let disk_checksum = {
        let blob = blob.clone();
        node.pools
            .solo
            .run_blocking(move || {
                if storage::exists(&blob) {
                    storage::checksum_read(&blob).map(Some)
                } else {
                    Ok(None)
                }
            })
            .await??
    };
    let disk_checksum =
        disk_checksum.ok_or_else(|| S4Error::not_found(format!("no such key: {}", key)))?;

    let cmd = format!(
        "< {} xxh3 --stream | send {} {}",
        blob.display(),
        remote,
        port
    );
    let deadline = node.settings.max_timeout();
    let (handle, gate) = node
        .pools
        .io
        .submit(async move { shell::run(&cmd, None, Some(deadline)).await });

    let uuid = match node.new_job_id() {
        Ok(uuid) => uuid,
        Err(e) => {
            handle.abort();
            return Err(e);
        }
    };
    node.insert_job(
        uuid.clone(),
        IoJob {
            kind: JobKind::Get,
            started_at: Instant::now(),
            handle,
            blob_path: None,
            temp_path: None,
            disk_checksum: Some(disk_checksum),
            port: None,
        },
    );

    match gate.wait(node.settings.timeout).await {
        Ok(()) => {
            info!("prepare_get {} -> {}:{}", key, remote, port);
            Ok(uuid)
        }
        Err(e) => {
            if let Some(job) = node.take_job(&uuid) {
                job.handle.abort();
            }
            Err(e)
        }
    }
}

/// Handle `POST /confirm_get?uuid=&checksum=`. All three digests (disk,
/// sender stream, client stream) must agree.
pub async fn confirm_get(node: &Arc<Node>, uuid: &str, client_checksum: &str) -> Result<()> {
    let job = node
        .take_job(uuid)
        .ok_or_else(|| S4Error::not_found(format!("no such transfer: {}", uuid)))?;
    let disk_checksum = job
        .disk_checksum
        .clone()
        .ok_or_else(|| S4Error::internal("get job without a disk checksum"))?;

    let out = join_copier(job).await?;
    if !out.success() {
        return Err(S4Error::Integrity(out));
    }
    let server_checksum = out.stderr.clone();
    if disk_checksum != client_checksum || client_checksum != server_checksum {
        return Err(S4Error::Integrity(CmdOutput {
            exitcode: 1,
            stdout: out.stdout,
            stderr: format!(
                "checksum mismatch: disk={} client={} server={}",
                disk_checksum, client_checksum, server_checksum
            ),
        }));
    }
    Ok(())
}

async fn join_copier(job: IoJob) -> Result<CmdOutput> {
    match job.handle.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(S4Error::internal(format!("transfer copier died: {}", e))),
    }
}

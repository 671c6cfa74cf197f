//! Garbage collection of abandoned transfer state.
//!
//! Every 5 seconds: reap job records past the liveness ceiling (abort
//! the copier, free the port, drop the receive file and any still-empty
//! sidecar), then sweep `_tempfiles/` and `_tempdirs/` entries older
//! than the ceiling plus a minute. A sweep that itself fails kills the
//! process; the supervisor restarts a clean node rather than letting a
//! wedged one limp on.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use s4_protocol::{keys, Result};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::node::{JobKind, Node};
use crate::storage;

const GC_INTERVAL: Duration = Duration::from_secs(5);
const TEMP_GRACE: Duration = Duration::from_secs(60);

/// Start the GC loop.
pub fn spawn(node: Arc<Node>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep(&node).await {
                error!("gc sweep failed, exiting for supervised restart: {}", e);
                std::process::exit(1);
            }
        }
    })
}

/// One GC pass.
pub async fn sweep(node: &Arc<Node>) -> Result<()> {
    reap_jobs(node).await?;

    let horizon = node.settings.max_timeout() + TEMP_GRACE;
    let tempfiles = node.data_root.join(storage::TEMPFILES_DIR);
    let tempdirs = node.data_root.join(storage::TEMPDIRS_DIR);
    node.pools
        .solo
        .run_blocking(move || {
            sweep_dir(&tempfiles, horizon);
            sweep_dir(&tempdirs, horizon);
        })
        .await?;
    Ok(())
}

async fn reap_jobs(node: &Arc<Node>) -> Result<()> {
    for (id, job) in node.take_expired_jobs() {
        warn!("reaping abandoned {:?} transfer: {}", job.kind, id);
        job.handle.abort();
        if let Some(port) = job.port {
            node.release_port(port);
        }
        if job.kind == JobKind::Put {
            let temp = job.temp_path;
            let blob = job.blob_path;
            node.pools
                .solo
                .run_blocking(move || {
                    if let Some(temp) = temp {
                        storage::remove_file_quiet(&temp);
                    }
                    if let Some(blob) = blob {
                        remove_sidecar_if_empty(&blob);
                    }
                })
                .await?;
        }
    }
    Ok(())
}

/// A non-empty sidecar means the key committed; only a still-reserved
/// slot may be dropped.
fn remove_sidecar_if_empty(blob: &Path) {
    let sidecar = keys::sidecar_path(blob);
    match std::fs::metadata(&sidecar) {
        Ok(md) if md.len() == 0 => storage::remove_file_quiet(&sidecar),
        _ => {}
    }
}

fn sweep_dir(dir: &Path, horizon: Duration) {
    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read.flatten() {
        let age = entry
            .metadata()
            .and_then(|md| md.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok());
        let Some(age) = age else { continue };
        if age <= horizon {
            continue;
        }
        let path = entry.path();
        let removed = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => warn!("gc removed stale {}", path.display()),
            Err(e) => warn!("gc failed to remove {}: {}", path.display(), e),
        }
    }
}

//! Node-wide state, built once at startup and passed to every handler.
//!
//! Replaces any module-level singletons: the job table and the in-use
//! port set live here behind short-lived locks, touched only by
//! handlers and the GC.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use s4_protocol::{keys, ClusterConfig, CmdOutput, Result, S4Error, Settings};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::ClusterClient;
use crate::pools::Pools;
use crate::storage;

/// Which side of a transfer a job record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Put,
    Get,
}

/// One in-flight transfer, keyed by its UUID.
///
/// Created in prepare, removed in confirm or by the GC. The handle
/// resolves to the exit status of the side-channel copier; its captured
/// stderr is the server-side digest.
pub struct IoJob {
    pub kind: JobKind,
    pub started_at: Instant,
    pub handle: JoinHandle<std::io::Result<CmdOutput>>,
    /// Final blob destination (put).
    pub blob_path: Option<PathBuf>,
    /// Receive file under `_tempfiles/` (put).
    pub temp_path: Option<PathBuf>,
    /// Sidecar digest captured at prepare time, so a concurrent delete
    /// cannot race the verification (get).
    pub disk_checksum: Option<String>,
    /// Server-side listen port (put).
    pub port: Option<u16>,
}

/// The server node.
pub struct Node {
    pub config: ClusterConfig,
    pub settings: Settings,
    pub data_root: PathBuf,
    pub pools: Pools,
    jobs: Mutex<HashMap<String, IoJob>>,
    ports: Mutex<HashSet<u16>>,
    http: reqwest::Client,
}

impl Node {
    /// Build the node: data root plus the reserved temp directories.
    pub fn new(config: ClusterConfig, settings: Settings, data_root: PathBuf) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&data_root)?;
        std::fs::create_dir_all(data_root.join(storage::TEMPFILES_DIR))?;
        std::fs::create_dir_all(data_root.join(storage::TEMPDIRS_DIR))?;
        let data_root = data_root.canonicalize()?;
        let http = reqwest::Client::builder()
            .timeout(settings.max_timeout())
            .build()
            .map_err(|e| S4Error::internal(format!("http client: {}", e)))?;
        let pools = Pools::new(&settings);
        Ok(Arc::new(Self {
            config,
            settings,
            data_root,
            pools,
            jobs: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashSet::new()),
            http,
        }))
    }

    /// Absolute blob path for a key on this node.
    pub fn abs_blob_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.data_root.join(keys::blob_rel_path(key)?))
    }

    /// Conflict unless this node owns the key.
    pub fn assert_owner(&self, key: &str) -> Result<()> {
        if self.config.owns(key)? {
            Ok(())
        } else {
            Err(S4Error::conflict(format!("not the owner of {}", key)))
        }
    }

    /// Fresh job id not currently in the table.
    pub fn new_job_id(&self) -> Result<String> {
        let jobs = lock(&self.jobs);
        for _ in 0..10 {
            let id = Uuid::new_v4().to_string();
            if !jobs.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(S4Error::internal("could not mint a fresh job id"))
    }

    pub fn insert_job(&self, id: String, job: IoJob) {
        lock(&self.jobs).insert(id, job);
    }

    pub fn take_job(&self, id: &str) -> Option<IoJob> {
        lock(&self.jobs).remove(id)
    }

    /// Remove and return every job older than the GC ceiling.
    pub fn take_expired_jobs(&self) -> Vec<(String, IoJob)> {
        let max = self.settings.max_timeout();
        let mut jobs = lock(&self.jobs);
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| job.started_at.elapsed() > max)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
            .collect()
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn allocate_port(&self) -> Result<u16> {
        crate::ports::allocate(&mut lock(&self.ports))
    }

    pub fn release_port(&self, port: u16) {
        crate::ports::release(&mut lock(&self.ports), port);
    }

    pub fn ports_in_use(&self) -> usize {
        lock(&self.ports).len()
    }

    /// In-process client for pushing map outputs back into the cluster.
    pub fn client(&self) -> ClusterClient {
        ClusterClient::new(
            self.config.clone(),
            self.http.clone(),
            self.settings.timeout,
        )
    }
}

/// Lock that survives a poisoned peer instead of cascading the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Refuse to start without the external collaborators on PATH.
pub fn preflight(commands: &[&str]) -> Result<()> {
    for cmd in commands {
        which::which(cmd)
            .map_err(|_| S4Error::Config(format!("required command not found on PATH: {}", cmd)))?;
    }
    Ok(())
}

/// The commands the node shells out to.
pub const REQUIRED_COMMANDS: &[&str] = &["bash", "send", "recv", "xxh3"];

#[cfg(test)]
mod tests {
    use super::*;
    use s4_protocol::ServerAddr;
    use std::path::Path;
    use std::time::Duration;

    fn test_node(dir: &Path) -> Arc<Node> {
        let config = ClusterConfig::from_servers(vec![ServerAddr {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }]);
        let settings = Settings {
            timeout: Duration::from_secs(1),
            io_jobs: 2,
            cpu_jobs: 2,
        };
        Node::new(config, settings, dir.join("s4_data")).unwrap()
    }

    #[test]
    fn test_new_creates_reserved_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        assert!(node.data_root.join(storage::TEMPFILES_DIR).is_dir());
        assert!(node.data_root.join(storage::TEMPDIRS_DIR).is_dir());
    }

    #[test]
    fn test_assert_owner_single_local_server() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        node.assert_owner("s4://b/k").unwrap();
    }

    #[tokio::test]
    async fn test_job_table_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        let id = node.new_job_id().unwrap();
        let handle = tokio::spawn(async { Ok(CmdOutput::default()) });
        node.insert_job(
            id.clone(),
            IoJob {
                kind: JobKind::Get,
                started_at: Instant::now(),
                handle,
                blob_path: None,
                temp_path: None,
                disk_checksum: Some("d".to_string()),
                port: None,
            },
        );
        assert_eq!(node.job_count(), 1);
        assert!(node.take_job(&id).is_some());
        assert!(node.take_job(&id).is_none());
    }

    #[tokio::test]
    async fn test_take_expired_jobs_honors_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path());
        let fresh = tokio::spawn(async { Ok(CmdOutput::default()) });
        node.insert_job(
            "fresh".to_string(),
            IoJob {
                kind: JobKind::Put,
                started_at: Instant::now(),
                handle: fresh,
                blob_path: None,
                temp_path: None,
                disk_checksum: None,
                port: None,
            },
        );
        let stale = tokio::spawn(async { Ok(CmdOutput::default()) });
        let long_ago = Instant::now()
            .checked_sub(node.settings.max_timeout() * 2)
            .unwrap_or_else(Instant::now);
        node.insert_job(
            "stale".to_string(),
            IoJob {
                kind: JobKind::Put,
                started_at: long_ago,
                handle: stale,
                blob_path: None,
                temp_path: None,
                disk_checksum: None,
                port: Some(30_000),
            },
        );
        let expired = node.take_expired_jobs();
        let ids: Vec<_> = expired.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["stale"]);
        assert_eq!(node.job_count(), 1);
    }
}

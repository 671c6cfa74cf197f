//! Cluster configuration.
//!
//! `S4_CONF_PATH` (default `~/.s4.conf`) holds one `address:port` per
//! line, the same file on every node and client. The parsed list is
//! sorted so all parties agree on shard indices regardless of line order.
//! Local addresses are detected separately for "do I own this key"
//! checks; the list itself is never rewritten.

use std::collections::HashSet;
use std::fmt;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, S4Error};
use crate::keys;

/// One cluster member, as written in the conf file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = S4Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| S4Error::Config(format!("expected address:port, got: {}", s)))?;
        if host.is_empty() {
            return Err(S4Error::Config(format!("empty address in: {}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| S4Error::Config(format!("bad port in: {}", s)))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// The static server list plus which of those addresses are this host.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    servers: Vec<ServerAddr>,
    local_hosts: HashSet<String>,
}

impl ClusterConfig {
    /// Load from `S4_CONF_PATH` (default `~/.s4.conf`).
    pub fn load() -> Result<Self> {
        Self::from_path(&conf_path())
    }

    /// Load from an explicit conf file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            S4Error::Config(format!(
                "{} should contain all server addresses, one per line: {}",
                path.display(),
                e
            ))
        })?;
        let servers = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ServerAddr::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_servers(servers))
    }

    /// Build from an in-memory server list. Sorts for shard stability.
    pub fn from_servers(mut servers: Vec<ServerAddr>) -> Self {
        servers.sort();
        servers.dedup();
        Self {
            servers,
            local_hosts: local_host_set(),
        }
    }

    /// The sorted server list.
    pub fn servers(&self) -> &[ServerAddr] {
        &self.servers
    }

    /// True when the address names this host.
    pub fn is_local(&self, addr: &ServerAddr) -> bool {
        self.local_hosts.contains(addr.host.as_str())
    }

    /// Owning server for a key.
    pub fn owner(&self, key: &str) -> Result<&ServerAddr> {
        if self.servers.is_empty() {
            return Err(S4Error::Config("server list is empty".to_string()));
        }
        keys::pick_server(&self.servers, key)
    }

    /// True when this node owns the key.
    pub fn owns(&self, key: &str) -> Result<bool> {
        let owner = self.owner(key)?.clone();
        Ok(self.is_local(&owner))
    }

    /// HTTP port this node should listen on: the conf entry naming this
    /// host.
    pub fn http_port(&self) -> Result<u16> {
        self.servers
            .iter()
            .find(|s| self.is_local(s))
            .map(|s| s.port)
            .ok_or_else(|| {
                S4Error::Config("no conf entry matches a local address on this host".to_string())
            })
    }
}

/// Conf file location: `S4_CONF_PATH` or `~/.s4.conf`.
pub fn conf_path() -> PathBuf {
    if let Ok(path) = std::env::var("S4_CONF_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".s4.conf")
}

fn local_host_set() -> HashSet<String> {
    let mut hosts: HashSet<String> = ["0.0.0.0", "127.0.0.1", "localhost", "::1"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(ip) = detect_local_ip() {
        hosts.insert(ip);
    }
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            hosts.insert(name);
        }
    }
    hosts
}

/// Routable local address, found by opening (not sending on) a UDP
/// socket toward a public address.
fn detect_local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// Tunables read once at startup, never from the environment ad hoc.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Per-phase timeout for a single transfer (`S4_TIMEOUT`, seconds).
    pub timeout: Duration,
    /// io pool size: socket-bound transfers (`S4_IO_JOBS`).
    pub io_jobs: usize,
    /// cpu pool size: user map commands (`S4_CPU_JOBS`). The find pool
    /// shares this size.
    pub cpu_jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let cores = num_cpus();
        Self {
            timeout: Duration::from_secs(600),
            io_jobs: cores * 8,
            cpu_jobs: cores + 2,
        }
    }
}

impl Settings {
    /// Read `S4_TIMEOUT` / `S4_IO_JOBS` / `S4_CPU_JOBS`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Some(secs) = env_usize("S4_TIMEOUT")? {
            settings.timeout = Duration::from_secs(secs as u64);
        }
        if let Some(n) = env_usize("S4_IO_JOBS")? {
            settings.io_jobs = n.max(1);
        }
        if let Some(n) = env_usize("S4_CPU_JOBS")? {
            settings.cpu_jobs = n.max(1);
        }
        Ok(settings)
    }

    /// Liveness ceiling for GC: one timeout for the queue wait, one for
    /// the job once started, plus a grace period.
    pub fn max_timeout(&self) -> Duration {
        self.timeout * 2 + Duration::from_secs(15)
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|_| S4Error::Config(format!("{} is not a number: {}", name, val))),
        Err(_) => Ok(None),
    }
}

fn num_cpus() -> usize {
    ::num_cpus::get().max(1)
}

//! Bounded work pools with an admission gate.
//!
//! Four pools, fixed sizes: io (socket-bound transfers), cpu (user map
//! commands), find (filesystem listing), solo (exactly one worker; every
//! mutation of the blob namespace serializes here, which removes the
//! need for per-key locks). Tasks queue on a fair semaphore, so solo
//! admission order is submission order.
//!
//! [`Pool::submit`] returns the task handle plus a [`StartedGate`] that
//! fires the moment a worker actually begins executing. Handlers bound
//! their wait on the gate; an elapsed wait is the 429 load-shedding
//! signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use s4_protocol::{Result, S4Error, Settings};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

/// One bounded pool.
#[derive(Debug, Clone)]
pub struct Pool {
    name: &'static str,
    permits: Arc<Semaphore>,
}

/// Resolves when a pool worker picks up the submitted task.
pub struct StartedGate {
    name: &'static str,
    rx: oneshot::Receiver<()>,
}

impl StartedGate {
    /// Wait for the task to start executing, bounded by `deadline`.
    pub async fn wait(self, deadline: Duration) -> Result<()> {
        match tokio::time::timeout(deadline, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(S4Error::internal(format!(
                "{} pool task dropped before starting",
                self.name
            ))),
            Err(_) => Err(S4Error::Overloaded(format!("{} pool saturated", self.name))),
        }
    }
}

impl Pool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn a task that runs once a worker slot frees up, reporting
    /// through the gate when it does.
    pub fn submit<F, T>(&self, fut: F) -> (JoinHandle<T>, StartedGate)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let _ = tx.send(());
            fut.await
        });
        (
            handle,
            StartedGate {
                name: self.name,
                rx,
            },
        )
    }

    /// Run a future inside the pool, waiting inline for a slot.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.ok();
        fut.await
    }

    /// Run blocking work inside the pool on the blocking thread pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.permits.acquire().await.ok();
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| S4Error::internal(format!("{} pool task panicked: {}", self.name, e)))
    }

    /// Take a worker slot for a task spawned elsewhere (JoinSet members).
    pub async fn acquire(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }
}

/// The node's four pools.
#[derive(Debug, Clone)]
pub struct Pools {
    pub io: Pool,
    pub cpu: Pool,
    pub find: Pool,
    pub solo: Pool,
}

impl Pools {
    pub fn new(settings: &Settings) -> Self {
        Self {
            io: Pool::new("io", settings.io_jobs),
            cpu: Pool::new("cpu", settings.cpu_jobs),
            find: Pool::new("find", settings.cpu_jobs),
            solo: Pool::new("solo", 1),
        }
    }
}

//! Binlog Sender
//!
//! Supervisor for the sender side of replication: owns the task pool,
//! spawns the worker fleet and exposes the task-management surface the
//! partition controller drives.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::server::{Node, ServerContext};
use crate::sync::pool::{TaskPool, TaskSummary};
use crate::sync::worker::SenderWorker;

/// The replication sender: a task pool drained by a fixed worker fleet
pub struct BinlogSender {
    pool: Arc<TaskPool>,
    server: Arc<dyn ServerContext>,
    config: SyncConfig,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl BinlogSender {
    /// Build a sender; no workers run until `start`
    pub fn new(server: Arc<dyn ServerContext>, config: SyncConfig) -> Self {
        Self {
            pool: Arc::new(TaskPool::new()),
            server,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    /// Spawn the worker fleet. Calling twice is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        self.stop.store(false, Ordering::Relaxed);
        for id in 0..self.config.worker_threads {
            let worker = SenderWorker::new(
                id,
                self.pool.clone(),
                self.server.clone(),
                self.config.clone(),
                self.stop.clone(),
            );
            self.workers.push(tokio::spawn(worker.run()));
        }
        tracing::info!(workers = self.config.worker_threads, "binlog sender started");
    }

    /// Raise the stop flag and wait for every worker to finish its current
    /// step and exit
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("binlog sender stopped");
    }

    /// The shared task pool
    pub fn pool(&self) -> Arc<TaskPool> {
        self.pool.clone()
    }

    /// Start replicating a partition to `target` from `(filenum, offset)`
    #[allow(clippy::too_many_arguments)]
    pub async fn add_new_task(
        &self,
        table: &str,
        partition_id: u32,
        binlog_prefix: &Path,
        target: Node,
        filenum: u32,
        offset: u64,
        force: bool,
    ) -> Result<()> {
        self.pool
            .add_new_task(
                table,
                partition_id,
                binlog_prefix,
                target,
                filenum,
                offset,
                force,
            )
            .await
    }

    /// Stop replicating the named stream
    pub async fn remove_task(&self, name: &str) -> Result<()> {
        self.pool.remove_task(name).await
    }

    pub async fn task_exist(&self, name: &str) -> bool {
        self.pool.task_exist(name).await
    }

    pub async fn task_filenum(&self, name: &str) -> u32 {
        self.pool.task_filenum(name).await
    }

    pub async fn dump(&self) -> Vec<TaskSummary> {
        self.pool.dump().await
    }

    pub async fn size(&self) -> usize {
        self.pool.size().await
    }
}

impl Drop for BinlogSender {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

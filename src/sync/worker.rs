//! Binlog Sender Worker
//!
//! A long-lived worker draining the task pool. Each iteration fetches one
//! task, streams it for at most one time slice, renews the follower's lease
//! and puts the task back, so every stream makes progress regardless of how
//! many exist. Connections to peers are cached per worker and dropped on
//! the first send failure; the task's snapshot makes the retry lossless.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::server::{Node, ServerContext};
use crate::sync::message::{write_message, SyncMessage};
use crate::sync::now_micros;
use crate::sync::pool::TaskPool;
use crate::sync::task::SendTask;

/// Worst case a task waits `pool_size / sender_count` rotations of one time
/// slice each before its next contact; the advertised lease must cover that
/// so the follower does not re-trysync between two contacts.
fn derive_lease(pool_size: usize, sender_count: u32, config: &SyncConfig) -> u64 {
    let senders = sender_count.max(1) as u64;
    let lease =
        (pool_size as u64 * config.time_slice_ms) / (senders * 1000) + config.redundant_lease_secs;
    lease.max(config.min_lease_secs)
}

/// One sender worker; owns its peer connections outright
pub struct SenderWorker {
    id: usize,
    pool: Arc<TaskPool>,
    server: Arc<dyn ServerContext>,
    config: SyncConfig,
    peers: HashMap<String, TcpStream>,
    stop: Arc<AtomicBool>,
}

impl SenderWorker {
    pub fn new(
        id: usize,
        pool: Arc<TaskPool>,
        server: Arc<dyn ServerContext>,
        config: SyncConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            pool,
            server,
            config,
            peers: HashMap::new(),
            stop,
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Worker main loop; runs until the stop flag is raised
    pub async fn run(mut self) {
        // Hold off until the node has finished recovery
        while !self.should_stop() && !self.server.available() {
            sleep(self.config.send_interval()).await;
        }
        tracing::info!(worker = self.id, "binlog sender worker started");

        while !self.should_stop() {
            match self.pool.fetch_out().await {
                Ok(task) => self.run_slice(task).await,
                Err(_) => sleep(self.config.send_interval()).await,
            }
        }

        self.peers.clear();
        tracing::info!(worker = self.id, "binlog sender worker stopped");
    }

    /// Stream one task for at most one time slice, then return it
    async fn run_slice(&mut self, mut task: SendTask) {
        if now_micros().saturating_sub(task.process_error_at())
            < self.config.send_interval_ms.saturating_mul(1000)
        {
            // This task failed moments ago, so the queue is likely short on
            // runnable work; breathe instead of spinning
            sleep(self.config.send_interval()).await;
        }

        let slice_start = Instant::now();
        loop {
            if self.should_stop() {
                let _ = self.pool.put_back(task).await;
                return;
            }

            if task.send_next {
                if let Err(e) = task.process(self.server.as_ref()) {
                    if e.is_end_file() {
                        self.renew_peer_lease(&task).await;
                    } else {
                        tracing::warn!(
                            worker = self.id,
                            task = %task.name(),
                            error = %e,
                            "failed to process task"
                        );
                    }
                    task.mark_process_error();
                    let _ = self.pool.put_back(task).await;
                    return;
                }
            }

            match task.build_sync_message(self.server.as_ref()) {
                Err(e) => {
                    tracing::warn!(
                        worker = self.id,
                        task = %task.name(),
                        error = %e,
                        "could not build outbound message"
                    );
                    task.send_next = false;
                    sleep(self.config.send_interval()).await;
                }
                Ok(msg) if msg.skip_gap() == Some(0) => {
                    // A zero-byte gap tells the follower nothing; drop it
                    // and back off instead of spinning on the torn tail
                    tracing::debug!(worker = self.id, task = %task.name(), "suppressing empty skip");
                    task.send_next = true;
                    sleep(self.config.send_interval()).await;
                }
                Ok(msg) => {
                    let target = task.target().clone();
                    match self.send_to_peer(&target, &msg).await {
                        Ok(()) => task.send_next = true,
                        Err(e) => {
                            tracing::error!(
                                worker = self.id,
                                task = %task.name(),
                                target = %target,
                                error = %e,
                                "failed to send to peer"
                            );
                            task.send_next = false;
                            sleep(self.config.send_interval()).await;
                        }
                    }
                }
            }

            if slice_start.elapsed() > self.config.time_slice() {
                self.renew_peer_lease(&task).await;
                let _ = self.pool.put_back(task).await;
                return;
            }
        }
    }

    /// Tell the follower how long it may go without hearing from us
    async fn renew_peer_lease(&mut self, task: &SendTask) -> bool {
        let pool_size = self.pool.size().await;
        let lease_secs = derive_lease(pool_size, self.server.binlog_sender_count(), &self.config);
        let msg = task.build_lease_message(self.server.as_ref(), lease_secs);
        let target = task.target().clone();
        match self.send_to_peer(&target, &msg).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    worker = self.id,
                    task = %task.name(),
                    target = %target,
                    error = %e,
                    "failed to renew peer lease"
                );
                false
            }
        }
    }

    /// Send one message over the cached connection to `node`, opening it on
    /// first use. On failure the connection is dropped and the caller
    /// retries on a later tick; there is no retry in here.
    async fn send_to_peer(&mut self, node: &Node, msg: &SyncMessage) -> Result<()> {
        let key = node.to_string();
        let stream = match self.peers.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let connect = TcpStream::connect((node.ip.as_str(), node.port));
                let stream = match timeout(self.config.connect_timeout(), connect).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        return Err(Error::Corruption(format!(
                            "connect to {} failed: {}",
                            node, e
                        )))
                    }
                    Err(_) => {
                        return Err(Error::Corruption(format!("connect to {} timed out", node)))
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    return Err(Error::Corruption(format!(
                        "connect to {} failed: {}",
                        node, e
                    )));
                }
                entry.insert(stream)
            }
        };

        match timeout(self.config.send_timeout(), write_message(stream, msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.peers.remove(&key);
                Err(Error::Corruption(format!("send to {} failed: {}", node, e)))
            }
            Err(_) => {
                self.peers.remove(&key);
                Err(Error::Corruption(format!("send to {} timed out", node)))
            }
        }
    }
}

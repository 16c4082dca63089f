//! Replication Sync Module
//!
//! The sender side of partition replication: tasks describing one stream
//! each, the shared pool that schedules them, the workers that drain the
//! pool, and the wire messages that reach followers.

pub mod message;
mod pool;
mod sender;
mod task;
mod worker;

pub use message::{read_message, write_message, FrameHeader, SyncMessage};
pub use pool::{TaskPool, TaskSummary};
pub use sender::BinlogSender;
pub use task::{task_name, SendTask};
pub use worker::SenderWorker;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock microseconds since the epoch
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

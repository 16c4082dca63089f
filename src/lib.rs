//! DenKV Binlog Replication Sender
//!
//! The sender half of DenKV's per-partition replication. Every partition of
//! the store appends serialized commands to an on-disk binlog; for each
//! (table, partition, follower) pair this crate streams those records from a
//! `(filenum, offset)` cursor forward, forever, rolling across log files as
//! the writer does and surviving torn tails, corrupt blocks and flaky peers.
//!
//! # Architecture
//!
//! A fixed pool of sender workers time-slices an unbounded set of
//! replication tasks. Tasks live in a shared FIFO pool; a worker fetches one
//! out, owns it exclusively for a slice, then puts it back. Between contacts
//! the follower holds a lease derived from pool load, so it knows how long
//! silence may last before it should re-issue a TrySync.
//!
//! # Features
//!
//! - Block-framed binlog reader with torn-tail and corruption recovery
//! - Per-task cursor with snapshot-based retry (no record is ever skipped
//!   by a transient send failure)
//! - Weighted round-robin scheduling across replication streams
//! - Load-aware lease advertisement to followers
//! - Lazy per-worker connection caches with eviction on failure

pub mod binlog;
pub mod command;
pub mod config;
pub mod error;
pub mod server;
pub mod sync;

pub use config::DenKvConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::binlog::{BinlogOffset, BinlogReader};
    pub use crate::command::Command;
    pub use crate::config::DenKvConfig;
    pub use crate::error::{Error, Result};
    pub use crate::server::{Node, Partition, ServerContext};
    pub use crate::sync::{BinlogSender, SyncMessage, TaskPool};
}

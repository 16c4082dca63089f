//! Host Node Surface
//!
//! The sender core runs inside a DenKV data node but owns none of it. This
//! module names the node-side surface it consumes: the partition registry
//! (for durable binlog end offsets) and a handful of read-only server facts
//! (epoch, listen endpoint, availability).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::binlog::BinlogOffset;

/// A peer endpoint in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// One partition of a table, as seen by the sender.
///
/// The registry hands these out; the writer side keeps the durable end
/// offset current while the sender only ever reads it.
pub trait Partition: Send + Sync {
    /// Whether the partition is open for replication
    fn opened(&self) -> bool;

    /// Durable end of the partition's binlog
    fn binlog_offset(&self) -> BinlogOffset;
}

/// Read-only view of the hosting data node
pub trait ServerContext: Send + Sync + 'static {
    /// Look up a partition by table name and id
    fn partition(&self, table: &str, partition_id: u32) -> Option<Arc<dyn Partition>>;

    /// Current meta-cluster epoch
    fn meta_epoch(&self) -> u64;

    /// Listen address advertised to peers
    fn local_ip(&self) -> String;

    /// Listen port advertised to peers
    fn local_port(&self) -> u16;

    /// Whether the node has finished recovery and may contact peers
    fn available(&self) -> bool;

    /// Number of sender workers the node runs
    fn binlog_sender_count(&self) -> u32;
}

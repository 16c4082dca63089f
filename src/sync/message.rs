//! Sync Wire Messages
//!
//! The messages a sender pushes to a follower, and the length-prefixed
//! framing they travel in. The stream per task is one-way: CMD carries a
//! replicated command, SKIP tells the follower to advance its cursor past
//! a gap, LEASE bounds how long the follower may wait before the next
//! contact.

use serde::{Deserialize, Serialize};

use crate::binlog::BinlogOffset;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::server::Node;

/// One outbound replication message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// A replicated command read at `offset`
    Cmd {
        epoch: u64,
        from: Node,
        offset: BinlogOffset,
        request: Command,
    },

    /// The sender advanced `gap` bytes past `offset` with nothing to apply
    /// (torn tail or corrupt block)
    Skip {
        epoch: u64,
        from: Node,
        offset: BinlogOffset,
        table: String,
        partition_id: u32,
        gap: u64,
    },

    /// Upper bound, in seconds, on silence before the sender's next contact
    Lease {
        epoch: u64,
        from: Node,
        table: String,
        partition_id: u32,
        lease_secs: u64,
    },
}

impl SyncMessage {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::Cmd { .. } => "Cmd",
            SyncMessage::Skip { .. } => "Skip",
            SyncMessage::Lease { .. } => "Lease",
        }
    }

    /// The gap carried by a SKIP, if this is one
    pub fn skip_gap(&self) -> Option<u64> {
        match self {
            SyncMessage::Skip { gap, .. } => Some(*gap),
            _ => None,
        }
    }

    /// The binlog position this message was read at, if it carries one
    pub fn sync_offset(&self) -> Option<BinlogOffset> {
        match self {
            SyncMessage::Cmd { offset, .. } | SyncMessage::Skip { offset, .. } => Some(*offset),
            SyncMessage::Lease { .. } => None,
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a header describing `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default()),
            checksum: u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default()),
        }
    }
}

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<SyncMessage> {
    use tokio::io::AsyncReadExt;

    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Corruption("message checksum mismatch".into()));
    }

    SyncMessage::deserialize(&body)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &SyncMessage,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

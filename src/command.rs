//! Replicated Command Types
//!
//! Defines the commands that partitions append to their binlogs and that
//! followers re-apply. The binlog stores them serialized; the sender parses
//! them back out when it builds an outbound CMD message.

use serde::{Deserialize, Serialize};

/// A single key-value command carried through the binlog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Write a value under a key
    Set { key: Vec<u8>, value: Vec<u8> },

    /// Remove a key
    Delete { key: Vec<u8> },

    /// Set a key's expiry, in milliseconds since the epoch
    Expire { key: Vec<u8>, deadline_ms: u64 },
}

impl Command {
    /// The key this command touches
    pub fn key(&self) -> &[u8] {
        match self {
            Command::Set { key, .. } | Command::Delete { key } | Command::Expire { key, .. } => key,
        }
    }

    /// Serialize the command to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize a command from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Command name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "Set",
            Command::Delete { .. } => "Delete",
            Command::Expire { .. } => "Expire",
        }
    }
}

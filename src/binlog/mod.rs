//! Binlog Module
//!
//! On-disk format and read-side access for the per-partition binlog: an
//! append-only sequence of files, each a run of fixed-size blocks holding
//! framed command records. The writer side lives with the partition; this
//! crate only ever reads.

mod reader;

pub use reader::{BinlogReader, ReadOutcome};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Fixed framing unit within a binlog file
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Record header: one type byte plus a 24-bit little-endian payload length
pub const HEADER_SIZE: u64 = 4;

/// Default file name prefix for partition binlogs
pub const BINLOG_PREFIX: &str = "binlog";

/// Physical record types within a block.
///
/// A logical record is either a single `Full` record or a
/// `First, Middle*, Last` sequence whose payloads are concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    /// Decode a header type byte
    pub fn from_byte(byte: u8) -> Option<RecordType> {
        match byte {
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Header type byte for this record type
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Position within a partition's binlog: file serial plus byte offset.
///
/// Ordering is lexicographic on `(filenum, offset)`, which is the total
/// order of the log itself.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BinlogOffset {
    pub filenum: u32,
    pub offset: u64,
}

impl BinlogOffset {
    pub fn new(filenum: u32, offset: u64) -> Self {
        Self { filenum, offset }
    }
}

impl std::fmt::Display for BinlogOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.filenum, self.offset)
    }
}

/// Path of the binlog file with the given serial number
pub fn binlog_file_path(prefix: &Path, filenum: u32) -> PathBuf {
    PathBuf::from(format!("{}.{:010}", prefix.display(), filenum))
}

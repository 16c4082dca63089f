//! Binlog Send Task
//!
//! One replication stream: a partition identity, a target peer, a cursor
//! into the partition's binlog, and the open reader behind it. A task is
//! exclusively owned by whichever worker fetched it out of the pool, so
//! nothing here needs a lock.

use std::fs::File;
use std::path::PathBuf;

use crate::binlog::{binlog_file_path, BinlogOffset, BinlogReader, ReadOutcome};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::server::{Node, ServerContext};
use crate::sync::message::SyncMessage;
use crate::sync::now_micros;

/// Pool-unique task name for a `(table, partition, target)` triple
pub fn task_name(table: &str, partition_id: u32, target: &Node) -> String {
    format!("{}_{}_{}_{}", table, partition_id, target.ip, target.port)
}

/// One binlog replication stream to one follower
pub struct SendTask {
    sequence: u64,
    name: String,
    table: String,
    partition_id: u32,
    target: Node,
    binlog_prefix: PathBuf,

    /// Next byte to read; advances only on a successful consume
    filenum: u32,
    offset: u64,

    /// False while the previous snapshot still awaits a successful send
    pub(crate) send_next: bool,
    /// Wall time of the last process error, for the worker's rate gate
    process_error_at: u64,

    // Snapshot of the cursor before the last consume; outbound messages are
    // built from it so a failed send can be rebuilt without re-reading.
    pre_filenum: u32,
    pre_offset: u64,
    pre_has_content: bool,
    pre_content: Vec<u8>,

    reader: Option<BinlogReader>,
}

impl SendTask {
    /// Open the binlog file at `filenum`, seek to `offset` and build the
    /// task. On any failure the partially-built task is discarded.
    pub fn create(
        sequence: u64,
        table: impl Into<String>,
        partition_id: u32,
        binlog_prefix: impl Into<PathBuf>,
        target: Node,
        filenum: u32,
        offset: u64,
    ) -> Result<SendTask> {
        let table = table.into();
        let binlog_prefix = binlog_prefix.into();

        let path = binlog_file_path(&binlog_prefix, filenum);
        let file = File::open(&path)?;
        let mut reader = BinlogReader::new(file);
        reader.seek(offset)?;

        let name = task_name(&table, partition_id, &target);
        Ok(SendTask {
            sequence,
            name,
            table,
            partition_id,
            target,
            binlog_prefix,
            filenum,
            offset,
            send_next: true,
            process_error_at: 0,
            pre_filenum: 0,
            pre_offset: 0,
            pre_has_content: false,
            pre_content: Vec::with_capacity(1024 * 1024),
            reader: Some(reader),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn target(&self) -> &Node {
        &self.target
    }

    pub fn filenum(&self) -> u32 {
        self.filenum
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current cursor position
    pub fn cursor(&self) -> BinlogOffset {
        BinlogOffset::new(self.filenum, self.offset)
    }

    pub(crate) fn process_error_at(&self) -> u64 {
        self.process_error_at
    }

    /// Stamp the rate gate after a process error
    pub(crate) fn mark_process_error(&mut self) {
        self.process_error_at = now_micros();
    }

    /// Perform one logical step of the stream: check the durable end, then
    /// consume the next record into the `pre` snapshot, rolling to the next
    /// binlog file when the current one is exhausted.
    ///
    /// Returns `Ok` both for a real record and for a skipped gap; the
    /// snapshot's content flag tells them apart at message-build time.
    /// `EndFile` means caught up, `InvalidArgument` means the partition is
    /// gone or closed.
    pub fn process(&mut self, server: &dyn ServerContext) -> Result<()> {
        loop {
            let partition = server
                .partition(&self.table, self.partition_id)
                .filter(|p| p.opened())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "partition {}_{} missing or closed",
                        self.table, self.partition_id
                    ))
                })?;
            let end = partition.binlog_offset();
            if self.filenum == end.filenum && self.offset == end.offset {
                return Err(Error::EndFile("no more binlog item".into()));
            }

            self.pre_filenum = self.filenum;
            self.pre_offset = self.offset;

            let Some(reader) = self.reader.as_mut() else {
                return Err(Error::InvalidArgument("task has no open reader".into()));
            };
            match reader.consume(&mut self.pre_content) {
                Ok(ReadOutcome::Record { consumed }) => {
                    self.pre_has_content = true;
                    self.offset += consumed;
                    return Ok(());
                }
                Ok(ReadOutcome::EndOfFile) => {
                    let next = binlog_file_path(&self.binlog_prefix, self.filenum + 1);
                    if !next.exists() {
                        return Err(Error::EndFile("writer has not rolled yet".into()));
                    }
                    tracing::info!(
                        task = %self.name,
                        file = %next.display(),
                        "rolling to next binlog file"
                    );
                    self.reader = None;
                    self.reader = Some(BinlogReader::open(&next)?);
                    self.filenum += 1;
                    self.offset = 0;
                }
                Ok(ReadOutcome::Incomplete { consumed }) => {
                    tracing::warn!(
                        task = %self.name,
                        consumed,
                        "incomplete record at {}:{}",
                        self.pre_filenum,
                        self.pre_offset
                    );
                    self.pre_has_content = false;
                    self.offset += consumed;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        task = %self.name,
                        error = %e,
                        "consume failed at {}:{}, skipping to next block",
                        self.pre_filenum,
                        self.pre_offset
                    );
                    let skipped = reader.skip_next_block()?;
                    self.pre_has_content = false;
                    self.offset += skipped;
                    return Ok(());
                }
            }
        }
    }

    /// Build the CMD or SKIP message for the current snapshot. Rebuilding
    /// without an intervening `process` yields the identical message, which
    /// is what makes send retries lossless.
    pub fn build_sync_message(&self, server: &dyn ServerContext) -> Result<SyncMessage> {
        let epoch = server.meta_epoch();
        let from = Node::new(server.local_ip(), server.local_port());
        let offset = BinlogOffset::new(self.pre_filenum, self.pre_offset);

        if self.pre_has_content {
            let request = Command::deserialize(&self.pre_content)?;
            Ok(SyncMessage::Cmd {
                epoch,
                from,
                offset,
                request,
            })
        } else {
            Ok(SyncMessage::Skip {
                epoch,
                from,
                offset,
                table: self.table.clone(),
                partition_id: self.partition_id,
                gap: self.offset - self.pre_offset,
            })
        }
    }

    /// Build the LEASE message advertising `lease_secs` of allowed silence
    pub fn build_lease_message(&self, server: &dyn ServerContext, lease_secs: u64) -> SyncMessage {
        SyncMessage::Lease {
            epoch: server.meta_epoch(),
            from: Node::new(server.local_ip(), server.local_port()),
            table: self.table.clone(),
            partition_id: self.partition_id,
            lease_secs,
        }
    }
}

impl std::fmt::Debug for SendTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendTask")
            .field("name", &self.name)
            .field("sequence", &self.sequence)
            .field("cursor", &self.cursor())
            .field("send_next", &self.send_next)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::{RecordType, BLOCK_SIZE};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::{tempdir, TempDir};

    struct TestPartition {
        opened: bool,
        end: Mutex<BinlogOffset>,
    }

    impl crate::server::Partition for TestPartition {
        fn opened(&self) -> bool {
            self.opened
        }

        fn binlog_offset(&self) -> BinlogOffset {
            *self.end.lock().unwrap()
        }
    }

    struct TestServer {
        partition: Option<Arc<TestPartition>>,
    }

    impl TestServer {
        fn with_end(end: BinlogOffset) -> Self {
            Self {
                partition: Some(Arc::new(TestPartition {
                    opened: true,
                    end: Mutex::new(end),
                })),
            }
        }
    }

    impl ServerContext for TestServer {
        fn partition(&self, _table: &str, _id: u32) -> Option<Arc<dyn crate::server::Partition>> {
            self.partition
                .clone()
                .map(|p| p as Arc<dyn crate::server::Partition>)
        }

        fn meta_epoch(&self) -> u64 {
            7
        }

        fn local_ip(&self) -> String {
            "10.0.0.1".to_string()
        }

        fn local_port(&self) -> u16 {
            9221
        }

        fn available(&self) -> bool {
            true
        }

        fn binlog_sender_count(&self) -> u32 {
            4
        }
    }

    fn record(kind: RecordType, payload: &[u8]) -> Vec<u8> {
        let l = (payload.len() as u32).to_le_bytes();
        let mut bytes = vec![kind.as_byte(), l[0], l[1], l[2]];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn write_binlog(dir: &TempDir, filenum: u32, bytes: &[u8]) -> PathBuf {
        let prefix = dir.path().join("binlog");
        let path = binlog_file_path(&prefix, filenum);
        File::create(&path).unwrap().write_all(bytes).unwrap();
        prefix
    }

    fn target() -> Node {
        Node::new("10.0.0.2", 9222)
    }

    #[test]
    fn test_task_name_format() {
        assert_eq!(
            task_name("users", 3, &target()),
            "users_3_10.0.0.2_9222".to_string()
        );
    }

    #[test]
    fn test_create_missing_file_fails() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("binlog");
        let err = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_create_offset_past_end_fails() {
        let dir = tempdir().unwrap();
        let payload = Command::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        }
        .serialize()
        .unwrap();
        let prefix = write_binlog(&dir, 0, &record(RecordType::Full, &payload));

        let err = SendTask::create(1, "users", 0, prefix, target(), 0, 4096).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_single_record_then_end_file() {
        let dir = tempdir().unwrap();
        let cmd = Command::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        };
        let payload = cmd.serialize().unwrap();
        let bytes = record(RecordType::Full, &payload);
        let end = BinlogOffset::new(0, bytes.len() as u64);
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer::with_end(end);
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();
        assert_eq!(task.sequence(), 1);
        assert_eq!(task.partition_id(), 0);
        assert_eq!(task.table(), "users");

        task.process(&server).unwrap();
        assert_eq!(task.cursor(), end);
        match task.build_sync_message(&server).unwrap() {
            SyncMessage::Cmd {
                epoch,
                offset,
                request,
                ..
            } => {
                assert_eq!(epoch, 7);
                assert_eq!(offset, BinlogOffset::new(0, 0));
                assert_eq!(request, cmd);
            }
            other => panic!("expected Cmd, got {:?}", other),
        }

        let err = task.process(&server).unwrap_err();
        assert!(err.is_end_file());
    }

    #[test]
    fn test_roll_to_next_file() {
        let dir = tempdir().unwrap();
        let first = Command::Set {
            key: b"a".to_vec(),
            value: vec![b'x'; 20],
        };
        let second = Command::Delete { key: b"a".to_vec() };
        let bytes0 = record(RecordType::Full, &first.serialize().unwrap());
        let bytes1 = record(RecordType::Full, &second.serialize().unwrap());
        let prefix = write_binlog(&dir, 0, &bytes0);
        write_binlog(&dir, 1, &bytes1);

        let server = TestServer::with_end(BinlogOffset::new(1, bytes1.len() as u64));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        task.process(&server).unwrap();
        assert_eq!(
            task.build_sync_message(&server).unwrap().sync_offset(),
            Some(BinlogOffset::new(0, 0))
        );

        // Second step crosses into binlog.1
        task.process(&server).unwrap();
        match task.build_sync_message(&server).unwrap() {
            SyncMessage::Cmd {
                offset, request, ..
            } => {
                assert_eq!(offset, BinlogOffset::new(1, 0));
                assert_eq!(request, second);
            }
            other => panic!("expected Cmd after roll, got {:?}", other),
        }
        assert_eq!(task.cursor(), BinlogOffset::new(1, bytes1.len() as u64));
    }

    #[test]
    fn test_torn_tail_becomes_skip() {
        let dir = tempdir().unwrap();
        // Header promises 100 payload bytes, only 36 exist
        let mut bytes = vec![RecordType::Full.as_byte(), 100, 0, 0];
        bytes.extend_from_slice(&vec![b'z'; 36]);
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer::with_end(BinlogOffset::new(1, 0));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        task.process(&server).unwrap();
        match task.build_sync_message(&server).unwrap() {
            SyncMessage::Skip { offset, gap, .. } => {
                assert_eq!(offset, BinlogOffset::new(0, 0));
                assert_eq!(gap, 40);
            }
            other => panic!("expected Skip, got {:?}", other),
        }
        assert_eq!(task.cursor(), BinlogOffset::new(0, 40));

        // Nothing after the torn tail and no next file yet
        let err = task.process(&server).unwrap_err();
        assert!(err.is_end_file());
    }

    #[test]
    fn test_corrupt_block_becomes_skip() {
        let dir = tempdir().unwrap();
        let mut bytes = vec![0x77u8; BLOCK_SIZE as usize];
        let clean = Command::Delete { key: b"k".to_vec() };
        let clean_bytes = record(RecordType::Full, &clean.serialize().unwrap());
        bytes.extend_from_slice(&clean_bytes);
        let prefix = write_binlog(&dir, 0, &bytes);

        let server =
            TestServer::with_end(BinlogOffset::new(0, BLOCK_SIZE + clean_bytes.len() as u64));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        task.process(&server).unwrap();
        match task.build_sync_message(&server).unwrap() {
            SyncMessage::Skip { offset, gap, .. } => {
                assert_eq!(offset, BinlogOffset::new(0, 0));
                assert_eq!(gap, BLOCK_SIZE);
            }
            other => panic!("expected Skip, got {:?}", other),
        }

        // The block after the corruption reads cleanly
        task.process(&server).unwrap();
        match task.build_sync_message(&server).unwrap() {
            SyncMessage::Cmd {
                offset, request, ..
            } => {
                assert_eq!(offset, BinlogOffset::new(0, BLOCK_SIZE));
                assert_eq!(request, clean);
            }
            other => panic!("expected Cmd, got {:?}", other),
        }
    }

    #[test]
    fn test_rebuild_without_process_is_identical() {
        let dir = tempdir().unwrap();
        let cmd = Command::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        };
        let bytes = record(RecordType::Full, &cmd.serialize().unwrap());
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer::with_end(BinlogOffset::new(0, bytes.len() as u64));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        task.process(&server).unwrap();
        let first = task.build_sync_message(&server).unwrap();
        let second = task.build_sync_message(&server).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unparseable_payload_fails_build() {
        let dir = tempdir().unwrap();
        let bytes = record(RecordType::Full, &[0xfe; 24]);
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer::with_end(BinlogOffset::new(0, bytes.len() as u64));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        task.process(&server).unwrap();
        assert!(matches!(
            task.build_sync_message(&server),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_missing_partition_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let bytes = record(RecordType::Full, b"x");
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer { partition: None };
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        let err = task.process(&server).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let dir = tempdir().unwrap();
        let mut bytes = Vec::new();
        for i in 0..8u8 {
            let cmd = Command::Set {
                key: vec![i],
                value: vec![i; 16],
            };
            bytes.extend_from_slice(&record(RecordType::Full, &cmd.serialize().unwrap()));
        }
        let prefix = write_binlog(&dir, 0, &bytes);

        let server = TestServer::with_end(BinlogOffset::new(0, bytes.len() as u64));
        let mut task = SendTask::create(1, "users", 0, prefix, target(), 0, 0).unwrap();

        let mut last = BinlogOffset::default();
        while task.process(&server).is_ok() {
            let offset = task
                .build_sync_message(&server)
                .unwrap()
                .sync_offset()
                .unwrap();
            assert!(offset >= last);
            assert!(offset < task.cursor());
            last = offset;
        }
        assert_eq!(task.cursor().offset, bytes.len() as u64);
    }
}

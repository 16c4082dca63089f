//! Binlog Send Task Pool
//!
//! The single rendezvous between the controller and the sender workers: a
//! runnable FIFO of tasks plus a name index. Workers move tasks out of the
//! pool and back, so a task is only ever touched by one thread; the index
//! keeps enough state (sequence, filenum snapshot) to recognize a put-back
//! of a task that has since been removed or replaced.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::server::Node;
use crate::sync::task::SendTask;

/// Index entry for one live task. `task` is `None` while a worker has the
/// task fetched out.
struct TaskSlot {
    sequence: u64,
    filenum_snap: u32,
    task: Option<SendTask>,
}

struct PoolInner {
    /// Runnable FIFO; every name here has a slot holding its task
    queue: VecDeque<String>,
    slots: HashMap<String, TaskSlot>,
}

/// Diagnostic summary of one pooled task
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub name: String,
    pub sequence: u64,
    pub filenum: u32,
    /// Cursor offset, absent while a worker holds the task
    pub offset: Option<u64>,
}

/// Shared FIFO of runnable send tasks with a name index
pub struct TaskPool {
    inner: RwLock<PoolInner>,
    next_sequence: AtomicU64,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                queue: VecDeque::new(),
                slots: HashMap::new(),
            }),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Whether a task with this name is tracked (queued or fetched out)
    pub async fn task_exist(&self, name: &str) -> bool {
        self.inner.read().await.slots.contains_key(name)
    }

    /// Number of tasks tracked, fetched-out ones included
    pub async fn size(&self) -> usize {
        self.inner.read().await.slots.len()
    }

    /// Create a task and add it to the pool. With `force`, an existing task
    /// under the same name is removed first; without it the add is rejected.
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
        let sequence = self.next_sequence();
        let task = SendTask::create(
            sequence,
            table,
            partition_id,
            binlog_prefix,
            target.clone(),
            filenum,
            offset,
        )?;

        if force && self.task_exist(task.name()).await {
            let _ = self.remove_task(task.name()).await;
        }

        let name = task.name().to_string();
        let result = self.add_task(task).await;
        match &result {
            Ok(()) => tracing::info!(
                task = %name,
                target = %target,
                sequence,
                filenum,
                offset,
                "added binlog send task"
            ),
            Err(e) => tracing::warn!(task = %name, error = %e, "failed to add binlog send task"),
        }
        result
    }

    /// Add an already-built task; rejects a duplicate name
    pub async fn add_task(&self, task: SendTask) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.slots.contains_key(task.name()) {
            return Err(Error::AlreadyExists(format!("task {}", task.name())));
        }
        let name = task.name().to_string();
        let slot = TaskSlot {
            sequence: task.sequence(),
            filenum_snap: task.filenum(),
            task: Some(task),
        };
        inner.slots.insert(name.clone(), slot);
        inner.queue.push_back(name);
        Ok(())
    }

    /// Drop a task by name. A task currently fetched out is not destroyed
    /// here; erasing its slot makes the eventual put-back destroy it.
    pub async fn remove_task(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .slots
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("task {}", name)))?;
        if slot.task.is_some() {
            inner.queue.retain(|queued| queued != name);
        }
        Ok(())
    }

    /// Pop the front task; the caller owns it until `put_back`. Returns
    /// `NotFound` when the queue is empty.
    pub async fn fetch_out(&self) -> Result<SendTask> {
        let mut inner = self.inner.write().await;
        while let Some(name) = inner.queue.pop_front() {
            if let Some(slot) = inner.slots.get_mut(&name) {
                if let Some(task) = slot.task.take() {
                    return Ok(task);
                }
            }
        }
        Err(Error::NotFound("no runnable task".into()))
    }

    /// Return a fetched-out task to the tail of the queue. If the task was
    /// removed or replaced while out, it is destroyed here and `NotFound`
    /// is returned.
    pub async fn put_back(&self, task: SendTask) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stale = match inner.slots.get(task.name()) {
            None => true,
            Some(slot) => slot.task.is_some() || slot.sequence != task.sequence(),
        };
        if stale {
            tracing::info!(
                task = %task.name(),
                sequence = task.sequence(),
                filenum = task.filenum(),
                offset = task.offset(),
                "destroying stale task on put back"
            );
            return Err(Error::NotFound(format!(
                "task {} removed while fetched out",
                task.name()
            )));
        }

        let name = task.name().to_string();
        if let Some(slot) = inner.slots.get_mut(&name) {
            slot.filenum_snap = task.filenum();
            slot.task = Some(task);
        }
        inner.queue.push_back(name);
        Ok(())
    }

    /// Current filenum of the named task: the live value when queued, the
    /// last snapshot while fetched out, `u32::MAX` when absent. Used by the
    /// controller to decide which binlog files are still needed.
    pub async fn task_filenum(&self, name: &str) -> u32 {
        let inner = self.inner.read().await;
        match inner.slots.get(name) {
            None => u32::MAX,
            Some(slot) => slot
                .task
                .as_ref()
                .map(|task| task.filenum())
                .unwrap_or(slot.filenum_snap),
        }
    }

    /// Snapshot of every tracked task
    pub async fn dump(&self) -> Vec<TaskSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<TaskSummary> = inner
            .slots
            .iter()
            .map(|(name, slot)| TaskSummary {
                name: name.clone(),
                sequence: slot.sequence,
                filenum: slot
                    .task
                    .as_ref()
                    .map(|task| task.filenum())
                    .unwrap_or(slot.filenum_snap),
                offset: slot.task.as_ref().map(|task| task.offset()),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Allocate the next task sequence number
    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

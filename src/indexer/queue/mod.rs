// Pending index operations and the recent-activity log of one index


use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

/// What the processor should do with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Index,
    Delete,
}

impl fmt::Display for OperationKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOperation {
    pub filename: String,
    pub kind: OperationKind,
}

impl IndexOperation {
    #[inline]
    pub fn index(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            kind: OperationKind::Index,
        }
    }

    #[inline]
    pub fn delete(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            kind: OperationKind::Delete,
        }
    }
}

/// FIFO of pending operations holding at most one entry per filename.
///
/// Pushing a filename that is already queued removes the old entry and appends the new one, so
/// the latest requested operation wins and is processed last.
#[derive(Debug, Default)]
pub struct OperationQueue {
    items: VecDeque<IndexOperation>,
}

impl OperationQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, operation: IndexOperation) {
        self.items
            .retain(|queued| queued.filename != operation.filename);
        self.items.push_back(operation);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<IndexOperation> {
        self.items.pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn filenames(&self) -> Vec<String> {
        self.items.iter().map(|op| op.filename.clone()).collect()
    }
}

/// One completed operation
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub filename: String,
    pub kind: OperationKind,
    pub chunk_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Most recent completed operations, newest first, bounded by capacity
#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn record(&mut self, entry: ActivityEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    #[inline]
    pub fn recent(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Queue and activity log owned by a single index
#[derive(Debug)]
pub struct IndexState {
    queue: Mutex<OperationQueue>,
    activity: Mutex<ActivityLog>,
    pending: Notify,
}

impl IndexState {
    #[inline]
    pub fn new(activity_capacity: usize) -> Self {
        Self {
            queue: Mutex::new(OperationQueue::new()),
            activity: Mutex::new(ActivityLog::new(activity_capacity)),
            pending: Notify::new(),
        }
    }

    #[inline]
    pub async fn enqueue(&self, operation: IndexOperation) {
        self.queue.lock().await.push(operation);
        self.pending.notify_one();
    }

    #[inline]
    pub async fn enqueue_all<I>(&self, operations: I) -> usize
    where
        I: IntoIterator<Item = IndexOperation>,
    {
        let mut queue = self.queue.lock().await;
        let mut count = 0_usize;
        for operation in operations {
            queue.push(operation);
            count = count.saturating_add(1);
        }
        drop(queue);

        if count > 0 {
            self.pending.notify_one();
        }
        count
    }

    #[inline]
    pub async fn next_operation(&self) -> Option<IndexOperation> {
        self.queue.lock().await.pop()
    }

    #[inline]
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    #[inline]
    pub async fn has_pending(&self) -> bool {
        !self.queue.lock().await.is_empty()
    }

    #[inline]
    pub async fn queued_files(&self) -> Vec<String> {
        self.queue.lock().await.filenames()
    }

    #[inline]
    pub async fn record_activity(&self, entry: ActivityEntry) {
        self.activity.lock().await.record(entry);
    }

    #[inline]
    pub async fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.activity.lock().await.recent()
    }

    /// Resolves once something was enqueued after the last wake-up
    #[inline]
    pub async fn wait_for_work(&self) {
        self.pending.notified().await;
    }
}

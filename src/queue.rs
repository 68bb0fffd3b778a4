//! User-facing upload queues: per-user, named, ordered lists of files the
//! user plans to upload.
//!
//! Distinct from the scheduler's internal priority queue — these queues are
//! owned and reordered by the user, persist until explicitly cleaned up, and
//! only hand their front item to the processing path when active. Positions
//! form a dense, zero-based, unique ordering at every observable instant.

use std::collections::HashMap;
use std::sync::RwLock;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue id is unknown, or not owned by the requesting user.
    #[error("queue {0} not found")]
    NotFound(Uuid),
    /// Queue item id is unknown.
    #[error("item {0} not found")]
    ItemNotFound(Uuid),
    /// Requested position lies outside `0..item_count`.
    #[error("invalid position {position} for queue of {len} items")]
    InvalidPosition {
        /// Requested target position.
        position: usize,
        /// Item count at the time of the request.
        len: usize,
    },
    /// Item is processing or completed and may no longer be moved.
    #[error("item in state {0:?} cannot be reordered")]
    CannotReorder(ItemStatus),
    /// Registry lock was poisoned by a panicking writer.
    #[error("queue registry lock poisoned")]
    Poisoned,
}

/// Lifecycle state of one queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Currently being processed.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Error,
}

impl ItemStatus {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Whether a queue dispatches work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Items may be dispatched.
    Active,
    /// Reorder and cleanup are allowed, dispatch is not.
    Paused,
}

/// One file waiting in an upload queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Item id.
    pub id: Uuid,
    /// File name supplied when the item was added.
    pub file_name: String,
    /// Path handed to the pipeline when the item is dispatched.
    pub path: String,
    /// Dense, zero-based position within the queue.
    pub position: usize,
    /// Lifecycle state.
    pub status: ItemStatus,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Queue id.
    pub id: Uuid,
    /// Owner the queue belongs to.
    pub owner_id: String,
    /// User-chosen queue name.
    pub name: String,
    /// Dispatch state.
    pub state: QueueState,
    /// Items in position order.
    pub items: Vec<QueueItem>,
}

struct UploadQueue {
    owner_id: String,
    name: String,
    state: QueueState,
    items: Vec<QueueItem>,
}

impl UploadQueue {
    fn reindex(&mut self) {
        for (position, item) in self.items.iter_mut().enumerate() {
            item.position = position;
        }
    }

    fn snapshot(&self, id: Uuid) -> QueueSnapshot {
        QueueSnapshot {
            id,
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            state: self.state,
            items: self.items.clone(),
        }
    }
}

/// Registry of upload queues, indexed by queue id and owner.
///
/// Queues persist across sessions until removed by their owner; constructed
/// once at process start and shared through an `Arc`.
#[derive(Default)]
pub struct UploadQueueManager {
    queues: RwLock<HashMap<Uuid, UploadQueue>>,
}

impl UploadQueueManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue for `owner_id` and return its id.
    pub fn create(&self, owner_id: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.write().insert(
            id,
            UploadQueue {
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                state: QueueState::Active,
                items: Vec::new(),
            },
        );
        tracing::info!(queue = %id, owner = owner_id, name, "Upload queue created");
        id
    }

    /// Append a pending file at the back of the queue and return its item id.
    pub fn add_file(
        &self,
        queue_id: Uuid,
        file_name: &str,
        path: &str,
    ) -> Result<Uuid, QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        let item_id = Uuid::new_v4();
        let position = queue.items.len();
        queue.items.push(QueueItem {
            id: item_id,
            file_name: file_name.to_string(),
            path: path.to_string(),
            position,
            status: ItemStatus::Pending,
        });
        Ok(item_id)
    }

    /// Snapshot a queue's current state.
    pub fn status(&self, queue_id: Uuid) -> Result<QueueSnapshot, QueueError> {
        let guard = self.read();
        let queue = guard.get(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        Ok(queue.snapshot(queue_id))
    }

    /// List the queues owned by `owner_id`, stable by id.
    pub fn list(&self, owner_id: &str) -> Vec<QueueSnapshot> {
        let guard = self.read();
        let mut snapshots: Vec<QueueSnapshot> = guard
            .iter()
            .filter(|(_, queue)| queue.owner_id == owner_id)
            .map(|(id, queue)| queue.snapshot(*id))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Move an item to `new_position` with array-move semantics: the moved
    /// item lands exactly at the target and every displaced item shifts by
    /// one slot, keeping positions dense and unique.
    pub fn reorder(
        &self,
        queue_id: Uuid,
        item_id: Uuid,
        new_position: usize,
    ) -> Result<QueueSnapshot, QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;

        if new_position >= queue.items.len() {
            return Err(QueueError::InvalidPosition {
                position: new_position,
                len: queue.items.len(),
            });
        }
        let old_position = queue
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or(QueueError::ItemNotFound(item_id))?;
        let status = queue.items[old_position].status;
        if matches!(status, ItemStatus::Processing | ItemStatus::Completed) {
            return Err(QueueError::CannotReorder(status));
        }

        let item = queue.items.remove(old_position);
        queue.items.insert(new_position, item);
        queue.reindex();
        Ok(queue.snapshot(queue_id))
    }

    /// Stop dispatching from the queue. Order is untouched; items remain
    /// pending.
    pub fn pause(&self, queue_id: Uuid) -> Result<(), QueueError> {
        self.set_state(queue_id, QueueState::Paused)
    }

    /// Resume dispatching from the queue.
    pub fn resume(&self, queue_id: Uuid) -> Result<(), QueueError> {
        self.set_state(queue_id, QueueState::Active)
    }

    /// Remove all terminal items and compact the remaining positions.
    /// Returns the number of items removed.
    pub fn cleanup(&self, queue_id: Uuid) -> Result<usize, QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        let before = queue.items.len();
        queue.items.retain(|item| !item.status.is_terminal());
        queue.reindex();
        Ok(before - queue.items.len())
    }

    /// Delete the queue entirely.
    pub fn remove(&self, queue_id: Uuid) -> Result<(), QueueError> {
        self.write()
            .remove(&queue_id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(queue_id))
    }

    /// Hand the front pending item to the processing path, marking it
    /// processing. Returns `None` when the queue is paused or has no pending
    /// items.
    pub fn next_pending(&self, queue_id: Uuid) -> Result<Option<QueueItem>, QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        if queue.state == QueueState::Paused {
            return Ok(None);
        }
        let next = queue
            .items
            .iter_mut()
            .find(|item| item.status == ItemStatus::Pending);
        Ok(next.map(|item| {
            item.status = ItemStatus::Processing;
            item.clone()
        }))
    }

    /// Record the terminal status of a dispatched item.
    pub fn finish_item(
        &self,
        queue_id: Uuid,
        item_id: Uuid,
        succeeded: bool,
    ) -> Result<(), QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        let item = queue
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or(QueueError::ItemNotFound(item_id))?;
        item.status = if succeeded {
            ItemStatus::Completed
        } else {
            ItemStatus::Error
        };
        Ok(())
    }

    fn set_state(&self, queue_id: Uuid, state: QueueState) -> Result<(), QueueError> {
        let mut guard = self.write();
        let queue = guard.get_mut(&queue_id).ok_or(QueueError::NotFound(queue_id))?;
        queue.state = state;
        tracing::debug!(queue = %queue_id, state = ?state, "Queue state changed");
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, UploadQueue>> {
        self.queues.read().expect("queue registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, UploadQueue>> {
        self.queues.write().expect("queue registry lock poisoned")
    }
}

//! Replication operation queue: queued work items and point-in-time snapshots.

use crate::error::{ErrorContext, Result};
use crate::session::DirectorySession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Kind of queued replication work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationOperationType {
    /// Pull changes from a source.
    Sync,
    /// Add a replication agreement.
    Add,
    /// Delete a replication agreement.
    Delete,
    /// Modify a replication agreement.
    Modify,
    /// Update a reps-to reference on a source.
    UpdateReference,
}

/// One queued or in-flight operation. Never mutated after it is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationOperation {
    /// When the operation was queued.
    pub time_enqueued: DateTime<Utc>,
    /// FIFO sequence number, unique for the queue's lifetime.
    pub operation_number: u32,
    /// Lower values are more urgent.
    pub priority: i32,
    /// Operation kind.
    pub operation_type: ReplicationOperationType,
    /// Target naming context.
    pub partition: String,
    /// Source server.
    pub source_server: String,
}

/// Snapshot ordering: priority first, then enqueue time, then operation number.
pub fn snapshot_order(a: &ReplicationOperation, b: &ReplicationOperation) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.time_enqueued.cmp(&b.time_enqueued))
        .then(a.operation_number.cmp(&b.operation_number))
}

/// Queue contents as reported by a server, before ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Operation executing right now.
    pub current: Option<ReplicationOperation>,
    /// When the current operation started.
    pub current_started_at: Option<DateTime<Utc>>,
    /// Operations waiting.
    pub pending: Vec<ReplicationOperation>,
}

/// Read-only view of a server's replication queue at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationOperationInformation {
    current_operation: Option<ReplicationOperation>,
    operation_start_time: Option<DateTime<Utc>>,
    pending_operations: Vec<ReplicationOperation>,
}

impl ReplicationOperationInformation {
    /// Build from raw server data, ordering pending operations for display.
    pub fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        let mut pending = snapshot.pending;
        pending.sort_by(snapshot_order);
        Self {
            current_operation: snapshot.current,
            operation_start_time: snapshot.current_started_at,
            pending_operations: pending,
        }
    }

    /// Operation in progress, if any.
    pub fn current_operation(&self) -> Option<&ReplicationOperation> {
        self.current_operation.as_ref()
    }

    /// Start time of the current operation.
    pub fn operation_start_time(&self) -> Option<DateTime<Utc>> {
        self.operation_start_time
    }

    /// Pending operations in snapshot order.
    pub fn pending_operations(&self) -> &[ReplicationOperation] {
        &self.pending_operations
    }

    /// True if nothing is running or waiting.
    pub fn is_idle(&self) -> bool {
        self.current_operation.is_none() && self.pending_operations.is_empty()
    }
}

/// Server-side queue bookkeeping: assigns FIFO numbers and moves work from
/// pending to current. Used by in-process directories.
#[derive(Debug, Default)]
pub struct OperationQueue {
    next_number: u32,
    current: Option<ReplicationOperation>,
    current_started_at: Option<DateTime<Utc>>,
    pending: Vec<ReplicationOperation>,
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an operation and return its number.
    pub fn enqueue(
        &mut self,
        operation_type: ReplicationOperationType,
        partition: impl Into<String>,
        source_server: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> u32 {
        self.next_number += 1;
        let number = self.next_number;
        self.pending.push(ReplicationOperation {
            time_enqueued: now,
            operation_number: number,
            priority,
            operation_type,
            partition: partition.into(),
            source_server: source_server.into(),
        });
        number
    }

    /// Promote the most urgent pending operation to current. Returns false
    /// if something is already running or nothing is waiting.
    pub fn start_next(&mut self, now: DateTime<Utc>) -> bool {
        if self.current.is_some() || self.pending.is_empty() {
            return false;
        }
        let idx = self
            .pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| snapshot_order(a, b))
            .map(|(i, _)| i);
        match idx {
            Some(i) => {
                self.current = Some(self.pending.remove(i));
                self.current_started_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Finish the current operation, removing it from the queue.
    pub fn complete_current(&mut self) -> Option<ReplicationOperation> {
        self.current_started_at = None;
        self.current.take()
    }

    /// Cancel a pending operation by number.
    pub fn cancel(&mut self, operation_number: u32) -> Option<ReplicationOperation> {
        let idx = self
            .pending
            .iter()
            .position(|op| op.operation_number == operation_number)?;
        Some(self.pending.remove(idx))
    }

    /// Number of pending operations.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Raw snapshot in FIFO order.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            current_started_at: self.current_started_at,
            pending: self.pending.clone(),
        }
    }
}

/// Read the session server's replication queue.
pub async fn get_replication_operation_information(
    session: &DirectorySession,
) -> Result<ReplicationOperationInformation> {
    let transport = session.transport()?;
    let server = session.server_name();
    let snapshot = transport.operation_queue(server).await.map_err(|e| {
        e.with_context(&ErrorContext::server(server).with_operation("operation queue"))
    })?;
    debug!(
        server = server,
        pending = snapshot.pending.len(),
        busy = snapshot.current.is_some(),
        "read replication queue"
    );
    Ok(ReplicationOperationInformation::from_snapshot(snapshot))
}

//! Replication cursors (up-to-dateness vector) of a destination server.
//!
//! A cursor records, per partition and source invocation id, the highest
//! originating USN the destination has accepted from that source.

use crate::error::{ErrorContext, Result};
use crate::session::DirectorySession;
use crate::types::{name_key, names_equal, InvocationId, Usn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One (partition, source) position known to a destination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCursor {
    /// Naming context the cursor belongs to.
    pub partition: String,
    /// Invocation id of the source database.
    pub source_invocation_id: InvocationId,
    /// Highest originating USN accepted from the source.
    pub up_to_date_usn: Usn,
    /// Source server name, if it still resolves.
    pub source_server: Option<String>,
    /// Last successful sync with the source; `None` when the server does
    /// not track it.
    pub last_successful_sync_time: Option<DateTime<Utc>>,
}

impl ReplicationCursor {
    /// Create a cursor with no known sync time.
    pub fn new(
        partition: impl Into<String>,
        source_invocation_id: InvocationId,
        up_to_date_usn: Usn,
        source_server: Option<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            source_invocation_id,
            up_to_date_usn,
            source_server,
            last_successful_sync_time: None,
        }
    }
}

/// Snapshot of all cursors for one partition, in the order the server returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCursorSet {
    partition: String,
    cursors: Vec<ReplicationCursor>,
}

impl ReplicationCursorSet {
    /// Wrap cursors read for `partition`.
    pub fn new(partition: impl Into<String>, cursors: Vec<ReplicationCursor>) -> Self {
        Self {
            partition: partition.into(),
            cursors,
        }
    }

    /// Partition this set was read for.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Cursor for a source invocation id.
    pub fn by_invocation(&self, id: &InvocationId) -> Option<&ReplicationCursor> {
        self.cursors.iter().find(|c| &c.source_invocation_id == id)
    }

    /// Cursor for a source server name, ignoring case.
    pub fn by_source(&self, server: &str) -> Option<&ReplicationCursor> {
        self.cursors.iter().find(|c| {
            c.source_server
                .as_deref()
                .map(|s| names_equal(s, server))
                .unwrap_or(false)
        })
    }

    /// Up-to-dateness USN for a source server, 0 when unknown.
    pub fn usn_for_source(&self, server: &str) -> Usn {
        self.by_source(server).map(|c| c.up_to_date_usn).unwrap_or(0)
    }

    /// Number of cursors.
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// True if no cursors are present.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Iterate cursors.
    pub fn iter(&self) -> impl Iterator<Item = &ReplicationCursor> {
        self.cursors.iter()
    }
}

/// A cursor that moved backwards between two reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRegression {
    /// Partition of the cursor.
    pub partition: String,
    /// Source invocation id.
    pub source_invocation_id: InvocationId,
    /// USN seen on the earlier read.
    pub previous: Usn,
    /// USN seen now.
    pub observed: Usn,
}

/// Tracks the highest cursor USN observed per (partition, source) across
/// successive reads and reports any that went backwards.
#[derive(Debug, Default)]
pub struct CursorTracker {
    high_water: HashMap<(String, InvocationId), Usn>,
}

impl CursorTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh cursor read. Returns cursors that regressed; the high
    /// water mark is never lowered.
    pub fn observe(&mut self, set: &ReplicationCursorSet) -> Vec<CursorRegression> {
        let mut regressions = Vec::new();
        for cursor in set.iter() {
            let key = (name_key(&cursor.partition), cursor.source_invocation_id);
            let previous = self.high_water.get(&key).copied().unwrap_or(0);
            if cursor.up_to_date_usn < previous {
                regressions.push(CursorRegression {
                    partition: cursor.partition.clone(),
                    source_invocation_id: cursor.source_invocation_id,
                    previous,
                    observed: cursor.up_to_date_usn,
                });
            } else {
                self.high_water.insert(key, cursor.up_to_date_usn);
            }
        }
        regressions
    }

    /// Highest USN observed for (partition, source).
    pub fn high_water(&self, partition: &str, source: &InvocationId) -> Usn {
        self.high_water
            .get(&(name_key(partition), *source))
            .copied()
            .unwrap_or(0)
    }

    /// Forget a source, e.g. after its database was restored under a new id.
    pub fn reset(&mut self, partition: &str, source: &InvocationId) {
        self.high_water.remove(&(name_key(partition), *source));
    }
}

/// Read the cursors the session's server holds for `partition`.
pub async fn get_replication_cursors(
    session: &DirectorySession,
    partition: &str,
) -> Result<ReplicationCursorSet> {
    let transport = session.transport()?;
    let server = session.server_name();
    let cursors = transport
        .replication_cursors(server, partition)
        .await
        .map_err(|e| {
            e.with_context(
                &ErrorContext::server(server)
                    .with_partition(partition)
                    .with_operation("replication cursors"),
            )
        })?;
    debug!(server = server, partition = partition, cursors = cursors.len(), "read replication cursors");
    Ok(ReplicationCursorSet::new(partition, cursors))
}

/// Read cursors and feed them to `tracker`, logging any regression.
pub async fn track_replication_cursors(
    session: &DirectorySession,
    partition: &str,
    tracker: &mut CursorTracker,
) -> Result<(ReplicationCursorSet, Vec<CursorRegression>)> {
    let set = get_replication_cursors(session, partition).await?;
    let regressions = tracker.observe(&set);
    for r in &regressions {
        warn!(
            server = session.server_name(),
            partition = %r.partition,
            source = %r.source_invocation_id,
            previous = r.previous,
            observed = r.observed,
            "replication cursor moved backwards"
        );
    }
    Ok((set, regressions))
}

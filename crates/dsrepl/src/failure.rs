//! Replication failure streaks.
//!
//! A [`ReplicationFailure`] describes consecutive failed syncs from one
//! source. The [`FailureLedger`] keeps the client-side view of those streaks
//! during a sync run: a failure extends the streak, a success clears it.

use crate::error::{ErrorContext, Result};
use crate::session::DirectorySession;
use crate::types::name_key;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Consecutive sync failures from one source server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationFailure {
    /// Source server the destination failed to sync from.
    pub source_server: String,
    /// Time of the first failure in the streak.
    pub first_failure_time: DateTime<Utc>,
    /// Failures since the last success.
    pub consecutive_failure_count: u32,
    /// Code of the most recent failure.
    pub last_error_code: u32,
    /// Text of the most recent failure.
    pub last_error_message: String,
}

impl ReplicationFailure {
    /// Start a new streak with one failure.
    pub fn first(
        source_server: impl Into<String>,
        at: DateTime<Utc>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_server: source_server.into(),
            first_failure_time: at,
            consecutive_failure_count: 1,
            last_error_code: code,
            last_error_message: message.into(),
        }
    }

    /// Extend the streak; the first-failure time is kept.
    pub fn record(&mut self, code: u32, message: impl Into<String>) {
        self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
        self.last_error_code = code;
        self.last_error_message = message.into();
    }
}

/// Failure streaks keyed by (destination, source). Updates for one pair are
/// serialized by the map's per-entry locking.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: DashMap<(String, String), (String, ReplicationFailure)>,
}

impl FailureLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load failures a destination server reported about its sources.
    pub fn seed(&self, destination: &str, failures: &[ReplicationFailure]) {
        for failure in failures {
            self.entries.insert(
                (name_key(destination), name_key(&failure.source_server)),
                (destination.to_string(), failure.clone()),
            );
        }
    }

    /// Record a failed sync of `destination` from `source`. Returns the new
    /// consecutive failure count.
    pub fn record_failure(
        &self,
        destination: &str,
        source: &str,
        code: u32,
        message: &str,
        at: DateTime<Utc>,
    ) -> u32 {
        let key = (name_key(destination), name_key(source));
        let mut entry = self.entries.entry(key).or_insert_with(|| {
            (
                destination.to_string(),
                ReplicationFailure {
                    source_server: source.to_string(),
                    first_failure_time: at,
                    consecutive_failure_count: 0,
                    last_error_code: code,
                    last_error_message: String::new(),
                },
            )
        });
        entry.1.record(code, message);
        let count = entry.1.consecutive_failure_count;
        debug!(
            destination = destination,
            source = source,
            count = count,
            code = code,
            "recorded replication failure"
        );
        count
    }

    /// Record a successful sync, clearing any streak. Returns the cleared streak.
    pub fn record_success(&self, destination: &str, source: &str) -> Option<ReplicationFailure> {
        let removed = self
            .entries
            .remove(&(name_key(destination), name_key(source)))
            .map(|(_, (_, failure))| failure);
        if let Some(f) = &removed {
            info!(
                destination = destination,
                source = source,
                cleared = f.consecutive_failure_count,
                "replication failure streak cleared"
            );
        }
        removed
    }

    /// Current streak, if any.
    pub fn get(&self, destination: &str, source: &str) -> Option<ReplicationFailure> {
        self.entries
            .get(&(name_key(destination), name_key(source)))
            .map(|e| e.value().1.clone())
    }

    /// Consecutive failures, 0 when there is no streak.
    pub fn consecutive_failures(&self, destination: &str, source: &str) -> u32 {
        self.get(destination, source)
            .map(|f| f.consecutive_failure_count)
            .unwrap_or(0)
    }

    /// Streaks recorded against `destination`, sorted by source.
    pub fn failures_for(&self, destination: &str) -> Vec<ReplicationFailure> {
        let key = name_key(destination);
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == key)
            .map(|e| e.value().1.clone())
            .collect();
        out.sort_by_key(|f| name_key(&f.source_server));
        out
    }

    /// Number of active streaks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no streaks are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read the failure streaks the session's server reports for its sources.
pub async fn get_replication_connection_failures(
    session: &DirectorySession,
) -> Result<Vec<ReplicationFailure>> {
    let transport = session.transport()?;
    let server = session.server_name();
    let failures = transport.connection_failures(server).await.map_err(|e| {
        e.with_context(&ErrorContext::server(server).with_operation("connection failures"))
    })?;
    debug!(server = server, failures = failures.len(), "read replication failures");
    Ok(failures)
}

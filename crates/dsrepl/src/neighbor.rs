//! Replication neighbors: the inbound agreements a server pulls from, and
//! the outbound references of servers that pull from it.

use crate::error::{ErrorContext, Result};
use crate::session::DirectorySession;
use crate::types::{InvocationId, Usn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Independent per-agreement toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborOptions {
    /// The local replica is writeable.
    pub writeable: bool,
    /// Sync when the server starts.
    pub sync_on_startup: bool,
    /// Notify the source to pull back after each sync.
    pub two_way_sync: bool,
    /// Compress changes on the wire.
    pub compress_changes: bool,
    /// Do not sync on the schedule.
    pub disable_scheduled_sync: bool,
}

/// One replication agreement between a server and a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationNeighbor {
    /// Naming context replicated over this agreement.
    pub partition: String,
    /// Partner server name. For inbound agreements this is the source; for
    /// outbound references it is the destination.
    pub partner_server: String,
    /// Site of the partner server, if known.
    pub partner_site: Option<String>,
    /// Invocation id of the partner database.
    pub partner_invocation_id: InvocationId,
    /// USN of the last object change synced from the partner.
    pub usn_last_object_change_synced: Usn,
    /// USN filter used for attributes.
    pub usn_attribute_filter: Usn,
    /// Last sync attempt.
    pub last_attempted_sync: Option<DateTime<Utc>>,
    /// Last sync that succeeded.
    pub last_successful_sync: Option<DateTime<Utc>>,
    /// Failures since the last success.
    pub consecutive_failure_count: u32,
    /// Result code of the last attempt (0 = success).
    pub last_sync_result: u32,
    /// Text of the last result.
    pub last_sync_message: String,
    /// Agreement toggles.
    pub options: NeighborOptions,
}

impl ReplicationNeighbor {
    /// New agreement with no sync history.
    pub fn new(
        partition: impl Into<String>,
        partner_server: impl Into<String>,
        partner_site: Option<String>,
        partner_invocation_id: InvocationId,
    ) -> Self {
        Self {
            partition: partition.into(),
            partner_server: partner_server.into(),
            partner_site,
            partner_invocation_id,
            usn_last_object_change_synced: 0,
            usn_attribute_filter: 0,
            last_attempted_sync: None,
            last_successful_sync: None,
            consecutive_failure_count: 0,
            last_sync_result: 0,
            last_sync_message: String::new(),
            options: NeighborOptions::default(),
        }
    }
}

/// Inbound neighbors of the session's server for `partition`.
pub async fn get_replication_neighbors(
    session: &DirectorySession,
    partition: &str,
) -> Result<Vec<ReplicationNeighbor>> {
    let transport = session.transport()?;
    let server = session.server_name();
    let neighbors = transport
        .replication_neighbors(server, Some(partition))
        .await
        .map_err(|e| {
            e.with_context(
                &ErrorContext::server(server)
                    .with_partition(partition)
                    .with_operation("replication neighbors"),
            )
        })?;
    debug!(server = server, partition = partition, neighbors = neighbors.len(), "read neighbors");
    Ok(neighbors)
}

/// Inbound neighbors of the session's server across all partitions.
pub async fn get_all_replication_neighbors(
    session: &DirectorySession,
) -> Result<Vec<ReplicationNeighbor>> {
    let transport = session.transport()?;
    let server = session.server_name();
    transport
        .replication_neighbors(server, None)
        .await
        .map_err(|e| {
            e.with_context(&ErrorContext::server(server).with_operation("replication neighbors"))
        })
}

/// Servers that pull `partition` from the session's server.
pub async fn get_replication_targets(
    session: &DirectorySession,
    partition: &str,
) -> Result<Vec<ReplicationNeighbor>> {
    let transport = session.transport()?;
    let server = session.server_name();
    transport
        .replication_targets(server, partition)
        .await
        .map_err(|e| {
            e.with_context(
                &ErrorContext::server(server)
                    .with_partition(partition)
                    .with_operation("replication targets"),
            )
        })
}

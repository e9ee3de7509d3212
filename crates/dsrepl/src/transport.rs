//! Directory protocol boundary.
//!
//! Everything this crate knows about a directory server goes through the
//! [`DirectoryTransport`] trait. A production deployment supplies an LDAP/DRS
//! client behind it; tests use [`crate::memory::InMemoryDirectory`].

use async_trait::async_trait;

use crate::context::{Credentials, DirectoryContext};
use crate::cursor::ReplicationCursor;
use crate::error::Result;
use crate::failure::ReplicationFailure;
use crate::metadata::AttributeMetadata;
use crate::neighbor::ReplicationNeighbor;
use crate::queue::QueueSnapshot;
use crate::session::ServerInfo;
use crate::trust::ForestTrustRelationshipInformation;
use crate::types::Usn;

/// Attribute name with its values as returned by a read.
pub type AttributeValues = (String, Vec<String>);

/// Operations a directory server exposes to this client.
///
/// Every call except `bind` names the server it is addressed to, so one
/// transport can reach the bound server and its replication partners.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    /// Resolve `context` to a server and authenticate against it.
    async fn bind(&self, context: &DirectoryContext, credentials: &Credentials) -> Result<ServerInfo>;

    /// Release the connection to `server`.
    async fn unbind(&self, server: &str) -> Result<()>;

    /// Read the named attributes of an object. Missing attributes are omitted.
    async fn read_attributes(
        &self,
        server: &str,
        dn: &str,
        attributes: &[&str],
    ) -> Result<Vec<AttributeValues>>;

    /// Per-attribute replication metadata of an object.
    async fn replication_metadata(&self, server: &str, dn: &str) -> Result<Vec<AttributeMetadata>>;

    /// Up-to-dateness cursors held by `server` for `partition`.
    async fn replication_cursors(&self, server: &str, partition: &str) -> Result<Vec<ReplicationCursor>>;

    /// Current replication queue of `server`.
    async fn operation_queue(&self, server: &str) -> Result<QueueSnapshot>;

    /// Failure streaks `server` records for its sources.
    async fn connection_failures(&self, server: &str) -> Result<Vec<ReplicationFailure>>;

    /// Inbound agreements of `server`, optionally limited to one partition.
    async fn replication_neighbors(
        &self,
        server: &str,
        partition: Option<&str>,
    ) -> Result<Vec<ReplicationNeighbor>>;

    /// Servers that pull `partition` from `server`.
    async fn replication_targets(&self, server: &str, partition: &str) -> Result<Vec<ReplicationNeighbor>>;

    /// Highest USN committed on `server`.
    async fn highest_committed_usn(&self, server: &str) -> Result<Usn>;

    /// Ask `server` to verify its replication topology.
    async fn check_consistency(&self, server: &str) -> Result<()>;

    /// Reachability probe.
    async fn probe(&self, server: &str) -> Result<()>;

    /// Make `destination` pull `partition` from `source`, blocking until done.
    async fn sync_replica(&self, destination: &str, partition: &str, source: &str) -> Result<()>;

    /// Ask `server` to queue pulls of `partition` from all its inbound neighbors.
    async fn trigger_sync_from_neighbors(&self, server: &str, partition: &str) -> Result<()>;

    /// Forest trust relationships known to `server`'s forest.
    async fn trust_relationships(&self, server: &str) -> Result<Vec<ForestTrustRelationshipInformation>>;

    /// Replace one forest trust relationship. Must apply all of it or none.
    async fn write_trust(&self, server: &str, trust: &ForestTrustRelationshipInformation) -> Result<()>;
}

//! Directory session: one authenticated connection to a resolved server.
//!
//! Every read and control operation in this crate takes a live
//! [`DirectorySession`]. Once [`DirectorySession::close`] has run, all of them
//! fail with [`DirectoryError::SessionClosed`].

use crate::config::SessionConfig;
use crate::context::{Credentials, DirectoryContext};
use crate::error::{DirectoryError, ErrorContext, Result};
use crate::transport::{AttributeValues, DirectoryTransport};
use crate::types::{names_equal, InvocationId, Usn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optional server features discovered at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Cursors carry a last-successful-sync time.
    pub last_sync_time: bool,
    /// The server can report its replication queue.
    pub operation_queue: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            last_sync_time: true,
            operation_queue: true,
        }
    }
}

/// Facts about the server a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server DNS name.
    pub name: String,
    /// Site the server belongs to.
    pub site: Option<String>,
    /// Domain the server hosts.
    pub domain: String,
    /// Forest the server belongs to.
    pub forest: String,
    /// Current invocation id of the server database.
    pub invocation_id: InvocationId,
    /// Negotiated capabilities.
    pub capabilities: ServerCapabilities,
    /// Naming contexts hosted by the server.
    pub partitions: Vec<String>,
}

impl ServerInfo {
    /// True if the server hosts `partition`.
    pub fn hosts_partition(&self, partition: &str) -> bool {
        self.partitions.iter().any(|p| names_equal(p, partition))
    }
}

/// A bound session against one directory server.
pub struct DirectorySession {
    transport: Arc<dyn DirectoryTransport>,
    context: DirectoryContext,
    server: ServerInfo,
    closed: AtomicBool,
}

impl std::fmt::Debug for DirectorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySession")
            .field("context", &self.context)
            .field("server", &self.server.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DirectorySession {
    /// Resolve `context`, bind with `credentials` and negotiate capabilities.
    pub async fn open(
        transport: Arc<dyn DirectoryTransport>,
        context: DirectoryContext,
        credentials: &Credentials,
        config: &SessionConfig,
    ) -> Result<Self> {
        if context.name.trim().is_empty() {
            return Err(DirectoryError::UnsupportedContext {
                kind: context.kind.to_string(),
                name: context.name.clone(),
                reason: "empty context name".to_string(),
            });
        }

        let server = transport.bind(&context, credentials).await?;

        if config.require_last_sync_time && !server.capabilities.last_sync_time {
            if let Err(e) = transport.unbind(&server.name).await {
                warn!(server = %server.name, error = %e, "unbind after capability check failed");
            }
            return Err(DirectoryError::UnsupportedContext {
                kind: context.kind.to_string(),
                name: context.name.clone(),
                reason: format!("{} does not report last successful sync times", server.name),
            });
        }

        info!(
            context = %context,
            server = %server.name,
            site = server.site.as_deref().unwrap_or("-"),
            "directory session opened"
        );

        Ok(Self {
            transport,
            context,
            server,
            closed: AtomicBool::new(false),
        })
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.transport.unbind(&self.server.name).await {
            warn!(server = %self.server.name, error = %e, "unbind failed, session closed anyway");
        }
        info!(server = %self.server.name, "directory session closed");
        Ok(())
    }

    /// True after `close()`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Transport handle, or `SessionClosed` once closed.
    pub fn transport(&self) -> Result<&Arc<dyn DirectoryTransport>> {
        if self.is_closed() {
            return Err(DirectoryError::SessionClosed {
                server: self.server.name.clone(),
            });
        }
        Ok(&self.transport)
    }

    /// Context this session was opened for.
    pub fn context(&self) -> &DirectoryContext {
        &self.context
    }

    /// Bound server facts.
    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Bound server name.
    pub fn server_name(&self) -> &str {
        &self.server.name
    }

    /// Read attributes of an object on the bound server.
    pub async fn read_attributes(&self, dn: &str, attributes: &[&str]) -> Result<Vec<AttributeValues>> {
        let transport = self.transport()?;
        transport
            .read_attributes(&self.server.name, dn, attributes)
            .await
            .map_err(|e| e.with_context(&self.ctx("read attributes")))
    }

    /// Current highest committed USN of the bound server.
    pub async fn highest_committed_usn(&self) -> Result<Usn> {
        let transport = self.transport()?;
        transport
            .highest_committed_usn(&self.server.name)
            .await
            .map_err(|e| e.with_context(&self.ctx("highest committed usn")))
    }

    /// Run the server's replication topology consistency check.
    pub async fn check_replication_consistency(&self) -> Result<()> {
        let transport = self.transport()?;
        transport
            .check_consistency(&self.server.name)
            .await
            .map_err(|e| e.with_context(&self.ctx("consistency check")))?;
        debug!(server = %self.server.name, "replication consistency check passed");
        Ok(())
    }

    /// Pull `partition` from `source` into the bound server, synchronously.
    pub async fn sync_replica_from_server(&self, partition: &str, source: &str) -> Result<()> {
        let transport = self.transport()?;
        transport
            .sync_replica(&self.server.name, partition, source)
            .await
            .map_err(|e| {
                e.with_context(
                    &self
                        .ctx("sync")
                        .with_source(source)
                        .with_partition(partition),
                )
            })?;
        info!(server = %self.server.name, source = source, partition = partition, "replica synced");
        Ok(())
    }

    /// Ask the bound server to pull `partition` from every inbound neighbor.
    /// Returns once the work is queued.
    pub async fn trigger_sync_replica_from_neighbors(&self, partition: &str) -> Result<()> {
        let transport = self.transport()?;
        transport
            .trigger_sync_from_neighbors(&self.server.name, partition)
            .await
            .map_err(|e| e.with_context(&self.ctx("trigger sync").with_partition(partition)))?;
        info!(server = %self.server.name, partition = partition, "neighbor sync triggered");
        Ok(())
    }

    fn ctx(&self, operation: &str) -> ErrorContext {
        ErrorContext::server(self.server.name.clone()).with_operation(operation)
    }
}

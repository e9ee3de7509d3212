//! Error types for directory replication operations.

use crate::trust::ForestTrustRelationshipCollision;
use std::fmt;
use thiserror::Error;

/// Server result code: the RPC server is unavailable.
pub const RPC_SERVER_UNAVAILABLE: u32 = 1722;
/// Server result code: the request is not supported.
pub const NOT_SUPPORTED: u32 = 50;
/// Server result code: generic replication failure.
pub const DRA_GENERIC_FAILURE: u32 = 8418;

/// Machine-checkable classification of a [`DirectoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network failure reaching a directory server.
    Connection,
    /// The server rejected the supplied credentials.
    Authentication,
    /// The requested context kind cannot be resolved.
    UnsupportedContext,
    /// The session was used after `close()`.
    SessionClosed,
    /// A DN, partition or trust object does not exist.
    ObjectNotFound,
    /// A bulk export destination is too small.
    BufferTooSmall,
    /// A bulk export start offset is invalid.
    IndexOutOfRange,
    /// Generic server-side fault.
    Operation,
    /// A replication partner did not answer its reachability probe.
    UnreachablePartner,
    /// A trust save was rejected because of namespace collisions.
    Collision,
}

/// Where in a query or traversal an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Server the request was addressed to.
    pub target_server: Option<String>,
    /// Source server of a replication step.
    pub source_server: Option<String>,
    /// Naming context involved.
    pub partition: Option<String>,
    /// Operation that failed (e.g. "sync", "probe").
    pub operation: Option<String>,
}

impl ErrorContext {
    /// Context naming only the target server.
    pub fn server(target: impl Into<String>) -> Self {
        Self {
            target_server: Some(target.into()),
            ..Default::default()
        }
    }

    /// Set the source server.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_server = Some(source.into());
        self
    }

    /// Set the partition.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Fill every unset field from `other`.
    pub fn merge(&mut self, other: &ErrorContext) {
        if self.target_server.is_none() {
            self.target_server = other.target_server.clone();
        }
        if self.source_server.is_none() {
            self.source_server = other.source_server.clone();
        }
        if self.partition.is_none() {
            self.partition = other.partition.clone();
        }
        if self.operation.is_none() {
            self.operation = other.operation.clone();
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(op) = &self.operation {
            parts.push(format!("op={}", op));
        }
        if let Some(target) = &self.target_server {
            parts.push(format!("target={}", target));
        }
        if let Some(source) = &self.source_server {
            parts.push(format!("source={}", source));
        }
        if let Some(partition) = &self.partition {
            parts.push(format!("partition={}", partition));
        }
        if parts.is_empty() {
            write!(f, "no context")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors surfaced by sessions, readers, the sync orchestrator and trust saves.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectoryError {
    /// Network failure talking to a server.
    #[error("cannot connect to {server}: {reason}")]
    Connection {
        /// Server that could not be reached.
        server: String,
        /// Transport-level description.
        reason: String,
    },

    /// Credential rejection.
    #[error("authentication failed for '{user}' on {server}")]
    Authentication {
        /// Server that rejected the bind.
        server: String,
        /// User name presented (empty for integrated credentials).
        user: String,
    },

    /// The context kind cannot be resolved.
    #[error("cannot resolve {kind} context '{name}': {reason}")]
    UnsupportedContext {
        /// Context kind as text.
        kind: String,
        /// Context name.
        name: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The session has been closed.
    #[error("session to {server} is closed")]
    SessionClosed {
        /// Server the session was bound to.
        server: String,
    },

    /// An object does not resolve on the server.
    #[error("object '{dn}' not found on {server}")]
    ObjectNotFound {
        /// Distinguished name (or trust target name) looked up.
        dn: String,
        /// Server queried.
        server: String,
    },

    /// Destination buffer too small for a bulk export.
    #[error("destination holds {available} entries past the offset, {needed} required")]
    BufferTooSmall {
        /// Entries to be written.
        needed: usize,
        /// Room left after the start offset.
        available: usize,
    },

    /// Invalid start offset for a bulk export.
    #[error("start offset {index} is out of range for a destination of length {len}")]
    IndexOutOfRange {
        /// Offending offset.
        index: usize,
        /// Destination length.
        len: usize,
    },

    /// Generic server-side fault with the server's code and text.
    #[error("operation failed with code {code}: {message} ({context})")]
    Operation {
        /// Server-reported error code.
        code: u32,
        /// Server-reported text.
        message: String,
        /// Where the fault happened.
        context: ErrorContext,
    },

    /// A replication partner is unreachable.
    #[error("replication partner {partner} is unreachable ({context})")]
    UnreachablePartner {
        /// Partner that failed its probe.
        partner: String,
        /// Where the probe happened.
        context: ErrorContext,
    },

    /// A trust save was rejected because of collisions.
    #[error("trust update for '{target_forest}' rejected: {} collision(s)", .collisions.len())]
    Collision {
        /// Target forest of the rejected update.
        target_forest: String,
        /// Offending entries.
        collisions: Vec<ForestTrustRelationshipCollision>,
    },
}

impl DirectoryError {
    /// Machine-checkable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::Connection { .. } => ErrorKind::Connection,
            DirectoryError::Authentication { .. } => ErrorKind::Authentication,
            DirectoryError::UnsupportedContext { .. } => ErrorKind::UnsupportedContext,
            DirectoryError::SessionClosed { .. } => ErrorKind::SessionClosed,
            DirectoryError::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            DirectoryError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            DirectoryError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            DirectoryError::Operation { .. } => ErrorKind::Operation,
            DirectoryError::UnreachablePartner { .. } => ErrorKind::UnreachablePartner,
            DirectoryError::Collision { .. } => ErrorKind::Collision,
        }
    }

    /// Shorthand for an [`DirectoryError::Operation`].
    pub fn operation(code: u32, message: impl Into<String>, context: ErrorContext) -> Self {
        DirectoryError::Operation {
            code,
            message: message.into(),
            context,
        }
    }

    /// True for faults that invalidate the whole session rather than one step.
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::SessionClosed | ErrorKind::Authentication
        )
    }

    /// Server the error is attributed to, when known.
    pub fn server(&self) -> Option<&str> {
        match self {
            DirectoryError::Connection { server, .. }
            | DirectoryError::Authentication { server, .. }
            | DirectoryError::SessionClosed { server }
            | DirectoryError::ObjectNotFound { server, .. } => Some(server),
            DirectoryError::Operation { context, .. } => context.target_server.as_deref(),
            DirectoryError::UnreachablePartner { partner, .. } => Some(partner),
            _ => None,
        }
    }

    /// Server-reported error code, for kinds that carry one.
    pub fn code(&self) -> Option<u32> {
        match self {
            DirectoryError::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Fill missing context fields on context-carrying variants.
    pub fn with_context(mut self, ctx: &ErrorContext) -> Self {
        match &mut self {
            DirectoryError::Operation { context, .. }
            | DirectoryError::UnreachablePartner { context, .. } => context.merge(ctx),
            _ => {}
        }
        self
    }
}

/// Result type for directory replication operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

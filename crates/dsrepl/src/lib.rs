#![warn(missing_docs)]

//! dsrepl: directory replication metadata client. Sessions against directory
//! servers, per-attribute replication metadata, cursors, operation queues,
//! failure tracking, multi-server sync orchestration and forest trust
//! collision checks.

pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod failure;
pub mod memory;
pub mod metadata;
pub mod neighbor;
pub mod orchestrator;
pub mod queue;
pub mod session;
pub mod telemetry;
pub mod topology;
pub mod transport;
pub mod trust;
pub mod types;

pub use context::{ContextKind, Credentials, DirectoryContext};
pub use error::{DirectoryError, ErrorContext, ErrorKind, Result};
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
pub use session::DirectorySession;
pub use transport::DirectoryTransport;

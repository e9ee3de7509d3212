//! Shared fixtures for the dsrepl integration tests.

#![allow(dead_code)]

use dsrepl::config::SessionConfig;
use dsrepl::memory::{InMemoryDirectory, MemoryServer};
use dsrepl::{Credentials, DirectoryContext, DirectorySession};
use std::sync::Arc;

pub const NC: &str = "DC=corp,DC=example";
pub const DOMAIN: &str = "corp.example";

/// A directory with a home server and the given inbound partners, all in one site.
pub async fn hub(partners: &[&str]) -> Arc<InMemoryDirectory> {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.add_server(server("home")).await;
    for p in partners {
        dir.add_server(server(p)).await;
        dir.link("home", p, NC).await.unwrap();
    }
    dir
}

pub fn server(name: &str) -> MemoryServer {
    MemoryServer::new(name, DOMAIN, DOMAIN)
        .with_site("Default-First-Site-Name")
        .with_partition(NC)
}

pub async fn session_on(dir: &Arc<InMemoryDirectory>, server: &str) -> Arc<DirectorySession> {
    let session = DirectorySession::open(
        dir.clone(),
        DirectoryContext::server(server),
        &Credentials::integrated(),
        &SessionConfig::default(),
    )
    .await
    .unwrap();
    Arc::new(session)
}

/// (event, target, source) as owned strings.
pub type Event = (dsrepl::orchestrator::SyncEventKind, String, String);

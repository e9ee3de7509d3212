//! In-process directory that implements [`DirectoryTransport`].
//!
//! Servers, objects, replication agreements and forest trusts live in memory.
//! Replication follows the real model closely enough to test against:
//! originating writes bump the server USN and attribute versions, a sync
//! merges newer attribute metadata and advances the destination's cursors,
//! and failed syncs extend server-side failure streaks. Servers can be made
//! unreachable and individual syncs can be forced to fail.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::{ContextKind, Credentials, DirectoryContext};
use crate::cursor::ReplicationCursor;
use crate::error::{DirectoryError, ErrorContext, Result, NOT_SUPPORTED, RPC_SERVER_UNAVAILABLE};
use crate::failure::ReplicationFailure;
use crate::metadata::AttributeMetadata;
use crate::neighbor::ReplicationNeighbor;
use crate::queue::{OperationQueue, QueueSnapshot, ReplicationOperationType};
use crate::session::{ServerCapabilities, ServerInfo};
use crate::transport::{AttributeValues, DirectoryTransport};
use crate::trust::{trust_key, CollisionEvaluator, ForestTrustRelationshipInformation};
use crate::types::{dn_in_partition, name_key, names_equal, InvocationId, Usn};

/// Priority given to syncs queued by a neighbor trigger.
const TRIGGERED_SYNC_PRIORITY: i32 = 10;

/// Description of a server to add to an [`InMemoryDirectory`].
#[derive(Debug, Clone)]
pub struct MemoryServer {
    info: ServerInfo,
    configuration_set: Option<String>,
}

impl MemoryServer {
    /// A reachable server with a fresh invocation id and full capabilities.
    pub fn new(name: impl Into<String>, domain: impl Into<String>, forest: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                site: None,
                domain: domain.into(),
                forest: forest.into(),
                invocation_id: InvocationId::new_random(),
                capabilities: ServerCapabilities::default(),
                partitions: Vec::new(),
            },
            configuration_set: None,
        }
    }

    /// Place the server in a site.
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.info.site = Some(site.into());
        self
    }

    /// Host a naming context.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.info.partitions.push(partition.into());
        self
    }

    /// Use a fixed invocation id.
    pub fn with_invocation_id(mut self, id: InvocationId) -> Self {
        self.info.invocation_id = id;
        self
    }

    /// Override negotiated capabilities.
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    /// Make the server an instance of a configuration set.
    pub fn in_configuration_set(mut self, name: impl Into<String>) -> Self {
        self.configuration_set = Some(name.into());
        self
    }
}

/// One `sync_replica` call as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAttempt {
    /// Destination server.
    pub destination: String,
    /// Partition synced.
    pub partition: String,
    /// Source server.
    pub source: String,
    /// Whether it succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
struct ObjectRecord {
    dn: String,
    values: Vec<AttributeValues>,
    metadata: Vec<AttributeMetadata>,
}

#[derive(Debug)]
struct ServerState {
    info: ServerInfo,
    configuration_set: Option<String>,
    reachable: bool,
    binds: u32,
    highest_usn: Usn,
    objects: HashMap<String, ObjectRecord>,
    cursors: Vec<ReplicationCursor>,
    neighbors: Vec<ReplicationNeighbor>,
    queue: OperationQueue,
    failures: HashMap<String, ReplicationFailure>,
    sync_faults: HashMap<String, (u32, String)>,
    consistency_fault: Option<(u32, String)>,
}

impl ServerState {
    fn new(server: MemoryServer) -> Self {
        Self {
            info: server.info,
            configuration_set: server.configuration_set,
            reachable: true,
            binds: 0,
            highest_usn: 0,
            objects: HashMap::new(),
            cursors: Vec::new(),
            neighbors: Vec::new(),
            queue: OperationQueue::new(),
            failures: HashMap::new(),
            sync_faults: HashMap::new(),
            consistency_fault: None,
        }
    }

    fn advance_cursor(&mut self, partition: &str, source: InvocationId, usn: Usn, source_name: Option<&str>) {
        let now = Utc::now();
        match self
            .cursors
            .iter_mut()
            .find(|c| names_equal(&c.partition, partition) && c.source_invocation_id == source)
        {
            Some(c) => {
                c.up_to_date_usn = c.up_to_date_usn.max(usn);
                if c.source_server.is_none() {
                    c.source_server = source_name.map(str::to_string);
                }
                c.last_successful_sync_time = Some(now);
            }
            None => {
                let mut c = ReplicationCursor::new(partition, source, usn, source_name.map(str::to_string));
                c.last_successful_sync_time = Some(now);
                self.cursors.push(c);
            }
        }
    }

    fn record_sync_failure(&mut self, partition: &str, source: &str, code: u32, message: &str) {
        let now = Utc::now();
        self.failures
            .entry(name_key(source))
            .and_modify(|f| f.record(code, message))
            .or_insert_with(|| ReplicationFailure::first(source, now, code, message));
        if let Some(n) = self.neighbor_mut(partition, source) {
            n.last_attempted_sync = Some(now);
            n.consecutive_failure_count += 1;
            n.last_sync_result = code;
            n.last_sync_message = message.to_string();
        }
    }

    fn neighbor_mut(&mut self, partition: &str, source: &str) -> Option<&mut ReplicationNeighbor> {
        self.neighbors
            .iter_mut()
            .find(|n| names_equal(&n.partition, partition) && names_equal(&n.partner_server, source))
    }
}

#[derive(Debug, Default)]
struct State {
    servers: HashMap<String, ServerState>,
    order: Vec<String>,
    accounts: HashMap<String, String>,
    trusts: HashMap<String, Vec<ForestTrustRelationshipInformation>>,
    sync_log: Vec<SyncAttempt>,
    probes: u64,
}

impl State {
    fn server(&self, name: &str) -> Result<&ServerState> {
        self.servers
            .get(&name_key(name))
            .ok_or_else(|| DirectoryError::Connection {
                server: name.to_string(),
                reason: "host not found".to_string(),
            })
    }

    fn reachable(&self, name: &str) -> Result<&ServerState> {
        let s = self.server(name)?;
        if !s.reachable {
            return Err(DirectoryError::Connection {
                server: s.info.name.clone(),
                reason: "server is not responding".to_string(),
            });
        }
        Ok(s)
    }

    fn reachable_mut(&mut self, name: &str) -> Result<&mut ServerState> {
        let s = self
            .servers
            .get_mut(&name_key(name))
            .ok_or_else(|| DirectoryError::Connection {
                server: name.to_string(),
                reason: "host not found".to_string(),
            })?;
        if !s.reachable {
            return Err(DirectoryError::Connection {
                server: s.info.name.clone(),
                reason: "server is not responding".to_string(),
            });
        }
        Ok(s)
    }

    fn resolve(&self, context: &DirectoryContext) -> Result<&ServerState> {
        let unsupported = |reason: &str| DirectoryError::UnsupportedContext {
            kind: context.kind.to_string(),
            name: context.name.clone(),
            reason: reason.to_string(),
        };

        if context.kind == ContextKind::DirectoryServer {
            return self.reachable(&context.name);
        }

        let candidates: Vec<&ServerState> = self
            .order
            .iter()
            .filter_map(|k| self.servers.get(k))
            .filter(|s| match context.kind {
                ContextKind::Domain => names_equal(&s.info.domain, &context.name),
                ContextKind::Forest => names_equal(&s.info.forest, &context.name),
                ContextKind::ConfigurationSet => s
                    .configuration_set
                    .as_deref()
                    .map(|c| names_equal(c, &context.name))
                    .unwrap_or(false),
                ContextKind::DirectoryServer => false,
            })
            .collect();

        if candidates.is_empty() {
            return Err(unsupported("no server holds this context"));
        }
        candidates
            .into_iter()
            .find(|s| s.reachable)
            .ok_or_else(|| DirectoryError::Connection {
                server: context.name.clone(),
                reason: "no server for this context is responding".to_string(),
            })
    }
}

/// An in-memory directory of servers, objects, agreements and trusts.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<State>,
}

impl InMemoryDirectory {
    /// Empty directory. With no accounts registered every credential is accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server.
    pub async fn add_server(&self, server: MemoryServer) {
        let mut state = self.state.write().await;
        let key = name_key(&server.info.name);
        if !state.servers.contains_key(&key) {
            state.order.push(key.clone());
        }
        state.servers.insert(key, ServerState::new(server));
    }

    /// Register an account; once any exist, explicit credentials must match one.
    pub async fn add_account(&self, username: &str, password: &str) {
        let mut state = self.state.write().await;
        state.accounts.insert(name_key(username), password.to_string());
    }

    /// Make a server reachable or not.
    pub async fn set_reachable(&self, server: &str, reachable: bool) {
        let mut state = self.state.write().await;
        if let Some(s) = state.servers.get_mut(&name_key(server)) {
            s.reachable = reachable;
        }
    }

    /// Originating write of one attribute on `server`. Creates the object if
    /// needed. Returns the USN stamped on the change.
    pub async fn write_attribute(&self, server: &str, dn: &str, attribute: &str, values: &[&str]) -> Result<Usn> {
        let mut state = self.state.write().await;
        let s = state.reachable_mut(server)?;
        s.highest_usn += 1;
        let usn = s.highest_usn;
        let invocation = s.info.invocation_id;
        let origin = s.info.name.clone();

        let obj = s.objects.entry(name_key(dn)).or_insert_with(|| ObjectRecord {
            dn: dn.to_string(),
            values: Vec::new(),
            metadata: Vec::new(),
        });
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        match obj.values.iter_mut().find(|(n, _)| names_equal(n, attribute)) {
            Some(slot) => slot.1 = values,
            None => obj.values.push((attribute.to_string(), values)),
        }

        let now = Utc::now();
        match obj.metadata.iter_mut().find(|m| names_equal(&m.name, attribute)) {
            Some(m) => {
                m.version += 1;
                m.last_originating_change_time = now;
                m.originating_invocation_id = invocation;
                m.originating_change_usn = usn;
                m.local_change_usn = usn;
                m.originating_server = origin;
            }
            None => obj.metadata.push(AttributeMetadata {
                name: attribute.to_string(),
                version: 1,
                last_originating_change_time: now,
                originating_invocation_id: invocation,
                originating_change_usn: usn,
                local_change_usn: usn,
                originating_server: origin,
            }),
        }
        Ok(usn)
    }

    /// Create an inbound agreement: `destination` pulls `partition` from `source`.
    pub async fn link(&self, destination: &str, source: &str, partition: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let (site, invocation, source_name) = {
            let src = state.server(source)?;
            (src.info.site.clone(), src.info.invocation_id, src.info.name.clone())
        };
        let dest = state
            .servers
            .get_mut(&name_key(destination))
            .ok_or_else(|| DirectoryError::Connection {
                server: destination.to_string(),
                reason: "host not found".to_string(),
            })?;
        if dest.neighbor_mut(partition, source).is_none() {
            dest.neighbors
                .push(ReplicationNeighbor::new(partition, source_name, site, invocation));
        }
        Ok(())
    }

    /// Force every sync of `destination` from `source` to fail.
    pub async fn fail_sync(&self, destination: &str, source: &str, code: u32, message: &str) {
        let mut state = self.state.write().await;
        if let Some(d) = state.servers.get_mut(&name_key(destination)) {
            d.sync_faults
                .insert(name_key(source), (code, message.to_string()));
        }
    }

    /// Remove a forced sync failure.
    pub async fn clear_sync_fault(&self, destination: &str, source: &str) {
        let mut state = self.state.write().await;
        if let Some(d) = state.servers.get_mut(&name_key(destination)) {
            d.sync_faults.remove(&name_key(source));
        }
    }

    /// Make the consistency check on `server` fail.
    pub async fn fail_consistency_check(&self, server: &str, code: u32, message: &str) {
        let mut state = self.state.write().await;
        if let Some(s) = state.servers.get_mut(&name_key(server)) {
            s.consistency_fault = Some((code, message.to_string()));
        }
    }

    /// Store a trust without collision checks.
    pub async fn add_trust(&self, forest: &str, trust: ForestTrustRelationshipInformation) {
        let mut state = self.state.write().await;
        state.trusts.entry(name_key(forest)).or_default().push(trust);
    }

    /// Queue an operation on `server`.
    pub async fn enqueue_operation(
        &self,
        server: &str,
        operation_type: ReplicationOperationType,
        partition: &str,
        source: &str,
        priority: i32,
    ) -> Result<u32> {
        let mut state = self.state.write().await;
        let s = state.reachable_mut(server)?;
        Ok(s.queue.enqueue(operation_type, partition, source, priority, Utc::now()))
    }

    /// Move the most urgent queued operation on `server` to in-flight.
    pub async fn start_next_operation(&self, server: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let s = state.reachable_mut(server)?;
        Ok(s.queue.start_next(Utc::now()))
    }

    /// Every `sync_replica` call so far, in order.
    pub async fn sync_log(&self) -> Vec<SyncAttempt> {
        self.state.read().await.sync_log.clone()
    }

    /// Number of reachability probes served.
    pub async fn probe_count(&self) -> u64 {
        self.state.read().await.probes
    }

    /// Open binds on `server`.
    pub async fn open_binds(&self, server: &str) -> u32 {
        let state = self.state.read().await;
        state.servers.get(&name_key(server)).map(|s| s.binds).unwrap_or(0)
    }

    fn authenticate(state: &State, server: &str, credentials: &Credentials) -> Result<()> {
        if credentials.is_integrated() || state.accounts.is_empty() {
            return Ok(());
        }
        match state.accounts.get(&name_key(credentials.username())) {
            Some(pw) if pw == credentials.password() => Ok(()),
            _ => Err(DirectoryError::Authentication {
                server: server.to_string(),
                user: credentials.username().to_string(),
            }),
        }
    }
}

#[async_trait]
impl DirectoryTransport for InMemoryDirectory {
    async fn bind(&self, context: &DirectoryContext, credentials: &Credentials) -> Result<ServerInfo> {
        let mut state = self.state.write().await;
        let info = state.resolve(context)?.info.clone();
        Self::authenticate(&state, &info.name, credentials)?;
        if let Some(s) = state.servers.get_mut(&name_key(&info.name)) {
            s.binds += 1;
        }
        debug!(server = %info.name, context = %context, "bound");
        Ok(info)
    }

    async fn unbind(&self, server: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(s) = state.servers.get_mut(&name_key(server)) {
            s.binds = s.binds.saturating_sub(1);
        }
        Ok(())
    }

    async fn read_attributes(&self, server: &str, dn: &str, attributes: &[&str]) -> Result<Vec<AttributeValues>> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        let obj = s.objects.get(&name_key(dn)).ok_or_else(|| DirectoryError::ObjectNotFound {
            dn: dn.to_string(),
            server: s.info.name.clone(),
        })?;
        Ok(obj
            .values
            .iter()
            .filter(|(name, _)| attributes.iter().any(|a| names_equal(a, name)))
            .cloned()
            .collect())
    }

    async fn replication_metadata(&self, server: &str, dn: &str) -> Result<Vec<AttributeMetadata>> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        s.objects
            .get(&name_key(dn))
            .map(|o| o.metadata.clone())
            .ok_or_else(|| DirectoryError::ObjectNotFound {
                dn: dn.to_string(),
                server: s.info.name.clone(),
            })
    }

    async fn replication_cursors(&self, server: &str, partition: &str) -> Result<Vec<ReplicationCursor>> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        if !s.info.hosts_partition(partition) {
            return Err(DirectoryError::ObjectNotFound {
                dn: partition.to_string(),
                server: s.info.name.clone(),
            });
        }
        let keep_time = s.info.capabilities.last_sync_time;
        Ok(s.cursors
            .iter()
            .filter(|c| names_equal(&c.partition, partition))
            .cloned()
            .map(|mut c| {
                if !keep_time {
                    c.last_successful_sync_time = None;
                }
                c
            })
            .collect())
    }

    async fn operation_queue(&self, server: &str) -> Result<QueueSnapshot> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        if !s.info.capabilities.operation_queue {
            return Err(DirectoryError::operation(
                NOT_SUPPORTED,
                "the request is not supported",
                ErrorContext::server(s.info.name.clone()),
            ));
        }
        Ok(s.queue.snapshot())
    }

    async fn connection_failures(&self, server: &str) -> Result<Vec<ReplicationFailure>> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        let mut failures: Vec<_> = s.failures.values().cloned().collect();
        failures.sort_by_key(|f| name_key(&f.source_server));
        Ok(failures)
    }

    async fn replication_neighbors(&self, server: &str, partition: Option<&str>) -> Result<Vec<ReplicationNeighbor>> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        Ok(s.neighbors
            .iter()
            .filter(|n| partition.map(|p| names_equal(&n.partition, p)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn replication_targets(&self, server: &str, partition: &str) -> Result<Vec<ReplicationNeighbor>> {
        let state = self.state.read().await;
        let home = state.reachable(server)?;
        let home_name = home.info.name.clone();
        let mut targets = Vec::new();
        for key in &state.order {
            let Some(dest) = state.servers.get(key) else { continue };
            for n in &dest.neighbors {
                if names_equal(&n.partition, partition) && names_equal(&n.partner_server, &home_name) {
                    let mut t = ReplicationNeighbor::new(
                        partition,
                        dest.info.name.clone(),
                        dest.info.site.clone(),
                        dest.info.invocation_id,
                    );
                    t.options = n.options.clone();
                    targets.push(t);
                }
            }
        }
        Ok(targets)
    }

    async fn highest_committed_usn(&self, server: &str) -> Result<Usn> {
        let state = self.state.read().await;
        Ok(state.reachable(server)?.highest_usn)
    }

    async fn check_consistency(&self, server: &str) -> Result<()> {
        let state = self.state.read().await;
        let s = state.reachable(server)?;
        match &s.consistency_fault {
            Some((code, message)) => Err(DirectoryError::operation(
                *code,
                message.clone(),
                ErrorContext::server(s.info.name.clone()).with_operation("consistency check"),
            )),
            None => Ok(()),
        }
    }

    async fn probe(&self, server: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.probes += 1;
        state.reachable(server).map(|_| ())
    }

    async fn sync_replica(&self, destination: &str, partition: &str, source: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let result = Self::apply_sync(&mut state, destination, partition, source);
        state.sync_log.push(SyncAttempt {
            destination: destination.to_string(),
            partition: partition.to_string(),
            source: source.to_string(),
            succeeded: result.is_ok(),
        });
        result
    }

    async fn trigger_sync_from_neighbors(&self, server: &str, partition: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let s = state.reachable_mut(server)?;
        if !s.info.hosts_partition(partition) {
            return Err(DirectoryError::ObjectNotFound {
                dn: partition.to_string(),
                server: s.info.name.clone(),
            });
        }
        let now = Utc::now();
        let sources: Vec<String> = s
            .neighbors
            .iter()
            .filter(|n| names_equal(&n.partition, partition))
            .map(|n| n.partner_server.clone())
            .collect();
        for source in sources {
            s.queue.enqueue(
                ReplicationOperationType::Sync,
                partition,
                source,
                TRIGGERED_SYNC_PRIORITY,
                now,
            );
        }
        Ok(())
    }

    async fn trust_relationships(&self, server: &str) -> Result<Vec<ForestTrustRelationshipInformation>> {
        let state = self.state.read().await;
        let forest = name_key(&state.reachable(server)?.info.forest);
        Ok(state.trusts.get(&forest).cloned().unwrap_or_default())
    }

    async fn write_trust(&self, server: &str, trust: &ForestTrustRelationshipInformation) -> Result<()> {
        let mut state = self.state.write().await;
        let forest = name_key(&state.reachable(server)?.info.forest);
        let stored = state.trusts.entry(forest).or_default();
        let key = trust_key(trust);

        // Attribute-only updates leave the claimed namespace alone.
        let flags_only = stored
            .iter()
            .any(|t| trust_key(t) == key && t.same_claims(trust));
        if !flags_only {
            let collisions = CollisionEvaluator::blocking(&CollisionEvaluator::evaluate(trust, stored));
            if !collisions.is_empty() {
                return Err(DirectoryError::Collision {
                    target_forest: trust.target_name().to_string(),
                    collisions,
                });
            }
        }

        match stored.iter_mut().find(|t| trust_key(t) == key) {
            Some(slot) => *slot = trust.clone(),
            None => stored.push(trust.clone()),
        }
        Ok(())
    }
}

impl InMemoryDirectory {
    fn apply_sync(state: &mut State, destination: &str, partition: &str, source: &str) -> Result<()> {
        let ctx = ErrorContext::server(destination)
            .with_source(source)
            .with_partition(partition)
            .with_operation("sync");

        {
            let dest = state.reachable(destination)?;
            if !dest.info.hosts_partition(partition) {
                return Err(DirectoryError::ObjectNotFound {
                    dn: partition.to_string(),
                    server: dest.info.name.clone(),
                });
            }
        }

        let source_view = match state.reachable(source) {
            Ok(src) if src.info.hosts_partition(partition) => Ok((
                src.info.name.clone(),
                src.info.invocation_id,
                src.highest_usn,
                src.objects
                    .values()
                    .filter(|o| dn_in_partition(&o.dn, partition))
                    .cloned()
                    .collect::<Vec<_>>(),
                src.cursors
                    .iter()
                    .filter(|c| names_equal(&c.partition, partition))
                    .cloned()
                    .collect::<Vec<_>>(),
            )),
            Ok(src) => Err((8440u32, format!("{} does not host the partition", src.info.name))),
            Err(_) => Err((RPC_SERVER_UNAVAILABLE, "the RPC server is unavailable".to_string())),
        };

        let dest = state.reachable_mut(destination)?;
        let fault = dest.sync_faults.get(&name_key(source)).cloned();
        let (source_name, source_id, source_usn, objects, cursors) = match (source_view, fault) {
            (Err((code, message)), _) | (Ok(_), Some((code, message))) => {
                dest.record_sync_failure(partition, source, code, &message);
                return Err(DirectoryError::operation(code, message, ctx));
            }
            (Ok(view), None) => view,
        };

        for src_obj in objects {
            let dest_obj = dest
                .objects
                .entry(name_key(&src_obj.dn))
                .or_insert_with(|| ObjectRecord {
                    dn: src_obj.dn.clone(),
                    values: Vec::new(),
                    metadata: Vec::new(),
                });
            for meta in &src_obj.metadata {
                let newer = match dest_obj.metadata.iter().find(|m| names_equal(&m.name, &meta.name)) {
                    Some(existing) => meta.supersedes(existing),
                    None => true,
                };
                if !newer {
                    continue;
                }
                dest.highest_usn += 1;
                let mut applied = meta.clone();
                applied.local_change_usn = dest.highest_usn;
                match dest_obj.metadata.iter_mut().find(|m| names_equal(&m.name, &meta.name)) {
                    Some(slot) => *slot = applied,
                    None => dest_obj.metadata.push(applied),
                }
                let values = src_obj
                    .values
                    .iter()
                    .find(|(n, _)| names_equal(n, &meta.name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                match dest_obj.values.iter_mut().find(|(n, _)| names_equal(n, &meta.name)) {
                    Some(slot) => slot.1 = values,
                    None => dest_obj.values.push((meta.name.clone(), values)),
                }
            }
        }

        let own_id = dest.info.invocation_id;
        dest.advance_cursor(partition, source_id, source_usn, Some(&source_name));
        for c in cursors.iter().filter(|c| c.source_invocation_id != own_id) {
            dest.advance_cursor(partition, c.source_invocation_id, c.up_to_date_usn, c.source_server.as_deref());
        }

        dest.failures.remove(&name_key(source));
        let now = Utc::now();
        if let Some(n) = dest.neighbor_mut(partition, source) {
            n.usn_last_object_change_synced = source_usn;
            n.last_attempted_sync = Some(now);
            n.last_successful_sync = Some(now);
            n.consecutive_failure_count = 0;
            n.last_sync_result = 0;
            n.last_sync_message.clear();
        }
        Ok(())
    }
}

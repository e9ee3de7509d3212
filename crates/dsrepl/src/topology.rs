//! Replication partner graph for one partition, built from neighbor data.
//!
//! Pull runs walk inbound agreements outward from the home server: the home
//! server's sources first, then (unless restricted to adjacent partners) the
//! sources of those sources. Push runs walk the servers that pull from the
//! home server and visit them in reverse discovery order.

use crate::error::{ErrorContext, Result};
use crate::neighbor::ReplicationNeighbor;
use crate::session::DirectorySession;
use crate::types::{name_key, names_equal, InvocationId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Which way changes flow during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Each destination pulls from its inbound partners.
    Pull,
    /// The home server's changes are pushed to servers that pull from it.
    Push,
}

/// A server reached during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNode {
    /// Server name.
    pub name: String,
    /// Site, when known.
    pub site: Option<String>,
    /// Invocation id of the server database.
    pub invocation_id: InvocationId,
    /// Hops from the home server (0 for home).
    pub depth: usize,
}

/// One sync to perform: `destination` pulls the partition from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEdge {
    /// Server that receives changes.
    pub destination: String,
    /// Server that supplies changes.
    pub source: String,
    /// Invocation id of `source`, used to read the matching cursor.
    pub source_invocation_id: InvocationId,
    /// The non-home end of the edge; the partner being visited.
    pub partner: String,
    /// Hops from the home server to `partner`.
    pub depth: usize,
}

/// Partner graph for one partition as seen from the home server.
#[derive(Debug)]
pub struct ReplicationTopology {
    home: String,
    home_site: Option<String>,
    partition: String,
    direction: SyncDirection,
    cross_site: bool,
    nodes: HashMap<String, ServerNode>,
    edges: Vec<SyncEdge>,
}

impl ReplicationTopology {
    /// Graph containing only the home server.
    pub fn new(
        home: &ServerNode,
        partition: impl Into<String>,
        direction: SyncDirection,
        cross_site: bool,
    ) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            name_key(&home.name),
            ServerNode {
                depth: 0,
                ..home.clone()
            },
        );
        Self {
            home: home.name.clone(),
            home_site: home.site.clone(),
            partition: partition.into(),
            direction,
            cross_site,
            nodes,
            edges: Vec::new(),
        }
    }

    /// Home server name.
    pub fn home(&self) -> &str {
        &self.home
    }

    /// Partition the graph was built for.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Traversal direction.
    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// True if a partner in `site` may be visited.
    pub fn site_allowed(&self, site: Option<&str>) -> bool {
        if self.cross_site {
            return true;
        }
        match (self.home_site.as_deref(), site) {
            (Some(home), Some(other)) => names_equal(home, other),
            _ => true,
        }
    }

    /// Record that `from` has an agreement with `neighbor`. Returns the new
    /// node when the partner was not seen before and passes the site filter.
    pub fn insert(&mut self, from: &str, neighbor: &ReplicationNeighbor) -> Option<ServerNode> {
        if !names_equal(&neighbor.partition, &self.partition) {
            return None;
        }
        let key = name_key(&neighbor.partner_server);
        if self.nodes.contains_key(&key) {
            return None;
        }
        if !self.site_allowed(neighbor.partner_site.as_deref()) {
            debug!(
                partner = %neighbor.partner_server,
                site = neighbor.partner_site.as_deref().unwrap_or("-"),
                "skipping partner outside home site"
            );
            return None;
        }
        let from_node = self.nodes.get(&name_key(from))?.clone();
        let node = ServerNode {
            name: neighbor.partner_server.clone(),
            site: neighbor.partner_site.clone(),
            invocation_id: neighbor.partner_invocation_id,
            depth: from_node.depth + 1,
        };

        let edge = match self.direction {
            SyncDirection::Pull => SyncEdge {
                destination: from_node.name.clone(),
                source: node.name.clone(),
                source_invocation_id: node.invocation_id,
                partner: node.name.clone(),
                depth: node.depth,
            },
            SyncDirection::Push => SyncEdge {
                destination: node.name.clone(),
                source: from_node.name.clone(),
                source_invocation_id: from_node.invocation_id,
                partner: node.name.clone(),
                depth: node.depth,
            },
        };
        self.edges.push(edge);
        self.nodes.insert(key, node.clone());
        Some(node)
    }

    /// Known servers, home included.
    pub fn node(&self, name: &str) -> Option<&ServerNode> {
        self.nodes.get(&name_key(name))
    }

    /// Number of partners (home excluded).
    pub fn partner_count(&self) -> usize {
        self.edges.len()
    }

    /// True if there is nothing to visit.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edges in visitation order.
    pub fn visit_order(&self) -> Vec<SyncEdge> {
        let mut edges = self.edges.clone();
        if self.direction == SyncDirection::Push {
            edges.reverse();
        }
        edges
    }

    /// Discover the partner graph from the session's server.
    ///
    /// Failure to read the home server's agreements is an error. A partner
    /// whose agreements cannot be read is kept as a leaf.
    pub async fn discover(
        session: &DirectorySession,
        partition: &str,
        direction: SyncDirection,
        adjacent_only: bool,
        cross_site: bool,
    ) -> Result<Self> {
        let info = session.server();
        let home = ServerNode {
            name: info.name.clone(),
            site: info.site.clone(),
            invocation_id: info.invocation_id,
            depth: 0,
        };
        let mut topo = Self::new(&home, partition, direction, cross_site);
        let transport = session.transport()?;

        let mut queue = VecDeque::new();
        queue.push_back(home.name.clone());
        while let Some(server) = queue.pop_front() {
            let is_home = names_equal(&server, &home.name);
            let neighbors = match direction {
                SyncDirection::Pull => transport.replication_neighbors(&server, Some(partition)).await,
                SyncDirection::Push => transport.replication_targets(&server, partition).await,
            };
            let neighbors = match neighbors {
                Ok(n) => n,
                Err(e) if is_home => {
                    return Err(e.with_context(
                        &ErrorContext::server(server.as_str())
                            .with_partition(partition)
                            .with_operation("topology discovery"),
                    ))
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "cannot expand partner, keeping it as a leaf");
                    continue;
                }
            };
            for n in &neighbors {
                if let Some(node) = topo.insert(&server, n) {
                    if !adjacent_only {
                        queue.push_back(node.name);
                    }
                }
            }
        }

        debug!(
            home = %topo.home,
            partition = partition,
            direction = ?direction,
            partners = topo.partner_count(),
            "replication topology discovered"
        );
        Ok(topo)
    }
}

//! Forest trust relationships and namespace collision detection.
//!
//! A forest trust carries the top-level DNS names and domains the trusted
//! forest claims. Before a trust update is stored, every claim is checked
//! against the claims of all other trusted forests; conflicting entries are
//! reported as [`ForestTrustRelationshipCollision`] records and block the
//! save as a whole.

use crate::error::{DirectoryError, ErrorContext, Result};
use crate::session::DirectorySession;
use crate::types::{dns_name_within, name_key, names_equal};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Direction of a trust relative to the local forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustDirection {
    /// The other forest trusts us.
    Inbound,
    /// We trust the other forest.
    Outbound,
    /// Both ways.
    Bidirectional,
}

/// Kind of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustType {
    /// Transitive trust between two forest roots.
    Forest,
    /// Non-transitive trust to a single external domain.
    External,
    /// Trust to a non-directory Kerberos realm.
    Kerberos,
}

/// State of one claimed top-level name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopLevelNameStatus {
    /// Routed.
    Enabled,
    /// Newly learned, not yet reviewed by an administrator.
    NewlyCreated,
    /// Disabled by an administrator.
    AdminDisabled,
    /// Disabled because another forest claims it.
    ConflictDisabled,
}

impl TopLevelNameStatus {
    /// True if the name is routed for authentication.
    pub fn is_active(self) -> bool {
        matches!(self, TopLevelNameStatus::Enabled | TopLevelNameStatus::NewlyCreated)
    }
}

/// A DNS namespace claimed by a trusted forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelName {
    /// DNS name.
    pub name: String,
    /// Routing state; editable locally until the trust is saved.
    pub status: TopLevelNameStatus,
}

impl TopLevelName {
    /// Enabled name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TopLevelNameStatus::Enabled,
        }
    }

    /// Name with an explicit status.
    pub fn with_status(name: impl Into<String>, status: TopLevelNameStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// State of one trusted domain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForestTrustDomainStatus {
    /// Routed.
    Enabled,
    /// SID disabled by an administrator.
    SidAdminDisabled,
    /// SID disabled because another forest claims it.
    SidConflictDisabled,
    /// NetBIOS name disabled by an administrator.
    NetBiosNameAdminDisabled,
    /// NetBIOS name disabled because another forest claims it.
    NetBiosNameConflictDisabled,
}

/// A domain inside a trusted forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestTrustDomainInformation {
    /// DNS name of the domain.
    pub dns_name: String,
    /// NetBIOS name of the domain.
    pub netbios_name: String,
    /// Domain SID in string form.
    pub domain_sid: String,
    /// Routing state; editable locally until the trust is saved.
    pub status: ForestTrustDomainStatus,
}

impl ForestTrustDomainInformation {
    /// Enabled domain entry.
    pub fn new(
        dns_name: impl Into<String>,
        netbios_name: impl Into<String>,
        domain_sid: impl Into<String>,
    ) -> Self {
        Self {
            dns_name: dns_name.into(),
            netbios_name: netbios_name.into(),
            domain_sid: domain_sid.into(),
            status: ForestTrustDomainStatus::Enabled,
        }
    }
}

/// Generic trust facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRelationshipInformation {
    /// Local forest name.
    pub source_name: String,
    /// Trusted forest name.
    pub target_name: String,
    /// Trust kind.
    pub trust_type: TrustType,
    /// Trust direction.
    pub trust_direction: TrustDirection,
}

/// A forest trust plus the namespaces and domains the trusted forest claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestTrustRelationshipInformation {
    /// Generic trust facts.
    pub info: TrustRelationshipInformation,
    /// Claimed top-level names.
    pub top_level_names: Vec<TopLevelName>,
    /// Names carved out of the claimed namespaces.
    pub excluded_top_level_names: Vec<String>,
    /// Claimed domains.
    pub trusted_domains: Vec<ForestTrustDomainInformation>,
    /// Selective authentication is enforced across the trust.
    pub selective_authentication: bool,
    /// SIDs from the trusted forest are filtered.
    pub sid_filtering: bool,
}

impl ForestTrustRelationshipInformation {
    /// Forest trust with no claims yet.
    pub fn new(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
        trust_direction: TrustDirection,
    ) -> Self {
        Self {
            info: TrustRelationshipInformation {
                source_name: source_name.into(),
                target_name: target_name.into(),
                trust_type: TrustType::Forest,
                trust_direction,
            },
            top_level_names: Vec::new(),
            excluded_top_level_names: Vec::new(),
            trusted_domains: Vec::new(),
            selective_authentication: false,
            sid_filtering: true,
        }
    }

    /// Trusted forest name.
    pub fn target_name(&self) -> &str {
        &self.info.target_name
    }

    /// Add a claimed top-level name.
    pub fn with_top_level_name(mut self, name: TopLevelName) -> Self {
        self.top_level_names.push(name);
        self
    }

    /// Add a claimed domain.
    pub fn with_domain(mut self, domain: ForestTrustDomainInformation) -> Self {
        self.trusted_domains.push(domain);
        self
    }

    /// Change a top-level name's status locally. Returns false if absent.
    pub fn set_top_level_name_status(&mut self, name: &str, status: TopLevelNameStatus) -> bool {
        match self.top_level_names.iter_mut().find(|t| names_equal(&t.name, name)) {
            Some(t) => {
                t.status = status;
                true
            }
            None => false,
        }
    }

    /// Change a domain's status locally, by SID. Returns false if absent.
    pub fn set_domain_status(&mut self, domain_sid: &str, status: ForestTrustDomainStatus) -> bool {
        match self
            .trusted_domains
            .iter_mut()
            .find(|d| names_equal(&d.domain_sid, domain_sid))
        {
            Some(d) => {
                d.status = status;
                true
            }
            None => false,
        }
    }

    /// Carve `name` out of the claimed namespaces. Idempotent.
    pub fn exclude_top_level_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.is_excluded(&name) {
            self.excluded_top_level_names.push(name);
        }
    }

    /// Remove an exclusion. Returns false if it was not present.
    pub fn remove_excluded_top_level_name(&mut self, name: &str) -> bool {
        let before = self.excluded_top_level_names.len();
        self.excluded_top_level_names.retain(|n| !names_equal(n, name));
        before != self.excluded_top_level_names.len()
    }

    /// True if `name` lies inside an excluded subtree.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_top_level_names
            .iter()
            .any(|x| dns_name_within(name, x))
    }

    /// True if `other` claims the same names and domains, ignoring the
    /// selective authentication and SID filtering flags.
    pub fn same_claims(&self, other: &Self) -> bool {
        self.info == other.info
            && self.top_level_names == other.top_level_names
            && self.excluded_top_level_names == other.excluded_top_level_names
            && self.trusted_domains == other.trusted_domains
    }

    /// Active top-level claim covering `name`, if any.
    pub fn claim_covering(&self, name: &str) -> Option<&TopLevelName> {
        if self.is_excluded(name) {
            return None;
        }
        self.top_level_names
            .iter()
            .filter(|t| t.status.is_active())
            .find(|t| dns_name_within(name, &t.name))
    }
}

/// What a collision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForestTrustCollisionType {
    /// Overlapping top-level names.
    TopLevelName,
    /// Same domain SID or NetBIOS name.
    Domain,
    /// A top-level name shadows another forest's domain.
    Other,
}

/// Flags on a top-level-name collision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopLevelNameCollisionOptions {
    /// The proposed name was newly created.
    pub new_entry: bool,
    /// The proposed name is disabled by an administrator.
    pub disabled_by_admin: bool,
    /// The proposed name must be disabled because of the conflict.
    pub disabled_by_conflict: bool,
}

/// Flags on a domain collision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainCollisionOptions {
    /// SID is disabled by an administrator.
    pub sid_disabled_by_admin: bool,
    /// SID conflicts with another forest.
    pub sid_disabled_by_conflict: bool,
    /// NetBIOS name is disabled by an administrator.
    pub netbios_disabled_by_admin: bool,
    /// NetBIOS name conflicts with another forest.
    pub netbios_disabled_by_conflict: bool,
}

/// One conflicting entry found while evaluating a trust update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestTrustRelationshipCollision {
    /// What collided.
    pub collision_type: ForestTrustCollisionType,
    /// Flags for `TopLevelName` collisions.
    pub top_level_name_options: TopLevelNameCollisionOptions,
    /// Flags for `Domain` collisions.
    pub domain_options: DomainCollisionOptions,
    /// Name of the offending proposed record.
    pub record: String,
    /// Forest that already owns the conflicting claim.
    pub conflicting_forest: String,
}

impl ForestTrustRelationshipCollision {
    /// True if this collision rejects a save. Admin-disabled entries are
    /// reported but do not block.
    pub fn is_blocking(&self) -> bool {
        match self.collision_type {
            ForestTrustCollisionType::TopLevelName => {
                self.top_level_name_options.disabled_by_conflict
            }
            ForestTrustCollisionType::Domain => {
                self.domain_options.sid_disabled_by_conflict
                    || self.domain_options.netbios_disabled_by_conflict
            }
            ForestTrustCollisionType::Other => true,
        }
    }
}

/// Finds collisions between a proposed trust and the existing trusts of a forest.
pub struct CollisionEvaluator;

impl CollisionEvaluator {
    /// Collisions `proposed` would cause against `existing`. The previous
    /// version of the same trust (same target) is ignored.
    pub fn evaluate(
        proposed: &ForestTrustRelationshipInformation,
        existing: &[ForestTrustRelationshipInformation],
    ) -> Vec<ForestTrustRelationshipCollision> {
        let others: Vec<_> = existing
            .iter()
            .filter(|e| !names_equal(e.target_name(), proposed.target_name()))
            .collect();

        let mut collisions = Vec::new();
        for tln in &proposed.top_level_names {
            if tln.status == TopLevelNameStatus::ConflictDisabled || proposed.is_excluded(&tln.name) {
                continue;
            }
            let found = others
                .iter()
                .find_map(|other| Self::top_level_name_collision(tln, proposed, other))
                .or_else(|| others.iter().find_map(|other| Self::domain_shadow(tln, other)));
            collisions.extend(found);
        }

        for domain in &proposed.trusted_domains {
            for other in &others {
                if let Some(c) = Self::domain_collision(domain, other) {
                    collisions.push(c);
                }
            }
        }
        collisions
    }

    /// Only the collisions that reject a save.
    pub fn blocking(collisions: &[ForestTrustRelationshipCollision]) -> Vec<ForestTrustRelationshipCollision> {
        collisions.iter().filter(|c| c.is_blocking()).cloned().collect()
    }

    fn top_level_name_collision(
        tln: &TopLevelName,
        proposed: &ForestTrustRelationshipInformation,
        other: &ForestTrustRelationshipInformation,
    ) -> Option<ForestTrustRelationshipCollision> {
        let overlaps = other.top_level_names.iter().filter(|t| t.status.is_active()).any(|claim| {
            if dns_name_within(&tln.name, &claim.name) {
                !other.is_excluded(&tln.name)
            } else if dns_name_within(&claim.name, &tln.name) {
                !proposed.is_excluded(&claim.name)
            } else {
                false
            }
        });

        if !overlaps {
            return None;
        }
        let admin = tln.status == TopLevelNameStatus::AdminDisabled;
        Some(ForestTrustRelationshipCollision {
            collision_type: ForestTrustCollisionType::TopLevelName,
            top_level_name_options: TopLevelNameCollisionOptions {
                new_entry: tln.status == TopLevelNameStatus::NewlyCreated,
                disabled_by_admin: admin,
                disabled_by_conflict: !admin,
            },
            domain_options: DomainCollisionOptions::default(),
            record: tln.name.clone(),
            conflicting_forest: other.target_name().to_string(),
        })
    }

    /// `Other` collision when `tln` covers a domain of `other` that none of
    /// its own claims cover.
    fn domain_shadow(
        tln: &TopLevelName,
        other: &ForestTrustRelationshipInformation,
    ) -> Option<ForestTrustRelationshipCollision> {
        if tln.status == TopLevelNameStatus::AdminDisabled {
            return None;
        }
        let shadows_domain = other
            .trusted_domains
            .iter()
            .any(|d| dns_name_within(&d.dns_name, &tln.name) && other.claim_covering(&d.dns_name).is_none());
        if shadows_domain {
            return Some(ForestTrustRelationshipCollision {
                collision_type: ForestTrustCollisionType::Other,
                top_level_name_options: TopLevelNameCollisionOptions::default(),
                domain_options: DomainCollisionOptions::default(),
                record: tln.name.clone(),
                conflicting_forest: other.target_name().to_string(),
            });
        }
        None
    }

    fn domain_collision(
        domain: &ForestTrustDomainInformation,
        other: &ForestTrustRelationshipInformation,
    ) -> Option<ForestTrustRelationshipCollision> {
        // Entries already disabled by a conflict are resolved.
        let sid_clash = domain.status != ForestTrustDomainStatus::SidConflictDisabled
            && other
                .trusted_domains
                .iter()
                .any(|d| !d.domain_sid.is_empty() && names_equal(&d.domain_sid, &domain.domain_sid));
        let netbios_clash = domain.status != ForestTrustDomainStatus::NetBiosNameConflictDisabled
            && other
                .trusted_domains
                .iter()
                .any(|d| !d.netbios_name.is_empty() && names_equal(&d.netbios_name, &domain.netbios_name));
        if !sid_clash && !netbios_clash {
            return None;
        }

        let sid_admin = domain.status == ForestTrustDomainStatus::SidAdminDisabled;
        let netbios_admin = domain.status == ForestTrustDomainStatus::NetBiosNameAdminDisabled;
        let options = DomainCollisionOptions {
            sid_disabled_by_admin: sid_clash && sid_admin,
            sid_disabled_by_conflict: sid_clash && !sid_admin,
            netbios_disabled_by_admin: netbios_clash && netbios_admin,
            netbios_disabled_by_conflict: netbios_clash && !netbios_admin,
        };
        Some(ForestTrustRelationshipCollision {
            collision_type: ForestTrustCollisionType::Domain,
            top_level_name_options: TopLevelNameCollisionOptions::default(),
            domain_options: options,
            record: domain.dns_name.clone(),
            conflicting_forest: other.target_name().to_string(),
        })
    }
}

/// Reads and saves forest trusts through a session.
pub struct TrustStore<'s> {
    session: &'s DirectorySession,
}

impl<'s> TrustStore<'s> {
    /// Trust store over `session`.
    pub fn new(session: &'s DirectorySession) -> Self {
        Self { session }
    }

    /// All forest trusts of the session's forest.
    pub async fn get_all_trust_relationships(&self) -> Result<Vec<ForestTrustRelationshipInformation>> {
        let transport = self.session.transport()?;
        let server = self.session.server_name();
        transport
            .trust_relationships(server)
            .await
            .map_err(|e| e.with_context(&ErrorContext::server(server).with_operation("read trusts")))
    }

    /// Trust to `target_forest`.
    pub async fn get_trust_relationship(
        &self,
        target_forest: &str,
    ) -> Result<ForestTrustRelationshipInformation> {
        self.get_all_trust_relationships()
            .await?
            .into_iter()
            .find(|t| names_equal(t.target_name(), target_forest))
            .ok_or_else(|| DirectoryError::ObjectNotFound {
                dn: target_forest.to_string(),
                server: self.session.server_name().to_string(),
            })
    }

    /// Collisions `proposed` would cause against the stored trusts.
    pub async fn evaluate(
        &self,
        proposed: &ForestTrustRelationshipInformation,
    ) -> Result<Vec<ForestTrustRelationshipCollision>> {
        let existing = self.get_all_trust_relationships().await?;
        Ok(CollisionEvaluator::evaluate(proposed, &existing))
    }

    /// Store `trust` as a whole. Any blocking collision, found locally or
    /// reported by the server, rejects the save and leaves stored state
    /// untouched. Returns the non-blocking collisions on success.
    pub async fn save(
        &self,
        trust: &ForestTrustRelationshipInformation,
    ) -> Result<Vec<ForestTrustRelationshipCollision>> {
        let collisions = self.evaluate(trust).await?;
        let blocking = CollisionEvaluator::blocking(&collisions);
        if !blocking.is_empty() {
            warn!(
                target_forest = trust.target_name(),
                collisions = blocking.len(),
                "trust save rejected by collision check"
            );
            return Err(DirectoryError::Collision {
                target_forest: trust.target_name().to_string(),
                collisions: blocking,
            });
        }

        let transport = self.session.transport()?;
        let server = self.session.server_name();
        transport.write_trust(server, trust).await.map_err(|e| {
            e.with_context(&ErrorContext::server(server).with_operation("save trust"))
        })?;
        info!(
            target_forest = trust.target_name(),
            top_level_names = trust.top_level_names.len(),
            domains = trust.trusted_domains.len(),
            "forest trust saved"
        );
        Ok(collisions)
    }

    /// Whether selective authentication is on for the trust to `target_forest`.
    pub async fn get_selective_authentication_status(&self, target_forest: &str) -> Result<bool> {
        Ok(self.get_trust_relationship(target_forest).await?.selective_authentication)
    }

    /// Turn selective authentication on or off.
    pub async fn set_selective_authentication_status(&self, target_forest: &str, enable: bool) -> Result<()> {
        let mut trust = self.get_trust_relationship(target_forest).await?;
        trust.selective_authentication = enable;
        self.write_flags(&trust).await
    }

    /// Whether SID filtering is on for the trust to `target_forest`.
    pub async fn get_sid_filtering_status(&self, target_forest: &str) -> Result<bool> {
        Ok(self.get_trust_relationship(target_forest).await?.sid_filtering)
    }

    /// Turn SID filtering on or off.
    pub async fn set_sid_filtering_status(&self, target_forest: &str, enable: bool) -> Result<()> {
        let mut trust = self.get_trust_relationship(target_forest).await?;
        trust.sid_filtering = enable;
        self.write_flags(&trust).await
    }

    async fn write_flags(&self, trust: &ForestTrustRelationshipInformation) -> Result<()> {
        let transport = self.session.transport()?;
        let server = self.session.server_name();
        transport.write_trust(server, trust).await.map_err(|e| {
            e.with_context(&ErrorContext::server(server).with_operation("update trust attributes"))
        })?;
        info!(
            target_forest = trust.target_name(),
            selective_authentication = trust.selective_authentication,
            sid_filtering = trust.sid_filtering,
            "trust attributes updated"
        );
        Ok(())
    }
}

/// Lookup key for a trust by target forest.
pub(crate) fn trust_key(trust: &ForestTrustRelationshipInformation) -> String {
    name_key(trust.target_name())
}

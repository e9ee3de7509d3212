//! Per-attribute replication metadata for a directory object.
//!
//! A [`ReplicationMetadataSet`] is an immutable, insertion-ordered snapshot
//! keyed by attribute name. Lookups ignore case and always return the same
//! values a full scan would.

use crate::error::{DirectoryError, ErrorContext, Result};
use crate::session::DirectorySession;
use crate::types::{name_key, InvocationId, Usn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Error code reported when a server returns the same attribute twice.
pub const DUPLICATE_ATTRIBUTE_CODE: u32 = 8311;

/// Replication state of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    /// Attribute LDAP display name.
    pub name: String,
    /// Version, bumped on every originating write.
    pub version: u32,
    /// Time of the last originating change.
    pub last_originating_change_time: DateTime<Utc>,
    /// Invocation id of the server that originated the last change.
    pub originating_invocation_id: InvocationId,
    /// USN on the originating server for that change.
    pub originating_change_usn: Usn,
    /// USN on the queried server when the change was applied locally.
    pub local_change_usn: Usn,
    /// Name of the originating server.
    pub originating_server: String,
}

impl AttributeMetadata {
    /// True if `self` wins replication conflict resolution against `other`:
    /// higher version, then later originating time, then larger invocation id.
    pub fn supersedes(&self, other: &AttributeMetadata) -> bool {
        (
            self.version,
            self.last_originating_change_time,
            self.originating_invocation_id,
        ) > (
            other.version,
            other.last_originating_change_time,
            other.originating_invocation_id,
        )
    }
}

/// Insertion-ordered, case-insensitively keyed set of attribute metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AttributeMetadata>", into = "Vec<AttributeMetadata>")]
pub struct ReplicationMetadataSet {
    entries: Vec<AttributeMetadata>,
    index: HashMap<String, usize>,
}

impl ReplicationMetadataSet {
    /// Build a set, rejecting duplicate attribute names.
    pub fn from_entries(entries: Vec<AttributeMetadata>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(name_key(&entry.name), i).is_some() {
                return Err(DirectoryError::operation(
                    DUPLICATE_ATTRIBUTE_CODE,
                    format!("duplicate attribute '{}' in metadata", entry.name),
                    ErrorContext::default().with_operation("replication metadata"),
                ));
            }
        }
        Ok(Self { entries, index })
    }

    /// Metadata for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&AttributeMetadata> {
        self.index.get(&name_key(name)).map(|&i| &self.entries[i])
    }

    /// True if `name` is present, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name_key(name))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no attributes are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeMetadata> {
        self.entries.iter()
    }

    /// Attribute names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Ordered copy of all entries.
    pub fn to_vec(&self) -> Vec<AttributeMetadata> {
        self.entries.clone()
    }

    /// Copy all entries into `dest` starting at `start`, preserving order.
    /// Returns the number of entries written.
    pub fn copy_to(&self, dest: &mut [Option<AttributeMetadata>], start: usize) -> Result<usize> {
        if start > dest.len() {
            return Err(DirectoryError::IndexOutOfRange {
                index: start,
                len: dest.len(),
            });
        }
        let available = dest.len() - start;
        if available < self.entries.len() {
            return Err(DirectoryError::BufferTooSmall {
                needed: self.entries.len(),
                available,
            });
        }
        for (slot, entry) in dest[start..].iter_mut().zip(&self.entries) {
            *slot = Some(entry.clone());
        }
        Ok(self.entries.len())
    }
}

impl TryFrom<Vec<AttributeMetadata>> for ReplicationMetadataSet {
    type Error = DirectoryError;

    fn try_from(entries: Vec<AttributeMetadata>) -> Result<Self> {
        Self::from_entries(entries)
    }
}

impl From<ReplicationMetadataSet> for Vec<AttributeMetadata> {
    fn from(set: ReplicationMetadataSet) -> Self {
        set.entries
    }
}

impl<'a> IntoIterator for &'a ReplicationMetadataSet {
    type Item = &'a AttributeMetadata;
    type IntoIter = std::slice::Iter<'a, AttributeMetadata>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Fetch the replication metadata of `object_dn` from the session's server.
pub async fn get_replication_metadata(
    session: &DirectorySession,
    object_dn: &str,
) -> Result<ReplicationMetadataSet> {
    let transport = session.transport()?;
    let server = session.server_name();
    if object_dn.trim().is_empty() {
        return Err(DirectoryError::ObjectNotFound {
            dn: object_dn.to_string(),
            server: server.to_string(),
        });
    }

    let entries = transport
        .replication_metadata(server, object_dn)
        .await
        .map_err(|e| {
            e.with_context(
                &ErrorContext::server(server).with_operation("replication metadata"),
            )
        })?;

    debug!(
        server = server,
        dn = object_dn,
        attributes = entries.len(),
        "read replication metadata"
    );
    ReplicationMetadataSet::from_entries(entries)
        .map_err(|e| e.with_context(&ErrorContext::server(server)))
}

//! Identifiers and name helpers shared across the replication model.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Update sequence number stamped by a server on each change it applies.
pub type Usn = u64;

/// Opaque identifier of one generation of a server's directory database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Fresh random invocation id (a database restore also produces one).
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build from a raw 128-bit value.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The all-zero id some servers report for unknown originators.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// True for the all-zero id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for InvocationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup key for names compared case-insensitively (server names, DNs,
/// attribute names, DNS names). A trailing root dot is ignored.
pub fn name_key(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Case-insensitive name equality.
pub fn names_equal(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}

/// True if `dn` lies inside the naming context `partition`.
pub fn dn_in_partition(dn: &str, partition: &str) -> bool {
    let dn = name_key(dn);
    let partition = name_key(partition);
    dn == partition || dn.ends_with(&format!(",{}", partition))
}

/// True if `name` equals `root` or is a DNS subdomain of it.
pub fn dns_name_within(name: &str, root: &str) -> bool {
    let name = name_key(name);
    let root = name_key(root);
    !root.is_empty() && (name == root || name.ends_with(&format!(".{}", root)))
}

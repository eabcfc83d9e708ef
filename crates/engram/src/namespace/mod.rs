//! Namespace resolution for tenant/workspace isolation
//!
//! Maps a (tenant, workspace) pair to the physical identifiers used by the
//! storage layer. The mapping is pure, deterministic, and injective: no two
//! distinct pairs ever share a physical name, so cross-tenant reads are
//! impossible below this boundary.

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Resolved physical identity of a tenant/workspace pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Tenant this namespace belongs to
    pub tenant: String,
    /// Workspace within the tenant
    pub workspace: String,
    /// Collision-free physical name, also used as the cache-key prefix
    physical: String,
}

impl Namespace {
    /// The collision-free physical name of this namespace.
    pub fn physical_name(&self) -> &str {
        &self.physical
    }

    /// LanceDB table holding vector records for this namespace.
    ///
    /// '.' never appears in an encoded segment, so the suffix cannot
    /// collide with another namespace's encoded name.
    pub fn vectors_table(&self) -> String {
        format!("{}.vectors", self.physical)
    }

    /// LanceDB table holding metadata items for this namespace.
    pub fn items_table(&self) -> String {
        format!("{}.items", self.physical)
    }

    /// Prefix applied to every cache key produced under this namespace.
    pub fn cache_prefix(&self) -> &str {
        &self.physical
    }
}

/// Pure resolver from (tenant, workspace) to [`Namespace`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceResolver;

impl NamespaceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a tenant/workspace pair.
    ///
    /// Empty tenant or workspace is a validation error; resolution itself
    /// performs no I/O and always yields the same output for the same input.
    pub fn resolve(&self, tenant: &str, workspace: &str) -> Result<Namespace> {
        if tenant.is_empty() {
            return Err(EngramError::Validation("tenant must not be empty".to_string()));
        }
        if workspace.is_empty() {
            return Err(EngramError::Validation(
                "workspace must not be empty".to_string(),
            ));
        }

        let physical = format!("ns_{}__{}", encode_segment(tenant), encode_segment(workspace));

        Ok(Namespace {
            tenant: tenant.to_string(),
            workspace: workspace.to_string(),
            physical,
        })
    }
}

/// Escape a segment into LanceDB's table-name alphabet.
///
/// ASCII alphanumerics and '-' pass through; every other byte becomes
/// `_xHH`. Because '_' itself is escaped, the encoding is injective and the
/// `__` separator between segments can never occur inside one.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("_x{byte:02x}")),
        }
    }
    out
}

//! Retention policies
//!
//! A policy is a named, per-tenant rule governing when an unpinned item
//! becomes eligible for pruning. Items referencing an unknown policy fall
//! back to the built-in "default" policy rather than failing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::memory::types::MemoryItem;

/// Name of the built-in fallback policy.
pub const DEFAULT_POLICY: &str = "default";

/// A named retention rule scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub name: String,
    pub tenant: String,
    /// Days before an unpinned item expires. Ignored when `permanent`.
    pub ttl_days: u32,
    /// Permanent policies never expire, regardless of `ttl_days`.
    pub permanent: bool,
}

impl RetentionPolicy {
    pub fn new(name: &str, tenant: &str, ttl_days: u32) -> Self {
        Self {
            name: name.to_string(),
            tenant: tenant.to_string(),
            ttl_days,
            permanent: false,
        }
    }

    pub fn permanent(name: &str, tenant: &str) -> Self {
        Self {
            name: name.to_string(),
            tenant: tenant.to_string(),
            ttl_days: 0,
            permanent: true,
        }
    }
}

/// In-process registry of retention policies, keyed by (tenant, name).
#[derive(Debug)]
pub struct PolicyRegistry {
    policies: DashMap<(String, String), RetentionPolicy>,
    default_ttl_days: u32,
}

impl PolicyRegistry {
    pub fn new(default_ttl_days: u32) -> Self {
        Self {
            policies: DashMap::new(),
            default_ttl_days,
        }
    }

    /// Register or replace a policy for its tenant.
    pub fn register(&self, policy: RetentionPolicy) {
        self.policies
            .insert((policy.tenant.clone(), policy.name.clone()), policy);
    }

    /// Look up a policy by tenant and name, falling back to the built-in
    /// default when the name is unknown.
    pub fn lookup(&self, tenant: &str, name: &str) -> RetentionPolicy {
        self.policies
            .get(&(tenant.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| RetentionPolicy::new(DEFAULT_POLICY, tenant, self.default_ttl_days))
    }

    /// Whether `item` has outlived its policy as of `now`.
    ///
    /// Pinned items never expire. A zero-TTL policy only means "never
    /// expire" when it is explicitly marked permanent.
    pub fn is_expired(&self, item: &MemoryItem, now: DateTime<Utc>) -> bool {
        if item.pinned {
            return false;
        }
        let policy = self.lookup(&item.tenant, &item.policy);
        if policy.permanent {
            return false;
        }
        item.age_days(now) > i64::from(policy.ttl_days)
    }
}

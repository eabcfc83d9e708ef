//! Filter types for vector query operations
//!
//! Exact-match key/value constraints on the denormalized payload. The
//! `item_type` and `policy` columns are pushed down as a SQL WHERE clause;
//! constraints on caller-supplied metadata are applied in-process after the
//! ranked candidates come back, since metadata lives in a JSON column.

use serde::{Deserialize, Serialize};

use crate::memory::types::{MetadataMap, MetadataValue, VectorPayload};

/// Filter criteria for similarity searches.
///
/// All fields are optional; multiple constraints combine with AND logic.
/// Serialization order is stable, so filters participate in cache-key
/// fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadFilter {
    /// Exact item_type match
    pub item_type: Option<String>,
    /// Exact policy-name match
    pub policy: Option<String>,
    /// Exact matches against caller-supplied metadata keys
    pub metadata: MetadataMap,
}

impl PayloadFilter {
    /// Create a new empty filter (no constraints).
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain to one item_type.
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = Some(item_type.into());
        self
    }

    /// Constrain to one policy name.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Require `key` to equal `value` in the payload metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build the SQL WHERE clause for the pushdown-able constraints.
    /// Returns `None` when neither column constraint is set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref item_type) = self.item_type {
            conditions.push(format!("item_type = '{}'", escape_sql(item_type)));
        }

        if let Some(ref policy) = self.policy {
            conditions.push(format!("policy = '{}'", escape_sql(policy)));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Whether the metadata residue (the part SQL cannot see) matches.
    pub fn matches_metadata(&self, payload: &VectorPayload) -> bool {
        self.metadata
            .iter()
            .all(|(key, value)| payload.metadata.get(key) == Some(value))
    }

    /// True when no constraint of any kind is set.
    pub fn is_empty(&self) -> bool {
        self.item_type.is_none() && self.policy.is_none() && self.metadata.is_empty()
    }

    /// Whether any constraint must be checked in-process.
    pub fn has_metadata_constraints(&self) -> bool {
        !self.metadata.is_empty()
    }
}

fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryItem;

    fn payload() -> VectorPayload {
        let mut item = MemoryItem::new(
            "acme".to_string(),
            "support".to_string(),
            "text".to_string(),
            "short".to_string(),
            "default".to_string(),
        );
        item.metadata
            .insert("lang".to_string(), MetadataValue::Str("en".to_string()));
        item.metadata
            .insert("rank".to_string(), MetadataValue::Num(2.0));
        VectorPayload::from_item(&item)
    }

    #[test]
    fn test_empty_filter() {
        let filter = PayloadFilter::new();
        assert!(filter.is_empty());
        assert!(filter.to_sql_clause().is_none());
        assert!(filter.matches_metadata(&payload()));
    }

    #[test]
    fn test_item_type_clause() {
        let filter = PayloadFilter::new().with_item_type("short");
        assert_eq!(filter.to_sql_clause().unwrap(), "item_type = 'short'");
    }

    #[test]
    fn test_combined_column_clause() {
        let filter = PayloadFilter::new()
            .with_item_type("short")
            .with_policy("default");
        let sql = filter.to_sql_clause().unwrap();
        assert!(sql.contains("item_type = 'short'"));
        assert!(sql.contains("policy = 'default'"));
        assert!(sql.contains(" AND "));
    }

    #[test]
    fn test_quotes_are_escaped() {
        let filter = PayloadFilter::new().with_item_type("o'brien");
        assert_eq!(filter.to_sql_clause().unwrap(), "item_type = 'o''brien'");
    }

    #[test]
    fn test_metadata_match() {
        let filter =
            PayloadFilter::new().with_metadata("lang", MetadataValue::Str("en".to_string()));
        assert!(filter.matches_metadata(&payload()));
        assert!(filter.has_metadata_constraints());
        assert!(filter.to_sql_clause().is_none());
    }

    #[test]
    fn test_metadata_mismatch() {
        let wrong_value =
            PayloadFilter::new().with_metadata("lang", MetadataValue::Str("fr".to_string()));
        assert!(!wrong_value.matches_metadata(&payload()));

        let missing_key =
            PayloadFilter::new().with_metadata("absent", MetadataValue::Bool(true));
        assert!(!missing_key.matches_metadata(&payload()));
    }

    #[test]
    fn test_metadata_requires_all_keys() {
        let filter = PayloadFilter::new()
            .with_metadata("lang", MetadataValue::Str("en".to_string()))
            .with_metadata("rank", MetadataValue::Num(3.0));
        assert!(!filter.matches_metadata(&payload()));
    }

    #[test]
    fn test_serialization_is_stable() {
        let a = PayloadFilter::new()
            .with_metadata("b", MetadataValue::Bool(true))
            .with_metadata("a", MetadataValue::Num(1.0))
            .with_item_type("short");
        let b = PayloadFilter::new()
            .with_item_type("short")
            .with_metadata("a", MetadataValue::Num(1.0))
            .with_metadata("b", MetadataValue::Bool(true));

        let ja = serde_json::to_string(&a).unwrap();
        let jb = serde_json::to_string(&b).unwrap();
        assert_eq!(ja, jb);
    }
}

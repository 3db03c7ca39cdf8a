//! Edge types for the tiered graph.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{Meta, MetaValue};

/// Natural key of an edge: `(from_id, to_id, role)`.
///
/// At most one edge per key exists in a store at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Source node id.
    pub from_id: String,
    /// Target node id.
    pub to_id: String,
    /// Relationship label.
    pub role: String,
}

impl EdgeKey {
    /// Create a new key.
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            role: role.into(),
        }
    }

    /// Whether `node_id` is either endpoint.
    pub fn touches(&self, node_id: &str) -> bool {
        self.from_id == node_id || self.to_id == node_id
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from_id, self.role, self.to_id)
    }
}

/// A directed, typed relationship between two node ids.
///
/// Endpoints are weak references: storage does not check that they exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from_id: String,
    /// Target node id.
    pub to_id: String,
    /// Relationship label.
    pub role: String,
    /// Optional strength or priority.
    pub weight: Option<f64>,
    /// Open-ended metadata.
    pub meta: Option<Meta>,
}

impl Edge {
    /// Create a new unweighted edge.
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            role: role.into(),
            weight: None,
            meta: None,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Insert one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta
            .get_or_insert_with(Meta::new)
            .insert(key.into(), value.into());
        self
    }

    /// The edge's natural key.
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.from_id, &self.to_id, &self.role)
    }
}

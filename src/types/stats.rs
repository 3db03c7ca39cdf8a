//! Read-only statistics snapshots returned by the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of an Ice store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceStats {
    /// Backend tag (`memory`, `sqlite`, `postgres`).
    pub backend: String,
    /// Stored nodes.
    pub node_count: u64,
    /// Stored edges.
    pub edge_count: u64,
    /// On-disk size where the backend can report it, zero otherwise.
    pub size_bytes: u64,
    /// Most recent write, if any.
    pub last_updated: Option<DateTime<Utc>>,
    /// Backend-specific extras.
    pub extras: BTreeMap<String, String>,
}

/// Snapshot of a Water store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterStats {
    /// Backend tag.
    pub backend: String,
    /// Live (unexpired) nodes.
    pub water_node_count: u64,
    /// Nodes past their expiry that no sweep has removed yet.
    pub expired_node_count: u64,
    /// Live edges.
    pub water_edge_count: u64,
    /// Expired edges not yet swept.
    pub expired_edge_count: u64,
    /// Mean remaining TTL over live nodes, in seconds.
    pub average_ttl_remaining_secs: Option<f64>,
    /// On-disk size where the backend can report it, zero otherwise.
    pub size_bytes: u64,
    /// Most recent write, if any.
    pub last_updated: Option<DateTime<Utc>>,
    /// Backend-specific extras.
    pub extras: BTreeMap<String, String>,
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Nodes removed.
    pub nodes: u64,
    /// Edges removed.
    pub edges: u64,
}

impl SweepReport {
    /// Total entries removed.
    pub fn total(&self) -> u64 {
        self.nodes + self.edges
    }
}

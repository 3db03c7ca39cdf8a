//! Tiered storage backends.
//!
//! Two contracts, one per storable tier:
//!
//! - [`IceStore`]: durable, append-mostly storage for immutable content.
//! - [`WaterStore`]: mutable storage where every entry carries an expiry.
//!
//! Each backend family (memory, SQLite, PostgreSQL) implements both. Callers
//! pick an implementation once, at construction time, and hold it as
//! `Arc<dyn IceStore>` / `Arc<dyn WaterStore>`.

pub mod codec;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
mod copy;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::types::{Edge, IceStats, MetaValue, Node, NodeState, SweepReport, WaterStats};

/// Default Water time-to-live: 30 minutes.
pub const DEFAULT_WATER_TTL: Duration = Duration::from_secs(30 * 60);

/// Storage contract for the Ice tier.
///
/// Every operation either applies fully or surfaces an error; nothing is
/// retried internally.
#[async_trait]
pub trait IceStore: Send + Sync {
    /// Backend tag reported in stats.
    fn backend(&self) -> &'static str;

    /// Create schema and structures if absent. Safe to call on every start.
    async fn initialize(&self) -> StoreResult<()>;

    /// Upsert a node by id. Rejects nodes whose state is not Ice.
    async fn store_node(&self, node: &Node) -> StoreResult<()>;

    /// Fetch a node by id.
    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>>;

    /// All nodes, in creation order.
    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>>;

    /// Nodes with the given type, in creation order.
    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>>;

    /// Delete a node and every edge incident on it.
    ///
    /// Returns whether the node existed.
    async fn delete_node(&self, id: &str) -> StoreResult<bool>;

    /// Upsert an edge by `(from_id, to_id, role)`.
    async fn store_edge(&self, edge: &Edge) -> StoreResult<()>;

    /// All edges.
    async fn get_all_edges(&self) -> StoreResult<Vec<Edge>>;

    /// Edges leaving `id`.
    async fn get_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>>;

    /// Edges arriving at `id`.
    async fn get_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>>;

    /// Delete an edge by natural key. Returns whether it existed.
    async fn delete_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool>;

    /// Upsert many nodes at once. All-or-nothing where the medium allows.
    async fn batch_store_nodes(&self, nodes: &[Node]) -> StoreResult<usize>;

    /// Upsert many edges at once. All-or-nothing where the medium allows.
    async fn batch_store_edges(&self, edges: &[Edge]) -> StoreResult<usize>;

    /// Case-insensitive substring match over title, description, and the
    /// serialized content and metadata.
    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>>;

    /// Nodes whose metadata has `key` exactly equal to `value`.
    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>>;

    /// Liveness probe. Never errors.
    async fn is_available(&self) -> bool;

    /// Counts and sizes.
    async fn get_stats(&self) -> StoreResult<IceStats>;
}

/// Storage contract for the Water tier.
///
/// Entries are `Live` until `now >= expires_at`, then `Expired` until a
/// lazy read or a sweep removes them. An expired entry is never returned.
#[async_trait]
pub trait WaterStore: Send + Sync {
    /// Backend tag reported in stats.
    fn backend(&self) -> &'static str;

    /// TTL applied when a store call passes none.
    fn default_ttl(&self) -> Duration;

    /// Create schema and structures if absent. Safe to call on every start.
    async fn initialize(&self) -> StoreResult<()>;

    /// Upsert a node with `ttl` (or the default). Rejects non-Water nodes.
    async fn store_node(&self, node: &Node, ttl: Option<Duration>) -> StoreResult<()>;

    /// Fetch a live node. An expired entry is deleted as a side effect.
    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>>;

    /// All live nodes, in creation order.
    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>>;

    /// Live nodes with the given type.
    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>>;

    /// Live nodes whose `generated_from` metadata names `source_id`.
    async fn get_nodes_generated_from(&self, source_id: &str) -> StoreResult<Vec<Node>>;

    /// Delete a node and its incident Water edges. Returns whether the node
    /// existed (live or expired).
    async fn delete_node(&self, id: &str) -> StoreResult<bool>;

    /// Upsert many nodes sharing one TTL.
    async fn batch_store_nodes(&self, nodes: &[Node], ttl: Option<Duration>) -> StoreResult<usize>;

    /// Case-insensitive substring search over live nodes.
    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>>;

    /// Live nodes whose metadata has `key` exactly equal to `value`.
    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>>;

    /// Delete every expired node. Returns the number removed.
    async fn cleanup_expired_nodes(&self) -> StoreResult<u64>;

    /// Upsert an edge with `ttl` (or the default).
    async fn store_water_edge(&self, edge: &Edge, ttl: Option<Duration>) -> StoreResult<()>;

    /// Live edges.
    async fn get_all_water_edges(&self) -> StoreResult<Vec<Edge>>;

    /// Live edges leaving `id`.
    async fn get_water_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>>;

    /// Live edges arriving at `id`.
    async fn get_water_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>>;

    /// Delete an edge by natural key. Returns whether it existed.
    async fn delete_water_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool>;

    /// Delete every expired edge. Returns the number removed.
    async fn cleanup_expired_edges(&self) -> StoreResult<u64>;

    /// Sweep nodes and edges.
    async fn sweep(&self) -> StoreResult<SweepReport> {
        let nodes = self.cleanup_expired_nodes().await?;
        let edges = self.cleanup_expired_edges().await?;
        if nodes + edges > 0 {
            tracing::info!(backend = self.backend(), nodes, edges, "Swept expired water entries");
        }
        Ok(SweepReport { nodes, edges })
    }

    /// Liveness probe. Never errors.
    async fn is_available(&self) -> bool;

    /// Live, expired and TTL statistics.
    async fn get_stats(&self) -> StoreResult<WaterStats>;
}

/// Reject nodes that may not live in a store of tier `expected`.
pub(crate) fn ensure_tier(node: &Node, expected: NodeState) -> StoreResult<()> {
    if node.id.is_empty() {
        return Err(StoreError::validation("node id must not be empty"));
    }
    if node.state != expected {
        return Err(StoreError::TierMismatch {
            id: node.id.clone(),
            expected,
            actual: node.state,
        });
    }
    Ok(())
}

/// Reject edges without endpoints or role.
pub(crate) fn ensure_edge(edge: &Edge) -> StoreResult<()> {
    if edge.from_id.is_empty() || edge.to_id.is_empty() || edge.role.is_empty() {
        return Err(StoreError::validation(format!(
            "edge {} must have non-empty endpoints and role",
            edge.key()
        )));
    }
    Ok(())
}

/// Compute `now + ttl`.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> StoreResult<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| StoreError::validation(format!("ttl {ttl:?} overflows the clock")))
}

/// Build a `LIKE` pattern matching `query` anywhere, with `\` as the escape
/// character.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Separates fields in a search document. Serialized JSON never contains it
/// unescaped.
const SEARCH_FIELD_SEPARATOR: &str = "\u{1f}";

/// The lowercased text `search_nodes` matches against: title, description,
/// compact JSON content and compact JSON meta, one field per segment.
///
/// Every backend folds case here, in Rust, so a query matches the same nodes
/// whichever database holds them.
pub(crate) fn search_text(node: &Node) -> String {
    let content = node.content.as_ref().and_then(|c| serde_json::to_string(c).ok());
    let meta = node.meta.as_ref().and_then(|m| serde_json::to_string(m).ok());
    [node.title.as_deref(), node.description.as_deref(), content.as_deref(), meta.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(SEARCH_FIELD_SEPARATOR)
}

/// A search query folded the same way as [`search_text`].
pub(crate) fn search_needle(query: &str) -> String {
    query.to_lowercase()
}

/// Nanoseconds since the Unix epoch, saturating outside the years 1677..2262.
///
/// Water expiry columns hold this so comparisons keep the clock's full
/// precision.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn epoch_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or(if at.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

/// A `LIMIT` argument; anything beyond `i64::MAX` means no limit.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Keep only the last occurrence of each key, preserving the order of those
/// last occurrences.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub(crate) fn dedup_last_wins<'a, T, K, F>(items: &'a [T], key: F) -> Vec<&'a T>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut last: HashMap<K, usize> = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        last.insert(key(item), i);
    }
    items
        .iter()
        .enumerate()
        .filter(|(i, item)| last.get(&key(item)) == Some(i))
        .map(|(_, item)| item)
        .collect()
}

pub use memory::{InMemoryIceStore, InMemoryWaterStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteIceStore, SqliteWaterStore};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresIceStore, PostgresWaterStore};

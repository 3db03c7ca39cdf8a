//! In-memory Ice and Water stores.
//!
//! Backed by sharded concurrent maps, so writers to different keys never
//! contend on one lock. Nothing survives a restart; byte sizes report zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::{system_clock, SharedClock};
use crate::error::StoreResult;
use crate::types::{Edge, EdgeKey, IceStats, MetaValue, Node, NodeState, WaterStats};
use super::{
    ensure_edge, ensure_tier, expiry_after, search_needle, search_text, IceStore, WaterStore,
    DEFAULT_WATER_TTL,
};

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    /// Creation sequence, kept across overwrites.
    seq: u64,
    updated_at: DateTime<Utc>,
    /// `None` for Ice entries.
    expires_at: Option<DateTime<Utc>>,
    search_text: String,
}

impl NodeEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone)]
struct EdgeEntry {
    edge: Edge,
    seq: u64,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl EdgeEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Node and edge maps shared by both in-memory stores.
#[derive(Debug, Default)]
struct Maps {
    nodes: DashMap<String, NodeEntry>,
    edges: DashMap<EdgeKey, EdgeEntry>,
    next_seq: AtomicU64,
}

impl Maps {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Upsert a node. Ice keeps the original creation sequence; Water
    /// (`fresh == true`) starts a new entry.
    fn put_node(&self, node: &Node, now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>, fresh: bool) {
        let seq = match self.nodes.get(&node.id) {
            Some(existing) if !fresh => existing.seq,
            _ => self.next_seq(),
        };
        self.nodes.insert(
            node.id.clone(),
            NodeEntry {
                node: node.clone(),
                seq,
                updated_at: now,
                expires_at,
                search_text: search_text(node),
            },
        );
    }

    fn put_edge(&self, edge: &Edge, now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) {
        let key = edge.key();
        let seq = match self.edges.get(&key) {
            Some(existing) => existing.seq,
            None => self.next_seq(),
        };
        self.edges.insert(
            key,
            EdgeEntry {
                edge: edge.clone(),
                seq,
                updated_at: now,
                expires_at,
            },
        );
    }

    /// Live nodes passing `filter`, in creation order.
    fn nodes_where<F>(&self, now: DateTime<Utc>, filter: F) -> Vec<Node>
    where
        F: Fn(&Node) -> bool,
    {
        let mut hits: Vec<(u64, Node)> = self
            .nodes
            .iter()
            .filter(|e| e.is_live(now) && filter(&e.node))
            .map(|e| (e.seq, e.node.clone()))
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        hits.into_iter().map(|(_, node)| node).collect()
    }

    /// Live edges passing `filter`, in creation order.
    fn edges_where<F>(&self, now: DateTime<Utc>, filter: F) -> Vec<Edge>
    where
        F: Fn(&Edge) -> bool,
    {
        let mut hits: Vec<(u64, Edge)> = self
            .edges
            .iter()
            .filter(|e| e.is_live(now) && filter(&e.edge))
            .map(|e| (e.seq, e.edge.clone()))
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        hits.into_iter().map(|(_, edge)| edge).collect()
    }

    fn search(&self, now: DateTime<Utc>, query: &str, limit: usize) -> Vec<Node> {
        if limit == 0 {
            return Vec::new();
        }
        let needle = search_needle(query);
        let mut hits: Vec<(u64, Node)> = self
            .nodes
            .iter()
            .filter(|e| e.is_live(now) && e.search_text.contains(&needle))
            .map(|e| (e.seq, e.node.clone()))
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        hits.truncate(limit);
        hits.into_iter().map(|(_, node)| node).collect()
    }

    fn by_meta(&self, now: DateTime<Utc>, key: &str, value: &MetaValue, limit: usize) -> Vec<Node> {
        let mut hits = self.nodes_where(now, |n| n.meta_value(key) == Some(value));
        hits.truncate(limit);
        hits
    }

    /// Remove a node and its incident edges.
    fn delete_node(&self, id: &str) -> bool {
        let existed = self.nodes.remove(id).is_some();
        let before = self.edges.len();
        self.edges.retain(|key, _| !key.touches(id));
        tracing::debug!(
            node_id = %id,
            existed,
            edges_removed = before.saturating_sub(self.edges.len()),
            "Deleted node"
        );
        existed
    }

    fn delete_edge(&self, from_id: &str, to_id: &str, role: &str) -> bool {
        self.edges.remove(&EdgeKey::new(from_id, to_id, role)).is_some()
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        let nodes = self.nodes.iter().map(|e| e.updated_at).max();
        let edges = self.edges.iter().map(|e| e.updated_at).max();
        nodes.max(edges)
    }
}

/// In-memory Ice store for tests and ephemeral deployments.
#[derive(Debug)]
pub struct InMemoryIceStore {
    maps: Maps,
    clock: SharedClock,
}

impl InMemoryIceStore {
    /// Create a new empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create a new empty store reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            maps: Maps::default(),
            clock,
        }
    }

    /// Number of stored nodes.
    pub fn num_nodes(&self) -> usize {
        self.maps.nodes.len()
    }

    /// Number of stored edges.
    pub fn num_edges(&self) -> usize {
        self.maps.edges.len()
    }
}

impl Default for InMemoryIceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IceStore for InMemoryIceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn store_node(&self, node: &Node) -> StoreResult<()> {
        ensure_tier(node, NodeState::Ice)?;
        self.maps.put_node(node, self.clock.now(), None, false);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        Ok(self.maps.nodes.get(id).map(|e| e.node.clone()))
    }

    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.maps.nodes_where(self.clock.now(), |_| true))
    }

    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>> {
        Ok(self.maps.nodes_where(self.clock.now(), |n| n.type_id == type_id))
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        Ok(self.maps.delete_node(id))
    }

    async fn store_edge(&self, edge: &Edge) -> StoreResult<()> {
        ensure_edge(edge)?;
        self.maps.put_edge(edge, self.clock.now(), None);
        Ok(())
    }

    async fn get_all_edges(&self) -> StoreResult<Vec<Edge>> {
        Ok(self.maps.edges_where(self.clock.now(), |_| true))
    }

    async fn get_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>> {
        Ok(self.maps.edges_where(self.clock.now(), |e| e.from_id == id))
    }

    async fn get_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>> {
        Ok(self.maps.edges_where(self.clock.now(), |e| e.to_id == id))
    }

    async fn delete_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool> {
        Ok(self.maps.delete_edge(from_id, to_id, role))
    }

    async fn batch_store_nodes(&self, nodes: &[Node]) -> StoreResult<usize> {
        // Validate everything before the first write so a bad node leaves
        // the store untouched.
        for node in nodes {
            ensure_tier(node, NodeState::Ice)?;
        }
        let now = self.clock.now();
        for node in nodes {
            self.maps.put_node(node, now, None, false);
        }
        Ok(nodes.len())
    }

    async fn batch_store_edges(&self, edges: &[Edge]) -> StoreResult<usize> {
        for edge in edges {
            ensure_edge(edge)?;
        }
        let now = self.clock.now();
        for edge in edges {
            self.maps.put_edge(edge, now, None);
        }
        Ok(edges.len())
    }

    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>> {
        Ok(self.maps.search(self.clock.now(), query, limit))
    }

    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>> {
        Ok(self.maps.by_meta(self.clock.now(), key, value, limit))
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get_stats(&self) -> StoreResult<IceStats> {
        Ok(IceStats {
            backend: BACKEND.to_string(),
            node_count: self.maps.nodes.len() as u64,
            edge_count: self.maps.edges.len() as u64,
            size_bytes: 0,
            last_updated: self.maps.last_updated(),
            extras: Default::default(),
        })
    }
}

/// In-memory Water store.
///
/// Each entry carries its own expiry. Reads skip expired entries, point
/// lookups delete them, and [`WaterStore::cleanup_expired_nodes`] sweeps
/// the rest.
#[derive(Debug)]
pub struct InMemoryWaterStore {
    maps: Maps,
    clock: SharedClock,
    default_ttl: Duration,
}

impl InMemoryWaterStore {
    /// Create a new empty store with the default TTL on the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create a new empty store reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            maps: Maps::default(),
            clock,
            default_ttl: DEFAULT_WATER_TTL,
        }
    }

    /// Override the TTL applied when callers pass none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Number of entries held, live or expired.
    pub fn num_entries(&self) -> usize {
        self.maps.nodes.len()
    }
}

impl Default for InMemoryWaterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WaterStore for InMemoryWaterStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn store_node(&self, node: &Node, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_tier(node, NodeState::Water)?;
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl.unwrap_or(self.default_ttl))?;
        self.maps.put_node(node, now, Some(expires_at), true);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let now = self.clock.now();
        match self.maps.nodes.get(id) {
            None => return Ok(None),
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.node.clone())),
            Some(_) => {}
        }
        // Only evict if still expired; a concurrent re-store may have
        // replaced the entry since the read.
        if self.maps.nodes.remove_if(id, |_, e| !e.is_live(now)).is_some() {
            tracing::debug!(node_id = %id, "Evicted expired water node on read");
        }
        Ok(None)
    }

    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.maps.nodes_where(self.clock.now(), |_| true))
    }

    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>> {
        Ok(self.maps.nodes_where(self.clock.now(), |n| n.type_id == type_id))
    }

    async fn get_nodes_generated_from(&self, source_id: &str) -> StoreResult<Vec<Node>> {
        Ok(self
            .maps
            .nodes_where(self.clock.now(), |n| n.generated_from() == Some(source_id)))
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        Ok(self.maps.delete_node(id))
    }

    async fn batch_store_nodes(&self, nodes: &[Node], ttl: Option<Duration>) -> StoreResult<usize> {
        for node in nodes {
            ensure_tier(node, NodeState::Water)?;
        }
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl.unwrap_or(self.default_ttl))?;
        for node in nodes {
            self.maps.put_node(node, now, Some(expires_at), true);
        }
        Ok(nodes.len())
    }

    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>> {
        Ok(self.maps.search(self.clock.now(), query, limit))
    }

    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>> {
        Ok(self.maps.by_meta(self.clock.now(), key, value, limit))
    }

    async fn cleanup_expired_nodes(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let before = self.maps.nodes.len();
        self.maps.nodes.retain(|_, e| e.is_live(now));
        let removed = before.saturating_sub(self.maps.nodes.len()) as u64;
        tracing::debug!(removed, "Swept expired water nodes");
        Ok(removed)
    }

    async fn store_water_edge(&self, edge: &Edge, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_edge(edge)?;
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl.unwrap_or(self.default_ttl))?;
        self.maps.put_edge(edge, now, Some(expires_at));
        Ok(())
    }

    async fn get_all_water_edges(&self) -> StoreResult<Vec<Edge>> {
        Ok(self.maps.edges_where(self.clock.now(), |_| true))
    }

    async fn get_water_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>> {
        let now = self.clock.now();
        // Lazy eviction for the edges this lookup touches
        self.maps
            .edges
            .retain(|key, e| key.from_id != id || e.is_live(now));
        Ok(self.maps.edges_where(now, |e| e.from_id == id))
    }

    async fn get_water_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>> {
        let now = self.clock.now();
        self.maps
            .edges
            .retain(|key, e| key.to_id != id || e.is_live(now));
        Ok(self.maps.edges_where(now, |e| e.to_id == id))
    }

    async fn delete_water_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool> {
        Ok(self.maps.delete_edge(from_id, to_id, role))
    }

    async fn cleanup_expired_edges(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let before = self.maps.edges.len();
        self.maps.edges.retain(|_, e| e.is_live(now));
        Ok(before.saturating_sub(self.maps.edges.len()) as u64)
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get_stats(&self) -> StoreResult<WaterStats> {
        let now = self.clock.now();
        let mut live = 0u64;
        let mut expired = 0u64;
        let mut remaining_ms = 0f64;
        for entry in self.maps.nodes.iter() {
            match entry.expires_at {
                Some(at) if at > now => {
                    live += 1;
                    remaining_ms += (at - now).num_milliseconds() as f64;
                }
                Some(_) => expired += 1,
                None => live += 1,
            }
        }
        let (live_edges, expired_edges) = self
            .maps
            .edges
            .iter()
            .fold((0u64, 0u64), |(l, x), e| if e.is_live(now) { (l + 1, x) } else { (l, x + 1) });

        Ok(WaterStats {
            backend: BACKEND.to_string(),
            water_node_count: live,
            expired_node_count: expired,
            water_edge_count: live_edges,
            expired_edge_count: expired_edges,
            average_ttl_remaining_secs: (live > 0).then(|| remaining_ms / live as f64 / 1000.0),
            size_bytes: 0,
            last_updated: self.maps.last_updated(),
            extras: Default::default(),
        })
    }
}

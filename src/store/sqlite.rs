//! SQLite Ice and Water stores for development and single-node deployments.
//!
//! ## Configuration
//!
//! - `SQLITE_URL`: database URL (default: `sqlite://data/tiers.db`).
//!   `sqlite::memory:` gives a private in-memory database.
//! - `SQLITE_MAX_CONNECTIONS`: pool size for file databases (default: 5)
//! - `SQLITE_BUSY_TIMEOUT_SECS`: lock wait before failing (default: 5)
//!
//! ## Schema
//!
//! `created_at` / `updated_at` are INTEGER milliseconds since the Unix epoch.
//! Water `expires_at` is INTEGER nanoseconds, so expiry is a plain integer
//! comparison against a bound "now" at the clock's full precision.
//! Content and metadata are JSON text; metadata lookups go through
//! `json_type` / `json_extract`. Search runs `LIKE` over `search_text`, a
//! lowercased copy of the searchable fields written with every node.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite};

use crate::clock::{system_clock, SharedClock};
use crate::error::StoreResult;
use crate::types::{Edge, IceStats, MetaValue, Node, NodeState, WaterStats};
use super::codec::{content_from_text, content_to_text, meta_from_text, meta_to_text, sqlite_json_path};
use super::{
    ensure_edge, ensure_tier, epoch_nanos, expiry_after, like_pattern, search_needle, search_text,
    sql_limit, IceStore, WaterStore, DEFAULT_WATER_TTL,
};

const BACKEND: &str = "sqlite";

const NODE_COLUMNS: &str = "id, type_id, locale, title, description, content, meta";
const EDGE_COLUMNS: &str = "from_id, to_id, role, weight, meta";

const ICE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ice_nodes (
    id TEXT PRIMARY KEY,
    type_id TEXT NOT NULL,
    locale TEXT,
    title TEXT,
    description TEXT,
    content TEXT,
    meta TEXT,
    search_text TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_type ON ice_nodes(type_id);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_created ON ice_nodes(created_at);

CREATE TABLE IF NOT EXISTS ice_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    role TEXT NOT NULL,
    weight REAL,
    meta TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (from_id, to_id, role)
);
CREATE INDEX IF NOT EXISTS idx_ice_edges_from ON ice_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_ice_edges_to ON ice_edges(to_id);
CREATE INDEX IF NOT EXISTS idx_ice_edges_role ON ice_edges(role);
"#;

const WATER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS water_nodes (
    id TEXT PRIMARY KEY,
    type_id TEXT NOT NULL,
    locale TEXT,
    title TEXT,
    description TEXT,
    content TEXT,
    meta TEXT,
    search_text TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    -- nanoseconds since the epoch
    expires_at INTEGER NOT NULL,
    generated_from TEXT
);
CREATE INDEX IF NOT EXISTS idx_water_nodes_type ON water_nodes(type_id);
CREATE INDEX IF NOT EXISTS idx_water_nodes_expires ON water_nodes(expires_at);
CREATE INDEX IF NOT EXISTS idx_water_nodes_generated_from ON water_nodes(generated_from);
CREATE INDEX IF NOT EXISTS idx_water_nodes_created ON water_nodes(created_at);

CREATE TABLE IF NOT EXISTS water_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    role TEXT NOT NULL,
    weight REAL,
    meta TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    -- nanoseconds since the epoch
    expires_at INTEGER NOT NULL,
    UNIQUE (from_id, to_id, role)
);
CREATE INDEX IF NOT EXISTS idx_water_edges_from ON water_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_water_edges_to ON water_edges(to_id);
CREATE INDEX IF NOT EXISTS idx_water_edges_expires ON water_edges(expires_at);
"#;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL.
    pub url: String,
    /// Maximum connections in pool (default: 5). Forced to 1 for in-memory
    /// databases, which exist per connection.
    pub max_connections: u32,
    /// Busy timeout in seconds (default: 5).
    pub busy_timeout_secs: u64,
}

impl SqliteConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("SQLITE_URL")
                .unwrap_or_else(|_| "sqlite://data/tiers.db".to_string()),
            max_connections: std::env::var("SQLITE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            busy_timeout_secs: std::env::var("SQLITE_BUSY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }

    /// A private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            busy_timeout_secs: 5,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Open a pool for this configuration.
    pub async fn connect(&self) -> StoreResult<SqlitePool> {
        let in_memory = self.is_in_memory();
        tracing::info!(
            in_memory,
            max_connections = self.max_connections,
            "Opening SQLite pool"
        );

        let mut options = SqliteConnectOptions::from_str(&self.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(self.busy_timeout_secs));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            // The database lives and dies with its one connection
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(self.max_connections.max(1))
        };

        Ok(pool_options.connect_with(options).await?)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn parse_node_row(row: &SqliteRow, state: NodeState) -> StoreResult<Node> {
    let content: Option<String> = row.try_get("content")?;
    let meta: Option<String> = row.try_get("meta")?;
    Ok(Node {
        id: row.try_get("id")?,
        type_id: row.try_get("type_id")?,
        state,
        locale: row.try_get("locale")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        content: content_from_text(content.as_deref())?,
        meta: meta_from_text(meta.as_deref())?,
    })
}

fn parse_edge_row(row: &SqliteRow) -> StoreResult<Edge> {
    let meta: Option<String> = row.try_get("meta")?;
    Ok(Edge {
        from_id: row.try_get("from_id")?,
        to_id: row.try_get("to_id")?,
        role: row.try_get("role")?,
        weight: row.try_get("weight")?,
        meta: meta_from_text(meta.as_deref())?,
    })
}

/// Decode rows, logging and skipping any that fail.
fn collect_nodes(rows: &[SqliteRow], state: NodeState) -> Vec<Node> {
    rows.iter()
        .filter_map(|row| match parse_node_row(row, state) {
            Ok(node) => Some(node),
            Err(e) => {
                let id: Option<String> = row.try_get("id").ok();
                tracing::warn!(node_id = ?id, error = %e, "Skipping unreadable node row");
                None
            }
        })
        .collect()
}

fn collect_edges(rows: &[SqliteRow]) -> Vec<Edge> {
    rows.iter()
        .filter_map(|row| match parse_edge_row(row) {
            Ok(edge) => Some(edge),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable edge row");
                None
            }
        })
        .collect()
}

/// `json_type` expected for `value`, plus the extra comparison (if any) that
/// pins the exact value.
fn meta_match(value: &MetaValue) -> (&'static str, &'static str) {
    match value {
        MetaValue::Null => ("null", ""),
        MetaValue::Bool(true) => ("true", ""),
        MetaValue::Bool(false) => ("false", ""),
        MetaValue::Int(_) => ("integer", " AND json_extract(meta, ?) = ?"),
        MetaValue::Float(_) => ("real", " AND json_extract(meta, ?) = ?"),
        MetaValue::String(_) => ("text", " AND json_extract(meta, ?) = ?"),
        MetaValue::Array(_) => ("array", " AND json_extract(meta, ?) = json(?)"),
        MetaValue::Map(_) => ("object", " AND json_extract(meta, ?) = json(?)"),
    }
}

/// Run a metadata lookup against `table`, keeping only rows that expire after
/// `now_ns` when it is present.
async fn query_by_meta(
    pool: &SqlitePool,
    table: &str,
    key: &str,
    value: &MetaValue,
    limit: usize,
    now_ns: Option<i64>,
) -> StoreResult<Vec<SqliteRow>> {
    let path = sqlite_json_path(key);
    let (json_type, compare) = meta_match(value);
    let live = if now_ns.is_some() { " AND expires_at > ?" } else { "" };
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM {table} \
         WHERE json_type(meta, ?) = ?{compare}{live} \
         ORDER BY created_at, rowid LIMIT ?"
    );

    let mut query = sqlx::query(&sql).bind(path.as_str()).bind(json_type);
    query = match value {
        MetaValue::Int(i) => query.bind(path.as_str()).bind(*i),
        MetaValue::Float(f) => query.bind(path.as_str()).bind(*f),
        MetaValue::String(s) => query.bind(path.as_str()).bind(s.as_str()),
        MetaValue::Array(_) | MetaValue::Map(_) => {
            query.bind(path.as_str()).bind(value.to_json().to_string())
        }
        MetaValue::Null | MetaValue::Bool(_) => query,
    };
    if let Some(now_ns) = now_ns {
        query = query.bind(now_ns);
    }
    Ok(query.bind(sql_limit(limit)).fetch_all(pool).await?)
}

async fn page_bytes(pool: &SqlitePool) -> StoreResult<(i64, i64)> {
    let row = sqlx::query(
        "SELECT page_count, page_size FROM pragma_page_count(), pragma_page_size()",
    )
    .fetch_one(pool)
    .await?;
    Ok((row.try_get("page_count")?, row.try_get("page_size")?))
}

async fn probe(pool: &SqlitePool) -> bool {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "SQLite liveness probe failed");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ice
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite Ice store.
#[derive(Debug, Clone)]
pub struct SqliteIceStore {
    pool: SqlitePool,
    clock: SharedClock,
}

impl SqliteIceStore {
    /// Open a pool from `config`.
    pub async fn connect(config: &SqliteConfig) -> StoreResult<Self> {
        Ok(Self::from_pool(config.connect().await?))
    }

    /// Use an existing pool, e.g. one shared with a [`SqliteWaterStore`].
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: system_clock(),
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_node<'e, E>(executor: E, node: &Node, now_ms: i64) -> StoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO ice_nodes
                (id, type_id, locale, title, description, content, meta, search_text,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                type_id = excluded.type_id,
                locale = excluded.locale,
                title = excluded.title,
                description = excluded.description,
                content = excluded.content,
                meta = excluded.meta,
                search_text = excluded.search_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&node.id)
        .bind(&node.type_id)
        .bind(&node.locale)
        .bind(&node.title)
        .bind(&node.description)
        .bind(content_to_text(node.content.as_ref())?)
        .bind(meta_to_text(node.meta.as_ref())?)
        .bind(search_text(node))
        .bind(now_ms)
        .bind(now_ms)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn upsert_edge<'e, E>(executor: E, edge: &Edge, now_ms: i64) -> StoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO ice_edges (from_id, to_id, role, weight, meta, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(from_id, to_id, role) DO UPDATE SET
                weight = excluded.weight,
                meta = excluded.meta,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(&edge.role)
        .bind(edge.weight)
        .bind(meta_to_text(edge.meta.as_ref())?)
        .bind(now_ms)
        .bind(now_ms)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn select_edges(&self, filter: &str, id: &str) -> StoreResult<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM ice_edges WHERE {filter} = ? ORDER BY id");
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(collect_edges(&rows))
    }
}

#[async_trait]
impl IceStore for SqliteIceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.pool.execute(ICE_SCHEMA).await?;
        tracing::info!("Initialized SQLite ice schema");
        Ok(())
    }

    async fn store_node(&self, node: &Node) -> StoreResult<()> {
        ensure_tier(node, NodeState::Ice)?;
        Self::upsert_node(&self.pool, node, to_millis(self.clock.now())).await?;
        tracing::debug!(node_id = %node.id, "Stored ice node");
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM ice_nodes WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| parse_node_row(&r, NodeState::Ice)).transpose()
    }

    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM ice_nodes ORDER BY created_at, rowid");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM ice_nodes WHERE type_id = ? ORDER BY created_at, rowid"
        );
        let rows = sqlx::query(&sql).bind(type_id).fetch_all(&self.pool).await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let edges = sqlx::query("DELETE FROM ice_edges WHERE from_id = ? OR to_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let nodes = sqlx::query("DELETE FROM ice_nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::debug!(node_id = %id, edges_removed = edges, "Deleted ice node");
        Ok(nodes > 0)
    }

    async fn store_edge(&self, edge: &Edge) -> StoreResult<()> {
        ensure_edge(edge)?;
        Self::upsert_edge(&self.pool, edge, to_millis(self.clock.now())).await
    }

    async fn get_all_edges(&self) -> StoreResult<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM ice_edges ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(collect_edges(&rows))
    }

    async fn get_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>> {
        self.select_edges("from_id", id).await
    }

    async fn get_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>> {
        self.select_edges("to_id", id).await
    }

    async fn delete_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM ice_edges WHERE from_id = ? AND to_id = ? AND role = ?")
            .bind(from_id)
            .bind(to_id)
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn batch_store_nodes(&self, nodes: &[Node]) -> StoreResult<usize> {
        for node in nodes {
            ensure_tier(node, NodeState::Ice)?;
        }
        let now_ms = to_millis(self.clock.now());
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            // An error drops `tx`, rolling back every earlier row
            Self::upsert_node(&mut *tx, node, now_ms).await?;
        }
        tx.commit().await?;
        tracing::debug!(count = nodes.len(), "Batch stored ice nodes");
        Ok(nodes.len())
    }

    async fn batch_store_edges(&self, edges: &[Edge]) -> StoreResult<usize> {
        for edge in edges {
            ensure_edge(edge)?;
        }
        let now_ms = to_millis(self.clock.now());
        let mut tx = self.pool.begin().await?;
        for edge in edges {
            Self::upsert_edge(&mut *tx, edge, now_ms).await?;
        }
        tx.commit().await?;
        tracing::debug!(count = edges.len(), "Batch stored ice edges");
        Ok(edges.len())
    }

    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT {NODE_COLUMNS} FROM ice_nodes
               WHERE search_text LIKE ? ESCAPE '\'
               ORDER BY created_at, rowid
               LIMIT ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(&search_needle(query)))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>> {
        let rows = query_by_meta(&self.pool, "ice_nodes", key, value, limit, None).await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn is_available(&self) -> bool {
        probe(&self.pool).await
    }

    async fn get_stats(&self) -> StoreResult<IceStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ice_nodes) AS node_count,
                (SELECT COUNT(*) FROM ice_edges) AS edge_count,
                (SELECT MAX(updated_at) FROM ice_nodes) AS nodes_updated,
                (SELECT MAX(updated_at) FROM ice_edges) AS edges_updated
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let (page_count, page_size) = page_bytes(&self.pool).await?;

        let nodes_updated: Option<i64> = row.try_get("nodes_updated")?;
        let edges_updated: Option<i64> = row.try_get("edges_updated")?;
        let node_count: i64 = row.try_get("node_count")?;
        let edge_count: i64 = row.try_get("edge_count")?;

        Ok(IceStats {
            backend: BACKEND.to_string(),
            node_count: node_count as u64,
            edge_count: edge_count as u64,
            size_bytes: (page_count * page_size) as u64,
            last_updated: from_millis(nodes_updated.max(edges_updated)),
            extras: [
                ("page_count".to_string(), page_count.to_string()),
                ("page_size".to_string(), page_size.to_string()),
            ]
            .into_iter()
            .collect(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Water
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite Water store.
#[derive(Debug, Clone)]
pub struct SqliteWaterStore {
    pool: SqlitePool,
    clock: SharedClock,
    default_ttl: Duration,
}

impl SqliteWaterStore {
    /// Open a pool from `config`.
    pub async fn connect(config: &SqliteConfig) -> StoreResult<Self> {
        Ok(Self::from_pool(config.connect().await?))
    }

    /// Use an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: system_clock(),
            default_ttl: DEFAULT_WATER_TTL,
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the TTL applied when callers pass none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn now_ns(&self) -> i64 {
        epoch_nanos(self.clock.now())
    }

    /// Write time in milliseconds and expiry in nanoseconds.
    fn expiry(&self, ttl: Option<Duration>) -> StoreResult<(i64, i64)> {
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl.unwrap_or(self.default_ttl))?;
        Ok((to_millis(now), epoch_nanos(expires_at)))
    }

    async fn upsert_node<'e, E>(executor: E, node: &Node, now_ms: i64, expires_ns: i64) -> StoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        // A re-store is a fresh entry: created_at resets along with expiry
        sqlx::query(
            r#"
            INSERT INTO water_nodes
                (id, type_id, locale, title, description, content, meta, search_text,
                 created_at, updated_at, expires_at, generated_from)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                type_id = excluded.type_id,
                locale = excluded.locale,
                title = excluded.title,
                description = excluded.description,
                content = excluded.content,
                meta = excluded.meta,
                search_text = excluded.search_text,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at,
                generated_from = excluded.generated_from
            "#,
        )
        .bind(&node.id)
        .bind(&node.type_id)
        .bind(&node.locale)
        .bind(&node.title)
        .bind(&node.description)
        .bind(content_to_text(node.content.as_ref())?)
        .bind(meta_to_text(node.meta.as_ref())?)
        .bind(search_text(node))
        .bind(now_ms)
        .bind(now_ms)
        .bind(expires_ns)
        .bind(node.generated_from())
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn select_live_nodes(&self, filter: &str, arg: Option<&str>) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM water_nodes WHERE expires_at > ?{filter} ORDER BY created_at, rowid"
        );
        let mut query = sqlx::query(&sql).bind(self.now_ns());
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(collect_nodes(&rows, NodeState::Water))
    }

    async fn select_live_edges(&self, column: &str, id: &str) -> StoreResult<Vec<Edge>> {
        let now_ns = self.now_ns();
        let evict = format!("DELETE FROM water_edges WHERE {column} = ? AND expires_at <= ?");
        sqlx::query(&evict)
            .bind(id)
            .bind(now_ns)
            .execute(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM water_edges WHERE {column} = ? AND expires_at > ? ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .bind(now_ns)
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_edges(&rows))
    }
}

#[async_trait]
impl WaterStore for SqliteWaterStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.pool.execute(WATER_SCHEMA).await?;
        tracing::info!("Initialized SQLite water schema");
        Ok(())
    }

    async fn store_node(&self, node: &Node, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_tier(node, NodeState::Water)?;
        let (now_ms, expires_ns) = self.expiry(ttl)?;
        Self::upsert_node(&self.pool, node, now_ms, expires_ns).await?;
        tracing::debug!(node_id = %node.id, expires_ns, "Stored water node");
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let now_ns = self.now_ns();
        let sql = format!("SELECT {NODE_COLUMNS}, expires_at FROM water_nodes WHERE id = ?");
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let expires_ns: i64 = row.try_get("expires_at")?;
        if expires_ns > now_ns {
            return parse_node_row(&row, NodeState::Water).map(Some);
        }

        // Guard on expiry so a concurrent re-store survives
        let evicted = sqlx::query("DELETE FROM water_nodes WHERE id = ? AND expires_at <= ?")
            .bind(id)
            .bind(now_ns)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if evicted > 0 {
            tracing::debug!(node_id = %id, "Evicted expired water node on read");
        }
        Ok(None)
    }

    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>> {
        self.select_live_nodes("", None).await
    }

    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>> {
        self.select_live_nodes(" AND type_id = ?", Some(type_id)).await
    }

    async fn get_nodes_generated_from(&self, source_id: &str) -> StoreResult<Vec<Node>> {
        self.select_live_nodes(" AND generated_from = ?", Some(source_id)).await
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM water_edges WHERE from_id = ? OR to_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let nodes = sqlx::query("DELETE FROM water_nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(nodes > 0)
    }

    async fn batch_store_nodes(&self, nodes: &[Node], ttl: Option<Duration>) -> StoreResult<usize> {
        for node in nodes {
            ensure_tier(node, NodeState::Water)?;
        }
        let (now_ms, expires_ns) = self.expiry(ttl)?;
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            Self::upsert_node(&mut *tx, node, now_ms, expires_ns).await?;
        }
        tx.commit().await?;
        Ok(nodes.len())
    }

    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT {NODE_COLUMNS} FROM water_nodes
               WHERE expires_at > ? AND search_text LIKE ? ESCAPE '\'
               ORDER BY created_at, rowid
               LIMIT ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(self.now_ns())
            .bind(like_pattern(&search_needle(query)))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_nodes(&rows, NodeState::Water))
    }

    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>> {
        let rows =
            query_by_meta(&self.pool, "water_nodes", key, value, limit, Some(self.now_ns())).await?;
        Ok(collect_nodes(&rows, NodeState::Water))
    }

    async fn cleanup_expired_nodes(&self) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM water_nodes WHERE expires_at <= ?")
            .bind(self.now_ns())
            .execute(&self.pool)
            .await?
            .rows_affected();
        tracing::debug!(removed, "Swept expired water nodes");
        Ok(removed)
    }

    async fn store_water_edge(&self, edge: &Edge, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_edge(edge)?;
        let (now_ms, expires_ns) = self.expiry(ttl)?;
        sqlx::query(
            r#"
            INSERT INTO water_edges
                (from_id, to_id, role, weight, meta, created_at, updated_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(from_id, to_id, role) DO UPDATE SET
                weight = excluded.weight,
                meta = excluded.meta,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(&edge.role)
        .bind(edge.weight)
        .bind(meta_to_text(edge.meta.as_ref())?)
        .bind(now_ms)
        .bind(now_ms)
        .bind(expires_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_water_edges(&self) -> StoreResult<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM water_edges WHERE expires_at > ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(self.now_ns())
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_edges(&rows))
    }

    async fn get_water_edges_from(&self, id: &str) -> StoreResult<Vec<Edge>> {
        self.select_live_edges("from_id", id).await
    }

    async fn get_water_edges_to(&self, id: &str) -> StoreResult<Vec<Edge>> {
        self.select_live_edges("to_id", id).await
    }

    async fn delete_water_edge(&self, from_id: &str, to_id: &str, role: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM water_edges WHERE from_id = ? AND to_id = ? AND role = ?")
                .bind(from_id)
                .bind(to_id)
                .bind(role)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired_edges(&self) -> StoreResult<u64> {
        Ok(sqlx::query("DELETE FROM water_edges WHERE expires_at <= ?")
            .bind(self.now_ns())
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    async fn is_available(&self) -> bool {
        probe(&self.pool).await
    }

    async fn get_stats(&self) -> StoreResult<WaterStats> {
        let now_ns = self.now_ns();
        let nodes = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0) AS live,
                COALESCE(SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END), 0) AS expired,
                AVG(CASE WHEN expires_at > ? THEN expires_at - ? END) AS avg_remaining_ns,
                MAX(updated_at) AS last_updated
            FROM water_nodes
            "#,
        )
        .bind(now_ns)
        .bind(now_ns)
        .bind(now_ns)
        .bind(now_ns)
        .fetch_one(&self.pool)
        .await?;
        let edges = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0) AS live,
                COALESCE(SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END), 0) AS expired,
                MAX(updated_at) AS last_updated
            FROM water_edges
            "#,
        )
        .bind(now_ns)
        .bind(now_ns)
        .fetch_one(&self.pool)
        .await?;
        let (page_count, page_size) = page_bytes(&self.pool).await?;

        let live: i64 = nodes.try_get("live")?;
        let expired: i64 = nodes.try_get("expired")?;
        let avg_remaining_ns: Option<f64> = nodes.try_get("avg_remaining_ns")?;
        let nodes_updated: Option<i64> = nodes.try_get("last_updated")?;
        let live_edges: i64 = edges.try_get("live")?;
        let expired_edges: i64 = edges.try_get("expired")?;
        let edges_updated: Option<i64> = edges.try_get("last_updated")?;

        Ok(WaterStats {
            backend: BACKEND.to_string(),
            water_node_count: live as u64,
            expired_node_count: expired as u64,
            water_edge_count: live_edges as u64,
            expired_edge_count: expired_edges as u64,
            average_ttl_remaining_secs: avg_remaining_ns.map(|ns| ns / 1e9),
            size_bytes: (page_count * page_size) as u64,
            last_updated: from_millis(nodes_updated.max(edges_updated)),
            extras: [(
                "default_ttl_secs".to_string(),
                self.default_ttl.as_secs().to_string(),
            )]
            .into_iter()
            .collect(),
        })
    }
}

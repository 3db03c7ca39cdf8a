//! PostgreSQL Ice and Water stores for the federated, high-volume target.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! Content and metadata are JSONB with GIN indexes, so metadata lookups
//! are containment queries (`meta @> '{"k": v}'`). Ice batch writes stream
//! through binary `COPY` into a transaction-scoped staging table and are
//! upserted from there.
//!
//! Water `expires_at` is BIGINT nanoseconds since the Unix epoch; TIMESTAMPTZ
//! would round the clock to microseconds. Search runs over `search_text`, the
//! same lowercased document the other backends match against, rather than
//! `jsonb::text`, whose spacing differs from serde's.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Executor, Row};

use crate::clock::{system_clock, SharedClock};
use crate::error::StoreResult;
use crate::types::{Edge, IceStats, MetaValue, Node, NodeState, WaterStats};
use super::codec::{content_from_json, content_to_json, meta_from_json, meta_probe, meta_to_json};
use super::copy::{copy_in, BinaryCopyWriter};
use super::{
    dedup_last_wins, ensure_edge, ensure_tier, epoch_nanos, expiry_after, like_pattern,
    search_needle, search_text, sql_limit, IceStore, WaterStore, DEFAULT_WATER_TTL,
};

const BACKEND: &str = "postgres";

const NODE_COLUMNS: &str = "id, type_id, locale, title, description, content, meta";
const EDGE_COLUMNS: &str = "from_id, to_id, role, weight, meta";

const ICE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ice_nodes (
    id TEXT PRIMARY KEY,
    seq BIGSERIAL,
    type_id TEXT NOT NULL,
    locale TEXT,
    title TEXT,
    description TEXT,
    content JSONB,
    meta JSONB,
    search_text TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_type ON ice_nodes(type_id);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_created ON ice_nodes(created_at, seq);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_content ON ice_nodes USING GIN (content);
CREATE INDEX IF NOT EXISTS idx_ice_nodes_meta ON ice_nodes USING GIN (meta);

CREATE TABLE IF NOT EXISTS ice_edges (
    id BIGSERIAL PRIMARY KEY,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    role TEXT NOT NULL,
    weight DOUBLE PRECISION,
    meta JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (from_id, to_id, role)
);
CREATE INDEX IF NOT EXISTS idx_ice_edges_from ON ice_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_ice_edges_to ON ice_edges(to_id);
CREATE INDEX IF NOT EXISTS idx_ice_edges_role ON ice_edges(role);
"#;

const WATER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS water_nodes (
    id TEXT PRIMARY KEY,
    seq BIGSERIAL,
    type_id TEXT NOT NULL,
    locale TEXT,
    title TEXT,
    description TEXT,
    content JSONB,
    meta JSONB,
    search_text TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    -- nanoseconds since the epoch
    expires_at BIGINT NOT NULL,
    generated_from TEXT
);
CREATE INDEX IF NOT EXISTS idx_water_nodes_type ON water_nodes(type_id);
CREATE INDEX IF NOT EXISTS idx_water_nodes_expires ON water_nodes(expires_at);
CREATE INDEX IF NOT EXISTS idx_water_nodes_generated_from ON water_nodes(generated_from);
CREATE INDEX IF NOT EXISTS idx_water_nodes_created ON water_nodes(created_at, seq);
CREATE INDEX IF NOT EXISTS idx_water_nodes_meta ON water_nodes USING GIN (meta);

CREATE TABLE IF NOT EXISTS water_edges (
    id BIGSERIAL PRIMARY KEY,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    role TEXT NOT NULL,
    weight DOUBLE PRECISION,
    meta JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    -- nanoseconds since the epoch
    expires_at BIGINT NOT NULL,
    UNIQUE (from_id, to_id, role)
);
CREATE INDEX IF NOT EXISTS idx_water_edges_from ON water_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_water_edges_to ON water_edges(to_id);
CREATE INDEX IF NOT EXISTS idx_water_edges_expires ON water_edges(expires_at);
"#;

/// Configuration for PostgreSQL connection pool.
///
/// Defaults favour failing fast: short acquire timeout, idle connections
/// released after five minutes, connections recycled every thirty.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/tiers".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }

    /// Configuration for `database_url` with default pool settings.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::from_env()
        }
    }

    /// Open a pool for this configuration.
    pub async fn connect(&self) -> StoreResult<PgPool> {
        tracing::info!(
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(self.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&self.database_url)
            .await?;

        Ok(pool)
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

impl PoolStats {
    fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
            max: pool.options().get_max_connections(),
        }
    }

    fn into_extras(self) -> std::collections::BTreeMap<String, String> {
        [
            ("pool_size".to_string(), self.size.to_string()),
            ("pool_idle".to_string(), self.idle.to_string()),
            ("pool_max".to_string(), self.max.to_string()),
        ]
        .into_iter()
        .collect()
    }
}

/// Parse a node from a database row.
fn parse_node_row(row: &PgRow, state: NodeState) -> StoreResult<Node> {
    let content: Option<serde_json::Value> = row.try_get("content")?;
    let meta: Option<serde_json::Value> = row.try_get("meta")?;
    Ok(Node {
        id: row.try_get("id")?,
        type_id: row.try_get("type_id")?,
        state,
        locale: row.try_get("locale")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        content: content_from_json(content)?,
        meta: meta_from_json(meta)?,
    })
}

fn parse_edge_row(row: &PgRow) -> StoreResult<Edge> {
    let meta: Option<serde_json::Value> = row.try_get("meta")?;
    Ok(Edge {
        from_id: row.try_get("from_id")?,
        to_id: row.try_get("to_id")?,
        role: row.try_get("role")?,
        weight: row.try_get("weight")?,
        meta: meta_from_json(meta)?,
    })
}

/// Decode rows, logging and skipping any that fail.
fn collect_nodes(rows: &[PgRow], state: NodeState) -> Vec<Node> {
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

fn collect_edges(rows: &[PgRow]) -> Vec<Edge> {
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

async fn probe(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "PostgreSQL liveness probe failed");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ice
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL Ice store.
#[derive(Debug, Clone)]
pub struct PostgresIceStore {
    pool: PgPool,
    clock: SharedClock,
}

impl PostgresIceStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: &PostgresConfig) -> StoreResult<Self> {
        Ok(Self::from_pool(config.connect().await?))
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::new(&PostgresConfig::from_env()).await
    }

    /// Use an existing pool, e.g. one shared with a [`PostgresWaterStore`].
    pub fn from_pool(pool: PgPool) -> Self {
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

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats::of(&self.pool)
    }

    async fn select_edges(&self, column: &str, id: &str) -> StoreResult<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM ice_edges WHERE {column} = $1 ORDER BY id");
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(collect_edges(&rows))
    }
}

#[async_trait]
impl IceStore for PostgresIceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.pool.execute(ICE_SCHEMA).await?;
        tracing::info!("Initialized PostgreSQL ice schema");
        Ok(())
    }

    async fn store_node(&self, node: &Node) -> StoreResult<()> {
        ensure_tier(node, NodeState::Ice)?;
        sqlx::query(
            r#"
            INSERT INTO ice_nodes
                (id, type_id, locale, title, description, content, meta, search_text,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (id) DO UPDATE SET
                type_id = EXCLUDED.type_id,
                locale = EXCLUDED.locale,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                content = EXCLUDED.content,
                meta = EXCLUDED.meta,
                search_text = EXCLUDED.search_text,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&node.id)
        .bind(&node.type_id)
        .bind(&node.locale)
        .bind(&node.title)
        .bind(&node.description)
        .bind(content_to_json(node.content.as_ref())?.map(Json))
        .bind(meta_to_json(node.meta.as_ref())?.map(Json))
        .bind(search_text(node))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        tracing::debug!(node_id = %node.id, "Stored ice node");
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM ice_nodes WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| parse_node_row(&r, NodeState::Ice)).transpose()
    }

    async fn get_all_nodes(&self) -> StoreResult<Vec<Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM ice_nodes ORDER BY created_at, seq");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn get_nodes_by_type(&self, type_id: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM ice_nodes WHERE type_id = $1 ORDER BY created_at, seq"
        );
        let rows = sqlx::query(&sql).bind(type_id).fetch_all(&self.pool).await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let edges = sqlx::query("DELETE FROM ice_edges WHERE from_id = $1 OR to_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let nodes = sqlx::query("DELETE FROM ice_nodes WHERE id = $1")
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
        sqlx::query(
            r#"
            INSERT INTO ice_edges (from_id, to_id, role, weight, meta, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (from_id, to_id, role) DO UPDATE SET
                weight = EXCLUDED.weight,
                meta = EXCLUDED.meta,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(&edge.role)
        .bind(edge.weight)
        .bind(meta_to_json(edge.meta.as_ref())?.map(Json))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        Ok(())
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
        let result =
            sqlx::query("DELETE FROM ice_edges WHERE from_id = $1 AND to_id = $2 AND role = $3")
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
        if nodes.is_empty() {
            return Ok(0);
        }

        // ON CONFLICT cannot touch one row twice in a statement
        let unique = dedup_last_wins(nodes, |n| n.id.as_str());
        let now = self.clock.now();
        let mut writer = BinaryCopyWriter::new();
        for node in &unique {
            writer.begin_row(10);
            writer.text(Some(&node.id));
            writer.text(Some(&node.type_id));
            writer.text(node.locale.as_deref());
            writer.text(node.title.as_deref());
            writer.text(node.description.as_deref());
            writer.jsonb(content_to_json(node.content.as_ref())?.as_ref());
            writer.jsonb(meta_to_json(node.meta.as_ref())?.as_ref());
            writer.text(Some(&search_text(node)));
            writer.timestamptz(now);
            writer.timestamptz(now);
        }
        let rows = writer.rows();
        let payload = writer.finish();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TEMP TABLE ice_nodes_staging (
                id TEXT, type_id TEXT, locale TEXT, title TEXT, description TEXT,
                content JSONB, meta JSONB, search_text TEXT,
                created_at TIMESTAMPTZ, updated_at TIMESTAMPTZ
            ) ON COMMIT DROP
            "#,
        )
        .execute(&mut *tx)
        .await?;
        copy_in(
            &mut *tx,
            "COPY ice_nodes_staging \
             (id, type_id, locale, title, description, content, meta, search_text, created_at, updated_at) \
             FROM STDIN (FORMAT binary)",
            &payload,
        )
        .await?;
        sqlx::query(
            r#"
            INSERT INTO ice_nodes
                (id, type_id, locale, title, description, content, meta, search_text,
                 created_at, updated_at)
            SELECT id, type_id, locale, title, description, content, meta, search_text,
                   created_at, updated_at
            FROM ice_nodes_staging
            ON CONFLICT (id) DO UPDATE SET
                type_id = EXCLUDED.type_id,
                locale = EXCLUDED.locale,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                content = EXCLUDED.content,
                meta = EXCLUDED.meta,
                search_text = EXCLUDED.search_text,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(count = nodes.len(), rows, "Bulk copied ice nodes");
        Ok(nodes.len())
    }

    async fn batch_store_edges(&self, edges: &[Edge]) -> StoreResult<usize> {
        for edge in edges {
            ensure_edge(edge)?;
        }
        if edges.is_empty() {
            return Ok(0);
        }

        let unique = dedup_last_wins(edges, Edge::key);
        let now = self.clock.now();
        let mut writer = BinaryCopyWriter::new();
        for edge in &unique {
            writer.begin_row(7);
            writer.text(Some(&edge.from_id));
            writer.text(Some(&edge.to_id));
            writer.text(Some(&edge.role));
            writer.float8(edge.weight);
            writer.jsonb(meta_to_json(edge.meta.as_ref())?.as_ref());
            writer.timestamptz(now);
            writer.timestamptz(now);
        }
        let rows = writer.rows();
        let payload = writer.finish();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TEMP TABLE ice_edges_staging (
                from_id TEXT, to_id TEXT, role TEXT, weight DOUBLE PRECISION,
                meta JSONB, created_at TIMESTAMPTZ, updated_at TIMESTAMPTZ
            ) ON COMMIT DROP
            "#,
        )
        .execute(&mut *tx)
        .await?;
        copy_in(
            &mut *tx,
            "COPY ice_edges_staging (from_id, to_id, role, weight, meta, created_at, updated_at) \
             FROM STDIN (FORMAT binary)",
            &payload,
        )
        .await?;
        sqlx::query(
            r#"
            INSERT INTO ice_edges (from_id, to_id, role, weight, meta, created_at, updated_at)
            SELECT from_id, to_id, role, weight, meta, created_at, updated_at
            FROM ice_edges_staging
            ON CONFLICT (from_id, to_id, role) DO UPDATE SET
                weight = EXCLUDED.weight,
                meta = EXCLUDED.meta,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(count = edges.len(), rows, "Bulk copied ice edges");
        Ok(edges.len())
    }

    async fn search_nodes(&self, query: &str, limit: usize) -> StoreResult<Vec<Node>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT {NODE_COLUMNS} FROM ice_nodes
               WHERE search_text ILIKE $1
               ORDER BY created_at, seq
               LIMIT $2"#
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(&search_needle(query)))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_nodes(&rows, NodeState::Ice))
    }

    async fn get_nodes_by_meta(&self, key: &str, value: &MetaValue, limit: usize) -> StoreResult<Vec<Node>> {
        // Containment hits the GIN index; the equality pins arrays and maps
        // to an exact match.
        let sql = format!(
            r#"SELECT {NODE_COLUMNS} FROM ice_nodes
               WHERE meta @> $1 AND meta -> $2 = $3
               ORDER BY created_at, seq
               LIMIT $4"#
        );
        let rows = sqlx::query(&sql)
            .bind(Json(meta_probe(key, value)))
            .bind(key)
            .bind(Json(value.to_json()))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
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
                (SELECT MAX(updated_at) FROM ice_edges) AS edges_updated,
                (pg_total_relation_size('ice_nodes') + pg_total_relation_size('ice_edges'))::BIGINT
                    AS size_bytes
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let node_count: i64 = row.try_get("node_count")?;
        let edge_count: i64 = row.try_get("edge_count")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;
        let nodes_updated: Option<DateTime<Utc>> = row.try_get("nodes_updated")?;
        let edges_updated: Option<DateTime<Utc>> = row.try_get("edges_updated")?;

        Ok(IceStats {
            backend: BACKEND.to_string(),
            node_count: node_count as u64,
            edge_count: edge_count as u64,
            size_bytes: size_bytes as u64,
            last_updated: nodes_updated.max(edges_updated),
            extras: self.pool_stats().into_extras(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Water
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL Water store.
#[derive(Debug, Clone)]
pub struct PostgresWaterStore {
    pool: PgPool,
    clock: SharedClock,
    default_ttl: Duration,
}

impl PostgresWaterStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: &PostgresConfig) -> StoreResult<Self> {
        Ok(Self::from_pool(config.connect().await?))
    }

    /// Use an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
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

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn now_ns(&self) -> i64 {
        epoch_nanos(self.clock.now())
    }

    /// Write time, and expiry in nanoseconds.
    fn expiry(&self, ttl: Option<Duration>) -> StoreResult<(DateTime<Utc>, i64)> {
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl.unwrap_or(self.default_ttl))?;
        Ok((now, epoch_nanos(expires_at)))
    }

    async fn upsert_node(
        conn: &mut PgConnection,
        node: &Node,
        now: DateTime<Utc>,
        expires_ns: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO water_nodes
                (id, type_id, locale, title, description, content, meta, search_text,
                 created_at, updated_at, expires_at, generated_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                type_id = EXCLUDED.type_id,
                locale = EXCLUDED.locale,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                content = EXCLUDED.content,
                meta = EXCLUDED.meta,
                search_text = EXCLUDED.search_text,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at,
                generated_from = EXCLUDED.generated_from
            "#,
        )
        .bind(&node.id)
        .bind(&node.type_id)
        .bind(&node.locale)
        .bind(&node.title)
        .bind(&node.description)
        .bind(content_to_json(node.content.as_ref())?.map(Json))
        .bind(meta_to_json(node.meta.as_ref())?.map(Json))
        .bind(search_text(node))
        .bind(now)
        .bind(expires_ns)
        .bind(node.generated_from())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn select_live_nodes(&self, filter: &str, arg: Option<&str>) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM water_nodes WHERE expires_at > $1{filter} ORDER BY created_at, seq"
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
        let evict = format!("DELETE FROM water_edges WHERE {column} = $1 AND expires_at <= $2");
        sqlx::query(&evict)
            .bind(id)
            .bind(now_ns)
            .execute(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM water_edges WHERE {column} = $1 AND expires_at > $2 ORDER BY id"
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
impl WaterStore for PostgresWaterStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.pool.execute(WATER_SCHEMA).await?;
        tracing::info!("Initialized PostgreSQL water schema");
        Ok(())
    }

    async fn store_node(&self, node: &Node, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_tier(node, NodeState::Water)?;
        let (now, expires_ns) = self.expiry(ttl)?;
        let mut conn = self.pool.acquire().await?;
        Self::upsert_node(&mut conn, node, now, expires_ns).await?;
        tracing::debug!(node_id = %node.id, expires_ns, "Stored water node");
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let now_ns = self.now_ns();
        let sql = format!("SELECT {NODE_COLUMNS}, expires_at FROM water_nodes WHERE id = $1");
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let expires_ns: i64 = row.try_get("expires_at")?;
        if expires_ns > now_ns {
            return parse_node_row(&row, NodeState::Water).map(Some);
        }

        let evicted = sqlx::query("DELETE FROM water_nodes WHERE id = $1 AND expires_at <= $2")
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
        self.select_live_nodes(" AND type_id = $2", Some(type_id)).await
    }

    async fn get_nodes_generated_from(&self, source_id: &str) -> StoreResult<Vec<Node>> {
        self.select_live_nodes(" AND generated_from = $2", Some(source_id)).await
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM water_edges WHERE from_id = $1 OR to_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let nodes = sqlx::query("DELETE FROM water_nodes WHERE id = $1")
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
        let (now, expires_ns) = self.expiry(ttl)?;
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            Self::upsert_node(&mut *tx, node, now, expires_ns).await?;
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
               WHERE expires_at > $1 AND search_text ILIKE $2
               ORDER BY created_at, seq
               LIMIT $3"#
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
        let sql = format!(
            r#"SELECT {NODE_COLUMNS} FROM water_nodes
               WHERE expires_at > $1 AND meta @> $2 AND meta -> $3 = $4
               ORDER BY created_at, seq
               LIMIT $5"#
        );
        let rows = sqlx::query(&sql)
            .bind(self.now_ns())
            .bind(Json(meta_probe(key, value)))
            .bind(key)
            .bind(Json(value.to_json()))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_nodes(&rows, NodeState::Water))
    }

    async fn cleanup_expired_nodes(&self) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM water_nodes WHERE expires_at <= $1")
            .bind(self.now_ns())
            .execute(&self.pool)
            .await?
            .rows_affected();
        tracing::debug!(removed, "Swept expired water nodes");
        Ok(removed)
    }

    async fn store_water_edge(&self, edge: &Edge, ttl: Option<Duration>) -> StoreResult<()> {
        ensure_edge(edge)?;
        let (now, expires_ns) = self.expiry(ttl)?;
        sqlx::query(
            r#"
            INSERT INTO water_edges
                (from_id, to_id, role, weight, meta, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            ON CONFLICT (from_id, to_id, role) DO UPDATE SET
                weight = EXCLUDED.weight,
                meta = EXCLUDED.meta,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(&edge.role)
        .bind(edge.weight)
        .bind(meta_to_json(edge.meta.as_ref())?.map(Json))
        .bind(now)
        .bind(expires_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_water_edges(&self) -> StoreResult<Vec<Edge>> {
        let sql =
            format!("SELECT {EDGE_COLUMNS} FROM water_edges WHERE expires_at > $1 ORDER BY id");
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
            sqlx::query("DELETE FROM water_edges WHERE from_id = $1 AND to_id = $2 AND role = $3")
                .bind(from_id)
                .bind(to_id)
                .bind(role)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired_edges(&self) -> StoreResult<u64> {
        Ok(sqlx::query("DELETE FROM water_edges WHERE expires_at <= $1")
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
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM water_nodes WHERE expires_at > $1) AS live,
                (SELECT COUNT(*) FROM water_nodes WHERE expires_at <= $1) AS expired,
                (SELECT (AVG(expires_at - $1) / 1e9)::FLOAT8
                    FROM water_nodes WHERE expires_at > $1) AS avg_remaining_secs,
                (SELECT COUNT(*) FROM water_edges WHERE expires_at > $1) AS live_edges,
                (SELECT COUNT(*) FROM water_edges WHERE expires_at <= $1) AS expired_edges,
                (SELECT MAX(updated_at) FROM water_nodes) AS nodes_updated,
                (SELECT MAX(updated_at) FROM water_edges) AS edges_updated,
                (pg_total_relation_size('water_nodes') + pg_total_relation_size('water_edges'))::BIGINT
                    AS size_bytes
            "#,
        )
        .bind(now_ns)
        .fetch_one(&self.pool)
        .await?;

        let live: i64 = row.try_get("live")?;
        let expired: i64 = row.try_get("expired")?;
        let live_edges: i64 = row.try_get("live_edges")?;
        let expired_edges: i64 = row.try_get("expired_edges")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;
        let nodes_updated: Option<DateTime<Utc>> = row.try_get("nodes_updated")?;
        let edges_updated: Option<DateTime<Utc>> = row.try_get("edges_updated")?;

        let mut extras = PoolStats::of(&self.pool).into_extras();
        extras.insert(
            "default_ttl_secs".to_string(),
            self.default_ttl.as_secs().to_string(),
        );

        Ok(WaterStats {
            backend: BACKEND.to_string(),
            water_node_count: live as u64,
            expired_node_count: expired as u64,
            water_edge_count: live_edges as u64,
            expired_edge_count: expired_edges as u64,
            average_ttl_remaining_secs: row.try_get("avg_remaining_secs")?,
            size_bytes: size_bytes as u64,
            last_updated: nodes_updated.max(edges_updated),
            extras,
        })
    }
}

//! Environment-driven configuration and the backend factory.
//!
//! Environment variables:
//! - `ICE_BACKEND`, `WATER_BACKEND`: `memory`, `sqlite` or `postgres` (default: memory)
//! - `WATER_DEFAULT_TTL_SECS`: TTL applied when callers pass none (default: 1800)
//! - `WATER_SWEEP_INTERVAL_SECS`: period of the background sweeper, at least 1 (default: 60)
//! - `SQLITE_URL` and friends, see [`SqliteConfig`](crate::store::SqliteConfig)
//! - `DATABASE_URL` and `DB_*`, see [`PostgresConfig`](crate::store::PostgresConfig)

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{system_clock, SharedClock};
use crate::error::{StoreError, StoreResult};
use crate::store::{InMemoryIceStore, InMemoryWaterStore, IceStore, WaterStore, DEFAULT_WATER_TTL};

#[cfg(feature = "postgres")]
use crate::store::{PostgresConfig, PostgresIceStore, PostgresWaterStore};
#[cfg(feature = "sqlite")]
use crate::store::{SqliteConfig, SqliteIceStore, SqliteWaterStore};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Storage backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Process memory; nothing survives a restart.
    #[default]
    Memory,
    /// Embedded SQLite file.
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

impl BackendKind {
    /// Lowercase name, as accepted by `from_str`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            other => Err(StoreError::validation(format!("unknown backend: {other}"))),
        }
    }
}

/// Which backends to open, and how.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend for the Ice tier.
    pub ice_backend: BackendKind,
    /// Backend for the Water tier.
    pub water_backend: BackendKind,
    /// TTL applied to Water writes that pass none.
    pub water_default_ttl: Duration,
    /// Period of the background sweeper.
    pub sweep_interval: Duration,
    /// Time source handed to every store.
    pub clock: SharedClock,
    /// SQLite pool settings.
    #[cfg(feature = "sqlite")]
    pub sqlite: SqliteConfig,
    /// PostgreSQL pool settings.
    #[cfg(feature = "postgres")]
    pub postgres: PostgresConfig,
}

fn backend_from_env(var: &str) -> BackendKind {
    match std::env::var(var) {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            tracing::warn!(var, value = %value, error = %e, "Falling back to memory backend");
            BackendKind::Memory
        }),
        Err(_) => BackendKind::Memory,
    }
}

fn secs_from_env(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Sweep period from its raw setting; zero or garbage keeps the default.
fn sweep_interval_from(raw: Option<&str>) -> Duration {
    match raw.map(|s| s.trim().parse::<u64>()) {
        Some(Ok(0)) => {
            tracing::warn!("WATER_SWEEP_INTERVAL_SECS must be positive, using the default");
            DEFAULT_SWEEP_INTERVAL
        }
        Some(Ok(secs)) => Duration::from_secs(secs),
        _ => DEFAULT_SWEEP_INTERVAL,
    }
}

impl StoreConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            ice_backend: backend_from_env("ICE_BACKEND"),
            water_backend: backend_from_env("WATER_BACKEND"),
            water_default_ttl: secs_from_env("WATER_DEFAULT_TTL_SECS", DEFAULT_WATER_TTL),
            sweep_interval: sweep_interval_from(
                std::env::var("WATER_SWEEP_INTERVAL_SECS").ok().as_deref(),
            ),
            clock: system_clock(),
            #[cfg(feature = "sqlite")]
            sqlite: SqliteConfig::from_env(),
            #[cfg(feature = "postgres")]
            postgres: PostgresConfig::from_env(),
        }
    }

    /// Memory backends for both tiers.
    pub fn memory() -> Self {
        Self {
            ice_backend: BackendKind::Memory,
            water_backend: BackendKind::Memory,
            ..Self::from_env()
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn unavailable(kind: BackendKind) -> StoreError {
    StoreError::BackendUnavailable(format!("{kind} support is not compiled in"))
}

/// Open the configured Ice store. The caller still runs `initialize`.
pub async fn open_ice_store(config: &StoreConfig) -> StoreResult<Arc<dyn IceStore>> {
    tracing::info!(backend = %config.ice_backend, "Opening ice store");
    match config.ice_backend {
        BackendKind::Memory => Ok(Arc::new(InMemoryIceStore::with_clock(config.clock.clone()))),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => {
            let pool = config.sqlite.connect().await?;
            Ok(Arc::new(SqliteIceStore::from_pool(pool).with_clock(config.clock.clone())))
        }
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => {
            let pool = config.postgres.connect().await?;
            Ok(Arc::new(PostgresIceStore::from_pool(pool).with_clock(config.clock.clone())))
        }
        #[allow(unreachable_patterns)]
        other => Err(unavailable(other)),
    }
}

/// Open the configured Water store. The caller still runs `initialize`.
pub async fn open_water_store(config: &StoreConfig) -> StoreResult<Arc<dyn WaterStore>> {
    tracing::info!(
        backend = %config.water_backend,
        default_ttl_secs = config.water_default_ttl.as_secs(),
        "Opening water store"
    );
    match config.water_backend {
        BackendKind::Memory => Ok(Arc::new(
            InMemoryWaterStore::with_clock(config.clock.clone())
                .with_default_ttl(config.water_default_ttl),
        )),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => {
            let pool = config.sqlite.connect().await?;
            Ok(Arc::new(
                SqliteWaterStore::from_pool(pool)
                    .with_clock(config.clock.clone())
                    .with_default_ttl(config.water_default_ttl),
            ))
        }
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => {
            let pool = config.postgres.connect().await?;
            Ok(Arc::new(
                PostgresWaterStore::from_pool(pool)
                    .with_clock(config.clock.clone())
                    .with_default_ttl(config.water_default_ttl),
            ))
        }
        #[allow(unreachable_patterns)]
        other => Err(unavailable(other)),
    }
}

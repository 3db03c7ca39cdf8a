//! # tiered-graph-store
//!
//! Tiered node/edge storage for a knowledge graph.
//!
//! Every node declares a persistence tier:
//!
//! - **Ice**: immutable, durable, federated-scale content.
//! - **Water**: mutable, cache-like content that expires after a TTL.
//! - **Gas**: derived on demand and never stored.
//!
//! ## Architecture
//!
//! ```text
//! Node ──► TierRouter ──► IceStore   (memory | SQLite | PostgreSQL)
//!                    └──► WaterStore (memory | SQLite | PostgreSQL) ◄── sweeper
//! ```
//!
//! A store only accepts nodes of its own tier. Water entries become
//! invisible at `expires_at` and are physically removed lazily on read or by
//! a sweep.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod router;
pub mod store;
pub mod types;

#[cfg(feature = "sweeper")]
pub mod sweeper;

// Re-exports
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{open_ice_store, open_water_store, BackendKind, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use router::TierRouter;
pub use store::{IceStore, InMemoryIceStore, InMemoryWaterStore, WaterStore, DEFAULT_WATER_TTL};
#[cfg(feature = "sqlite")]
pub use store::{SqliteConfig, SqliteIceStore, SqliteWaterStore};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresIceStore, PostgresWaterStore};
#[cfg(feature = "sweeper")]
pub use sweeper::{spawn_sweeper, SweeperHandle, MIN_SWEEP_INTERVAL};
pub use types::{
    Content, ContentPayload, Edge, EdgeKey, IceStats, Meta, MetaValue, Node, NodeState,
    SweepReport, WaterStats,
};

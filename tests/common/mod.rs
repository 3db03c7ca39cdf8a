//! Behavioural contract shared by every backend.
//!
//! Each backend suite builds fixtures and expands [`ice_contract_tests!`] and
//! [`water_contract_tests!`], so all backends run the same assertions.

#![allow(dead_code)]

use std::sync::Arc;

use tiered_graph_store::{IceStore, ManualClock, SharedClock, WaterStore};

pub mod ice;
pub mod water;

/// A store under test and the clock it reads.
pub struct Fixture<S: ?Sized> {
    pub store: Arc<S>,
    pub clock: ManualClock,
}

pub type IceFixture = Fixture<dyn IceStore>;
pub type WaterFixture = Fixture<dyn WaterStore>;

/// A fresh manual clock and the handle stores take.
pub fn manual_clock() -> (ManualClock, SharedClock) {
    let clock = ManualClock::starting_now();
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

/// Advance `clock` by whole milliseconds.
pub fn advance_ms(clock: &ManualClock, ms: i64) {
    clock.advance(chrono::Duration::milliseconds(ms));
}

/// Expand one `#[tokio::test]` per Ice contract case.
///
/// `$setup` is an expression evaluating to a future of
/// `Option<IceFixture>`; `None` skips the case.
macro_rules! ice_contract_tests {
    ($setup:expr) => {
        $crate::common::ice_contract_tests!(@cases $setup;
            ice_round_trip,
            ice_missing_node_is_none,
            ice_rejects_other_tiers,
            ice_overwrite_keeps_creation_order,
            ice_nodes_by_type,
            ice_edge_natural_key,
            ice_edges_by_endpoint,
            ice_delete_cascades_edges,
            ice_delete_missing_is_false,
            ice_batch_upserts_last_wins,
            ice_batch_rejects_mixed_tiers,
            ice_batch_edges,
            ice_search_scenario,
            ice_search_covers_content_and_meta,
            ice_search_limit,
            ice_search_folds_non_ascii,
            ice_search_spans_json_punctuation,
            ice_unbounded_limit,
            ice_meta_lookup,
            ice_stats,
            ice_is_available
        );
    };
    (@cases $setup:expr; $($case:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                let Some(fixture) = $setup.await else {
                    eprintln!("skipping {}: backend not configured", stringify!($case));
                    return;
                };
                $crate::common::ice::$case(&fixture).await;
            }
        )*
    };
}

/// Expand one `#[tokio::test]` per Water contract case.
macro_rules! water_contract_tests {
    ($setup:expr) => {
        $crate::common::water_contract_tests!(@cases $setup;
            water_round_trip,
            water_rejects_other_tiers,
            water_ttl_monotonicity,
            water_ttl_holds_between_milliseconds,
            water_zero_ttl_is_expired,
            water_default_ttl_applies,
            water_restore_extends_expiry,
            water_lazy_eviction_on_read,
            water_sweep_is_idempotent,
            water_sweep_reports_nodes_and_edges,
            water_stats_scenario,
            water_generated_from,
            water_nodes_by_type_skips_expired,
            water_edges_expire,
            water_edge_natural_key,
            water_delete_cascades_water_edges,
            water_batch_shares_ttl,
            water_batch_rejects_mixed_tiers,
            water_search_skips_expired,
            water_meta_lookup_skips_expired,
            water_is_available
        );
    };
    (@cases $setup:expr; $($case:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                let Some(fixture) = $setup.await else {
                    eprintln!("skipping {}: backend not configured", stringify!($case));
                    return;
                };
                $crate::common::water::$case(&fixture).await;
            }
        )*
    };
}

pub(crate) use ice_contract_tests;
pub(crate) use water_contract_tests;

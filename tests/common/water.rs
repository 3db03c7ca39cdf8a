//! Water contract cases.

use std::time::Duration;

use tiered_graph_store::{Content, Edge, MetaValue, Node, NodeState, StoreError};

use super::{advance_ms, WaterFixture};

const MINUTE: Duration = Duration::from_secs(60);

fn ids(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|n| n.id.as_str()).collect()
}

fn summary(id: &str) -> Node {
    Node::water(id, "summary")
}

pub async fn water_round_trip(fx: &WaterFixture) {
    let node = Node::water("draft-1", "summary")
        .with_locale("fr")
        .with_title("Résumé provisoire")
        .with_description("Generated overview")
        .with_content(Content::inline("application/json", MetaValue::Array(vec![1i64.into(), "two".into()])))
        .with_meta("model", "v2")
        .with_meta("confidence", 0.5);

    fx.store.store_node(&node, Some(MINUTE)).await.unwrap();
    assert_eq!(fx.store.get_node("draft-1").await.unwrap(), Some(node));
    assert_eq!(fx.store.get_node("other").await.unwrap(), None);
}

pub async fn water_rejects_other_tiers(fx: &WaterFixture) {
    for state in [NodeState::Ice, NodeState::Gas] {
        let node = Node::new("n1", "concept", state);
        let err = fx.store.store_node(&node, None).await.unwrap_err();
        assert!(
            matches!(err, StoreError::TierMismatch { expected: NodeState::Water, actual, .. } if actual == state),
            "unexpected error: {err}"
        );
    }
    assert_eq!(fx.store.get_node("n1").await.unwrap(), None);
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
}

pub async fn water_ttl_monotonicity(fx: &WaterFixture) {
    fx.store.store_node(&summary("w1"), Some(MINUTE)).await.unwrap();

    advance_ms(&fx.clock, 59_999);
    assert!(fx.store.get_node("w1").await.unwrap().is_some());
    assert_eq!(ids(&fx.store.get_all_nodes().await.unwrap()), vec!["w1"]);

    advance_ms(&fx.clock, 1);
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert!(fx.store.get_node("w1").await.unwrap().is_none());

    advance_ms(&fx.clock, 3_600_000);
    assert!(fx.store.get_node("w1").await.unwrap().is_none());
}

pub async fn water_ttl_holds_between_milliseconds(fx: &WaterFixture) {
    // Stored 600µs past a whole millisecond
    let start = chrono::DateTime::from_timestamp(1_700_000_000, 600_000).unwrap();
    fx.clock.set(start);
    fx.store
        .store_node(&summary("w1"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    fx.store
        .store_water_edge(&Edge::new("w1", "w2", "suggests"), Some(Duration::from_secs(1)))
        .await
        .unwrap();

    fx.clock.set(start + chrono::Duration::microseconds(999_500));
    assert!(fx.store.get_node("w1").await.unwrap().is_some());
    assert_eq!(ids(&fx.store.get_all_nodes().await.unwrap()), vec!["w1"]);
    assert_eq!(fx.store.get_water_edges_from("w1").await.unwrap().len(), 1);

    fx.clock.set(start + chrono::Duration::nanoseconds(999_999_999));
    assert!(fx.store.get_node("w1").await.unwrap().is_some());

    fx.clock.set(start + chrono::Duration::seconds(1));
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert!(fx.store.get_node("w1").await.unwrap().is_none());
    assert!(fx.store.get_all_water_edges().await.unwrap().is_empty());
}

pub async fn water_zero_ttl_is_expired(fx: &WaterFixture) {
    fx.store.store_node(&summary("w0"), Some(Duration::ZERO)).await.unwrap();
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert!(fx.store.get_node("w0").await.unwrap().is_none());
}

pub async fn water_default_ttl_applies(fx: &WaterFixture) {
    let ttl_ms = fx.store.default_ttl().as_millis() as i64;
    fx.store.store_node(&summary("w1"), None).await.unwrap();

    advance_ms(&fx.clock, ttl_ms - 1);
    assert!(fx.store.get_node("w1").await.unwrap().is_some());
    advance_ms(&fx.clock, 1);
    assert!(fx.store.get_node("w1").await.unwrap().is_none());
}

pub async fn water_restore_extends_expiry(fx: &WaterFixture) {
    let ttl = Duration::from_secs(10);
    fx.store.store_node(&summary("w1"), Some(ttl)).await.unwrap();
    advance_ms(&fx.clock, 8_000);
    fx.store
        .store_node(&summary("w1").with_title("refreshed"), Some(ttl))
        .await
        .unwrap();
    advance_ms(&fx.clock, 8_000);

    let node = fx.store.get_node("w1").await.unwrap().unwrap();
    assert_eq!(node.title.as_deref(), Some("refreshed"));
    assert_eq!(fx.store.get_all_nodes().await.unwrap().len(), 1);
}

pub async fn water_lazy_eviction_on_read(fx: &WaterFixture) {
    fx.store
        .store_node(&summary("w1"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1_000);

    let before = fx.store.get_stats().await.unwrap();
    assert_eq!(before.expired_node_count, 1);

    assert!(fx.store.get_node("w1").await.unwrap().is_none());

    // The read removed the row, so there is nothing left to sweep.
    let after = fx.store.get_stats().await.unwrap();
    assert_eq!(after.expired_node_count, 0);
    assert_eq!(fx.store.cleanup_expired_nodes().await.unwrap(), 0);
}

pub async fn water_sweep_is_idempotent(fx: &WaterFixture) {
    fx.store
        .store_node(&summary("short-1"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("short-2"), Some(Duration::from_secs(2)))
        .await
        .unwrap();
    fx.store.store_node(&summary("long"), Some(MINUTE)).await.unwrap();
    advance_ms(&fx.clock, 5_000);

    assert_eq!(fx.store.cleanup_expired_nodes().await.unwrap(), 2);
    assert_eq!(fx.store.cleanup_expired_nodes().await.unwrap(), 0);
    assert_eq!(ids(&fx.store.get_all_nodes().await.unwrap()), vec!["long"]);
}

pub async fn water_sweep_reports_nodes_and_edges(fx: &WaterFixture) {
    let short = Some(Duration::from_secs(1));
    fx.store.store_node(&summary("a"), short).await.unwrap();
    fx.store.store_node(&summary("b"), Some(MINUTE)).await.unwrap();
    fx.store
        .store_water_edge(&Edge::new("a", "b", "suggests"), short)
        .await
        .unwrap();
    fx.store
        .store_water_edge(&Edge::new("b", "a", "suggests"), short)
        .await
        .unwrap();
    fx.store
        .store_water_edge(&Edge::new("b", "c", "suggests"), Some(MINUTE))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1_000);

    let report = fx.store.sweep().await.unwrap();
    assert_eq!((report.nodes, report.edges), (1, 2));
    assert_eq!(report.total(), 3);
    assert_eq!(fx.store.sweep().await.unwrap().total(), 0);
    assert_eq!(fx.store.get_all_water_edges().await.unwrap().len(), 1);
}

pub async fn water_stats_scenario(fx: &WaterFixture) {
    let empty = fx.store.get_stats().await.unwrap();
    assert_eq!(empty.backend, fx.store.backend());
    assert_eq!((empty.water_node_count, empty.expired_node_count), (0, 0));
    assert_eq!(empty.average_ttl_remaining_secs, None);

    for id in ["live-1", "live-2", "live-3"] {
        fx.store
            .store_node(&summary(id), Some(Duration::from_secs(100)))
            .await
            .unwrap();
    }
    for id in ["stale-1", "stale-2"] {
        fx.store
            .store_node(&summary(id), Some(Duration::ZERO))
            .await
            .unwrap();
    }
    fx.store
        .store_water_edge(&Edge::new("live-1", "live-2", "r"), Some(MINUTE))
        .await
        .unwrap();

    let stats = fx.store.get_stats().await.unwrap();
    assert_eq!(stats.water_node_count, 3);
    assert_eq!(stats.expired_node_count, 2);
    assert_eq!(stats.water_edge_count, 1);
    assert_eq!(stats.expired_edge_count, 0);
    let avg = stats.average_ttl_remaining_secs.unwrap();
    assert!((avg - 100.0).abs() < 1e-6, "average ttl {avg}");
    assert_eq!(stats.last_updated, Some(tiered_graph_store::Clock::now(&fx.clock)));
}

pub async fn water_generated_from(fx: &WaterFixture) {
    let derived = summary("s1").with_meta("generated_from", "paper-7");
    let sibling = summary("s2").with_meta("generated_from", "paper-7");
    fx.store.store_node(&derived, Some(MINUTE)).await.unwrap();
    advance_ms(&fx.clock, 1);
    fx.store
        .store_node(&sibling, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("s3").with_meta("generated_from", 7i64), Some(MINUTE))
        .await
        .unwrap();

    let hits = fx.store.get_nodes_generated_from("paper-7").await.unwrap();
    assert_eq!(ids(&hits), vec!["s1", "s2"]);

    advance_ms(&fx.clock, 2_000);
    assert_eq!(fx.store.get_nodes_generated_from("paper-7").await.unwrap(), vec![derived]);
    assert!(fx.store.get_nodes_generated_from("7").await.unwrap().is_empty());
}

pub async fn water_nodes_by_type_skips_expired(fx: &WaterFixture) {
    fx.store
        .store_node(&Node::water("short", "draft"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    fx.store
        .store_node(&Node::water("long", "draft"), Some(MINUTE))
        .await
        .unwrap();
    fx.store
        .store_node(&Node::water("other", "note"), Some(MINUTE))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1_000);

    assert_eq!(ids(&fx.store.get_nodes_by_type("draft").await.unwrap()), vec!["long"]);
}

pub async fn water_edges_expire(fx: &WaterFixture) {
    let edge = Edge::new("a", "b", "suggests").with_weight(0.4);
    fx.store
        .store_water_edge(&edge, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(fx.store.get_water_edges_from("a").await.unwrap(), vec![edge.clone()]);
    assert_eq!(fx.store.get_water_edges_to("b").await.unwrap(), vec![edge.clone()]);
    assert!(fx.store.get_water_edges_to("a").await.unwrap().is_empty());

    advance_ms(&fx.clock, 5_000);
    assert!(fx.store.get_all_water_edges().await.unwrap().is_empty());
    assert!(fx.store.get_water_edges_from("a").await.unwrap().is_empty());
    assert!(fx.store.get_water_edges_to("b").await.unwrap().is_empty());
    // The endpoint lookups evicted it.
    assert_eq!(fx.store.cleanup_expired_edges().await.unwrap(), 0);
}

pub async fn water_edge_natural_key(fx: &WaterFixture) {
    fx.store
        .store_water_edge(&Edge::new("a", "b", "suggests").with_weight(0.1), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    advance_ms(&fx.clock, 4_000);
    fx.store
        .store_water_edge(&Edge::new("a", "b", "suggests").with_weight(0.8), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    advance_ms(&fx.clock, 4_000);

    let edges = fx.store.get_all_water_edges().await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].weight, Some(0.8));

    assert!(fx.store.delete_water_edge("a", "b", "suggests").await.unwrap());
    assert!(!fx.store.delete_water_edge("a", "b", "suggests").await.unwrap());
}

pub async fn water_delete_cascades_water_edges(fx: &WaterFixture) {
    fx.store.store_node(&summary("a"), None).await.unwrap();
    fx.store.store_node(&summary("b"), None).await.unwrap();
    fx.store
        .store_water_edge(&Edge::new("a", "b", "suggests"), None)
        .await
        .unwrap();
    fx.store
        .store_water_edge(&Edge::new("c", "a", "suggests"), None)
        .await
        .unwrap();
    fx.store
        .store_water_edge(&Edge::new("b", "c", "suggests"), None)
        .await
        .unwrap();

    assert!(fx.store.delete_node("a").await.unwrap());
    assert!(!fx.store.delete_node("a").await.unwrap());
    assert_eq!(
        fx.store.get_all_water_edges().await.unwrap(),
        vec![Edge::new("b", "c", "suggests")]
    );
}

pub async fn water_batch_shares_ttl(fx: &WaterFixture) {
    let batch = vec![summary("a"), summary("b"), summary("c")];
    assert_eq!(
        fx.store
            .batch_store_nodes(&batch, Some(Duration::from_secs(30)))
            .await
            .unwrap(),
        3
    );
    assert_eq!(fx.store.get_all_nodes().await.unwrap().len(), 3);

    advance_ms(&fx.clock, 30_000);
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert_eq!(fx.store.cleanup_expired_nodes().await.unwrap(), 3);
}

pub async fn water_batch_rejects_mixed_tiers(fx: &WaterFixture) {
    let batch = vec![summary("a"), Node::ice("b", "summary")];
    let err = fx.store.batch_store_nodes(&batch, None).await.unwrap_err();
    assert!(err.is_validation());
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert_eq!(fx.store.get_stats().await.unwrap().expired_node_count, 0);
}

pub async fn water_search_skips_expired(fx: &WaterFixture) {
    fx.store
        .store_node(&summary("q").with_title("Quantum Resonance"), Some(MINUTE))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("f").with_title("Fractal Consciousness"), Some(MINUTE))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("old").with_title("Resonance, revisited"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1_000);

    assert_eq!(ids(&fx.store.search_nodes("reso", 10).await.unwrap()), vec!["q"]);
    assert!(fx.store.search_nodes("reso", 0).await.unwrap().is_empty());
}

pub async fn water_meta_lookup_skips_expired(fx: &WaterFixture) {
    fx.store
        .store_node(&summary("live").with_meta("model", "v2"), Some(MINUTE))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("stale").with_meta("model", "v2"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    fx.store
        .store_node(&summary("v1").with_meta("model", "v1"), Some(MINUTE))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1_000);

    let hits = fx.store.get_nodes_by_meta("model", &"v2".into(), 10).await.unwrap();
    assert_eq!(ids(&hits), vec!["live"]);
}

pub async fn water_is_available(fx: &WaterFixture) {
    assert!(fx.store.is_available().await);
}

//! Ice contract cases.

use tiered_graph_store::{Content, Edge, MetaValue, Node, NodeState, StoreError};

use super::{advance_ms, IceFixture};

fn ids(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|n| n.id.as_str()).collect()
}

fn paper(id: &str, title: &str) -> Node {
    Node::ice(id, "paper").with_title(title)
}

pub async fn ice_round_trip(fx: &IceFixture) {
    let nested: tiered_graph_store::Meta = [
        ("source".to_string(), MetaValue::from("arxiv")),
        ("depth".to_string(), MetaValue::from(2i64)),
    ]
    .into_iter()
    .collect();
    let full = Node::ice("paper-1", "paper")
        .with_locale("en-GB")
        .with_title("Quantum Resonance")
        .with_description("Coupled oscillators at scale")
        .with_content(Content::inline("text/markdown", "# Abstract\nHello"))
        .with_meta("year", 2021i64)
        .with_meta("score", 0.75)
        .with_meta("peer_reviewed", true)
        .with_meta("retracted", MetaValue::Null)
        .with_meta(
            "tags",
            MetaValue::Array(vec!["physics".into(), "waves".into()]),
        )
        .with_meta("provenance", MetaValue::Map(nested));
    let external = Node::ice("paper-2", "paper")
        .with_content(Content::external("application/pdf", "s3://papers/2.pdf"));
    let bare = Node::ice("paper-3", "paper");

    for node in [&full, &external, &bare] {
        fx.store.store_node(node).await.unwrap();
        assert_eq!(fx.store.get_node(&node.id).await.unwrap().as_ref(), Some(node));
    }
}

pub async fn ice_missing_node_is_none(fx: &IceFixture) {
    assert_eq!(fx.store.get_node("nope").await.unwrap(), None);
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
    assert!(fx.store.get_all_edges().await.unwrap().is_empty());
}

pub async fn ice_rejects_other_tiers(fx: &IceFixture) {
    for state in [NodeState::Water, NodeState::Gas] {
        let node = Node::new("n1", "concept", state);
        let err = fx.store.store_node(&node).await.unwrap_err();
        assert!(
            matches!(err, StoreError::TierMismatch { expected: NodeState::Ice, actual, .. } if actual == state),
            "unexpected error: {err}"
        );
    }
    let err = fx.store.store_node(&Node::ice("", "concept")).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(fx.store.get_node("n1").await.unwrap(), None);
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
}

pub async fn ice_overwrite_keeps_creation_order(fx: &IceFixture) {
    fx.store.store_node(&paper("a", "first")).await.unwrap();
    advance_ms(&fx.clock, 5);
    fx.store.store_node(&paper("b", "second")).await.unwrap();
    advance_ms(&fx.clock, 5);
    fx.store.store_node(&paper("a", "rewritten")).await.unwrap();

    let all = fx.store.get_all_nodes().await.unwrap();
    assert_eq!(ids(&all), vec!["a", "b"]);
    assert_eq!(all[0].title.as_deref(), Some("rewritten"));
}

pub async fn ice_nodes_by_type(fx: &IceFixture) {
    fx.store.store_node(&Node::ice("p1", "paper")).await.unwrap();
    advance_ms(&fx.clock, 1);
    fx.store.store_node(&Node::ice("c1", "concept")).await.unwrap();
    advance_ms(&fx.clock, 1);
    fx.store.store_node(&Node::ice("p2", "paper")).await.unwrap();

    let papers = fx.store.get_nodes_by_type("paper").await.unwrap();
    assert_eq!(ids(&papers), vec!["p1", "p2"]);
    assert!(fx.store.get_nodes_by_type("person").await.unwrap().is_empty());
}

pub async fn ice_edge_natural_key(fx: &IceFixture) {
    fx.store
        .store_edge(&Edge::new("a", "b", "cites").with_weight(0.2))
        .await
        .unwrap();
    fx.store
        .store_edge(&Edge::new("a", "b", "cites").with_weight(0.9).with_meta("note", "revised"))
        .await
        .unwrap();

    let edges = fx.store.get_all_edges().await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].weight, Some(0.9));
    assert_eq!(
        edges[0].meta.as_ref().and_then(|m| m.get("note")),
        Some(&MetaValue::from("revised"))
    );

    // Same endpoints, different role: a distinct edge.
    fx.store.store_edge(&Edge::new("a", "b", "extends")).await.unwrap();
    assert_eq!(fx.store.get_all_edges().await.unwrap().len(), 2);

    assert!(fx.store.delete_edge("a", "b", "cites").await.unwrap());
    assert!(!fx.store.delete_edge("a", "b", "cites").await.unwrap());
    let edges = fx.store.get_all_edges().await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].role, "extends");
    assert_eq!(edges[0].weight, None);

    let err = fx.store.store_edge(&Edge::new("a", "", "cites")).await.unwrap_err();
    assert!(err.is_validation());
}

pub async fn ice_edges_by_endpoint(fx: &IceFixture) {
    let edges = [
        Edge::new("a", "b", "cites"),
        Edge::new("a", "c", "cites"),
        Edge::new("c", "b", "cites"),
    ];
    for edge in &edges {
        fx.store.store_edge(edge).await.unwrap();
    }

    let from_a = fx.store.get_edges_from("a").await.unwrap();
    assert_eq!(from_a, vec![edges[0].clone(), edges[1].clone()]);

    let to_b = fx.store.get_edges_to("b").await.unwrap();
    assert_eq!(to_b, vec![edges[0].clone(), edges[2].clone()]);

    assert!(fx.store.get_edges_from("b").await.unwrap().is_empty());
}

pub async fn ice_delete_cascades_edges(fx: &IceFixture) {
    for id in ["a", "b", "c"] {
        fx.store.store_node(&Node::ice(id, "concept")).await.unwrap();
    }
    fx.store.store_edge(&Edge::new("a", "b", "relates")).await.unwrap();
    fx.store.store_edge(&Edge::new("b", "c", "relates")).await.unwrap();
    fx.store.store_edge(&Edge::new("a", "c", "relates")).await.unwrap();

    assert!(fx.store.delete_node("b").await.unwrap());
    assert_eq!(fx.store.get_node("b").await.unwrap(), None);

    let remaining = fx.store.get_all_edges().await.unwrap();
    assert_eq!(remaining, vec![Edge::new("a", "c", "relates")]);
    assert!(fx.store.get_edges_to("b").await.unwrap().is_empty());
    assert!(fx.store.get_edges_from("b").await.unwrap().is_empty());
}

pub async fn ice_delete_missing_is_false(fx: &IceFixture) {
    assert!(!fx.store.delete_node("ghost").await.unwrap());
    assert!(!fx.store.delete_edge("x", "y", "z").await.unwrap());
}

pub async fn ice_batch_upserts_last_wins(fx: &IceFixture) {
    assert_eq!(fx.store.batch_store_nodes(&[]).await.unwrap(), 0);

    fx.store.store_node(&paper("existing", "old")).await.unwrap();
    let batch = vec![
        paper("a", "draft"),
        paper("b", "only"),
        paper("a", "final"),
        paper("existing", "new"),
    ];
    assert_eq!(fx.store.batch_store_nodes(&batch).await.unwrap(), batch.len());

    let a = fx.store.get_node("a").await.unwrap().unwrap();
    assert_eq!(a.title.as_deref(), Some("final"));
    let existing = fx.store.get_node("existing").await.unwrap().unwrap();
    assert_eq!(existing.title.as_deref(), Some("new"));
    assert_eq!(fx.store.get_all_nodes().await.unwrap().len(), 3);
}

pub async fn ice_batch_rejects_mixed_tiers(fx: &IceFixture) {
    let batch = vec![
        Node::ice("a", "t"),
        Node::water("b", "t"),
        Node::ice("c", "t"),
    ];
    let err = fx.store.batch_store_nodes(&batch).await.unwrap_err();
    assert!(err.is_validation());
    assert!(fx.store.get_all_nodes().await.unwrap().is_empty());
}

pub async fn ice_batch_edges(fx: &IceFixture) {
    let batch = vec![
        Edge::new("a", "b", "cites").with_weight(0.1),
        Edge::new("b", "c", "cites"),
        Edge::new("a", "b", "cites").with_weight(0.7),
    ];
    assert_eq!(fx.store.batch_store_edges(&batch).await.unwrap(), 3);

    let from_a = fx.store.get_edges_from("a").await.unwrap();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].weight, Some(0.7));
    assert_eq!(fx.store.get_all_edges().await.unwrap().len(), 2);

    let bad = vec![Edge::new("x", "y", "ok"), Edge::new("x", "y", "")];
    assert!(fx.store.batch_store_edges(&bad).await.unwrap_err().is_validation());
    assert!(fx.store.get_edges_from("x").await.unwrap().is_empty());
}

pub async fn ice_search_scenario(fx: &IceFixture) {
    fx.store.store_node(&paper("q", "Quantum Resonance")).await.unwrap();
    fx.store.store_node(&paper("f", "Fractal Consciousness")).await.unwrap();

    let hits = fx.store.search_nodes("reso", 10).await.unwrap();
    assert_eq!(ids(&hits), vec!["q"]);

    let hits = fx.store.search_nodes("RESO", 10).await.unwrap();
    assert_eq!(ids(&hits), vec!["q"]);

    assert!(fx.store.search_nodes("entropy", 10).await.unwrap().is_empty());
}

pub async fn ice_search_covers_content_and_meta(fx: &IceFixture) {
    fx.store
        .store_node(&Node::ice("d", "paper").with_description("Notes on Wavelets"))
        .await
        .unwrap();
    fx.store
        .store_node(
            &Node::ice("c", "paper").with_content(Content::inline("text/plain", "spectral density")),
        )
        .await
        .unwrap();
    fx.store
        .store_node(&Node::ice("m", "paper").with_meta("field", "Biophysics"))
        .await
        .unwrap();

    assert_eq!(ids(&fx.store.search_nodes("wavelet", 10).await.unwrap()), vec!["d"]);
    assert_eq!(ids(&fx.store.search_nodes("SPECTRAL", 10).await.unwrap()), vec!["c"]);
    assert_eq!(ids(&fx.store.search_nodes("bioph", 10).await.unwrap()), vec!["m"]);
    assert!(fx.store.search_nodes("%", 10).await.unwrap().is_empty());
}

pub async fn ice_search_limit(fx: &IceFixture) {
    for i in 0..5 {
        fx.store
            .store_node(&paper(&format!("p{i}"), "Resonance study"))
            .await
            .unwrap();
        advance_ms(&fx.clock, 1);
    }
    assert_eq!(
        ids(&fx.store.search_nodes("resonance", 2).await.unwrap()),
        vec!["p0", "p1"]
    );
    assert!(fx.store.search_nodes("resonance", 0).await.unwrap().is_empty());
}

pub async fn ice_search_folds_non_ascii(fx: &IceFixture) {
    fx.store.store_node(&paper("de", "Ärger Über Resonanz")).await.unwrap();
    advance_ms(&fx.clock, 1);
    fx.store.store_node(&paper("el", "ΣΥΝΤΟΝΙΣΜΟΣ")).await.unwrap();

    assert_eq!(ids(&fx.store.search_nodes("über", 10).await.unwrap()), vec!["de"]);
    assert_eq!(ids(&fx.store.search_nodes("ÄRGER", 10).await.unwrap()), vec!["de"]);
    assert_eq!(ids(&fx.store.search_nodes("συντον", 10).await.unwrap()), vec!["el"]);
}

pub async fn ice_search_spans_json_punctuation(fx: &IceFixture) {
    fx.store
        .store_node(&Node::ice("m", "paper").with_meta("field", "Biophysics"))
        .await
        .unwrap();

    let hits = fx.store.search_nodes(r#""field":"bio"#, 10).await.unwrap();
    assert_eq!(ids(&hits), vec!["m"]);
}

pub async fn ice_unbounded_limit(fx: &IceFixture) {
    for i in 0..3 {
        fx.store
            .store_node(&paper(&format!("p{i}"), "Resonance study").with_meta("lang", "en"))
            .await
            .unwrap();
        advance_ms(&fx.clock, 1);
    }

    let hits = fx.store.search_nodes("resonance", usize::MAX).await.unwrap();
    assert_eq!(ids(&hits), vec!["p0", "p1", "p2"]);
    let hits = fx
        .store
        .get_nodes_by_meta("lang", &"en".into(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
}

pub async fn ice_meta_lookup(fx: &IceFixture) {
    fx.store
        .store_node(&Node::ice("en", "paper").with_meta("lang", "en").with_meta("rank", 1i64))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1);
    fx.store
        .store_node(&Node::ice("fr", "paper").with_meta("lang", "fr").with_meta("rank", "1"))
        .await
        .unwrap();
    advance_ms(&fx.clock, 1);
    fx.store
        .store_node(&Node::ice("en2", "paper").with_meta("lang", "en"))
        .await
        .unwrap();
    fx.store.store_node(&Node::ice("bare", "paper")).await.unwrap();

    let english = fx.store.get_nodes_by_meta("lang", &"en".into(), 10).await.unwrap();
    assert_eq!(ids(&english), vec!["en", "en2"]);

    let limited = fx.store.get_nodes_by_meta("lang", &"en".into(), 1).await.unwrap();
    assert_eq!(ids(&limited), vec!["en"]);

    let numeric = fx.store.get_nodes_by_meta("rank", &MetaValue::Int(1), 10).await.unwrap();
    assert_eq!(ids(&numeric), vec!["en"]);

    let textual = fx.store.get_nodes_by_meta("rank", &"1".into(), 10).await.unwrap();
    assert_eq!(ids(&textual), vec!["fr"]);

    assert!(fx
        .store
        .get_nodes_by_meta("missing", &"en".into(), 10)
        .await
        .unwrap()
        .is_empty());
}

pub async fn ice_stats(fx: &IceFixture) {
    let empty = fx.store.get_stats().await.unwrap();
    assert_eq!(empty.backend, fx.store.backend());
    assert_eq!((empty.node_count, empty.edge_count), (0, 0));
    assert_eq!(empty.last_updated, None);

    fx.store.store_node(&Node::ice("a", "t")).await.unwrap();
    fx.store.store_node(&Node::ice("b", "t")).await.unwrap();
    advance_ms(&fx.clock, 250);
    fx.store.store_edge(&Edge::new("a", "b", "r")).await.unwrap();

    let stats = fx.store.get_stats().await.unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.edge_count, 1);
    assert_eq!(stats.last_updated, Some(tiered_graph_store::Clock::now(&fx.clock)));
}

pub async fn ice_is_available(fx: &IceFixture) {
    assert!(fx.store.is_available().await);
}

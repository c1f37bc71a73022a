//! Round-trip and idempotence laws driven through the protocol surface.

use engram_e2e_tests::harness::{TestEnv, call_tool, read_resource};
use serde_json::json;

#[tokio::test]
async fn raw_dialogue_reads_back_verbatim() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    let stored = call_tool(
        &mut server,
        "store_raw_dialogue",
        json!({
            "session_id": "abc",
            "speaker": "user",
            "content": "exact words, punctuation & all",
            "metadata": {"turn": 1}
        }),
    )
    .await;

    let body = read_resource(&mut server, "memory://l0-raw?session_id=abc").await;
    assert_eq!(body["total"], 1);
    let item = &body["items"][0];
    assert_eq!(item["id"], stored["id"]);
    assert_eq!(item["content"], "exact words, punctuation & all");
    assert_eq!(item["speaker"], "user");
    assert_eq!(item["metadata"]["turn"], 1);
}

#[tokio::test]
async fn compressed_content_is_top_hit_for_itself() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    for (content, sources) in [
        ("Reciprocal rank fusion dampens outlier rankings", vec![1]),
        ("The build cache lives under target slash debug", vec![2]),
        ("Connection pools hand out probed connections", vec![3]),
    ] {
        call_tool(
            &mut server,
            "compress_to_l2_insight",
            json!({"content": content, "source_ids": sources}),
        )
        .await;
    }

    let result = call_tool(
        &mut server,
        "hybrid_search",
        json!({"query_text": "Reciprocal rank fusion dampens outlier rankings", "top_k": 3}),
    )
    .await;
    let top = &result["results"][0];
    assert_eq!(top["content"], "Reciprocal rank fusion dampens outlier rankings");
    // Exact text: the semantic branch sees an identical vector.
    assert!(top["semantic_score"].as_f64().unwrap() > 0.999);
}

#[tokio::test]
async fn episode_retrievable_at_high_similarity() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    let stored = call_tool(
        &mut server,
        "store_episode",
        json!({
            "query": "what broke the nightly sync",
            "reward": -0.4,
            "reflection": "check the cron host clock first"
        }),
    )
    .await;

    let body = read_resource(
        &mut server,
        "memory://episode-memory?query=what+broke+the+nightly+sync&min_similarity=0.95",
    )
    .await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], stored["id"]);
    assert_eq!(body["items"][0]["reflection"], "check the cron host clock first");
}

#[tokio::test]
async fn node_and_edge_upserts_are_idempotent() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    let n1 = call_tool(
        &mut server,
        "graph_add_node",
        json!({"label": "Tech", "name": "Tokio", "properties": {"async": true}}),
    )
    .await;
    let n2 = call_tool(
        &mut server,
        "graph_add_node",
        json!({"label": "Tech", "name": "Tokio", "properties": {"version": "1.x"}}),
    )
    .await;
    assert_eq!(n1["id"], n2["id"]);
    assert_eq!(n2["properties"]["async"], true);
    assert_eq!(n2["properties"]["version"], "1.x");

    let e1 = call_tool(
        &mut server,
        "graph_add_edge",
        json!({"source_name": "A", "target_name": "B", "relation": "R", "weight": 0.4}),
    )
    .await;
    let e2 = call_tool(
        &mut server,
        "graph_add_edge",
        json!({"source_name": "A", "target_name": "B", "relation": "R", "weight": 0.9}),
    )
    .await;
    assert_eq!(e1["id"], e2["id"]);
    assert_eq!(e2["weight"], 0.9);
}

#[tokio::test]
async fn multi_query_embeds_once_and_caches() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    call_tool(
        &mut server,
        "compress_to_l2_insight",
        json!({"content": "retries use exponential backoff with jitter", "source_ids": [1]}),
    )
    .await;
    let batches_before = env.embedder.batch_calls();

    let variants = json!({
        "query_variants": [
            "how do retries back off",
            "retry delay schedule",
            "exponential backoff jitter"
        ]
    });
    call_tool(&mut server, "multi_query_search", variants.clone()).await;
    // All three variants went out in one batch round-trip.
    assert_eq!(env.embedder.batch_calls(), batches_before + 1);

    call_tool(&mut server, "multi_query_search", variants).await;
    // Second identical call is served from the query-embedding cache.
    assert_eq!(env.embedder.batch_calls(), batches_before + 1);
}

#[tokio::test]
async fn fusion_is_stable_under_variant_permutation() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    for (content, sources) in [
        ("pool acquisition probes liveness before handing out", vec![1]),
        ("probes run a trivial round trip", vec![2]),
        ("liveness failures discard the connection", vec![3]),
    ] {
        call_tool(
            &mut server,
            "compress_to_l2_insight",
            json!({"content": content, "source_ids": sources}),
        )
        .await;
    }

    let forward = call_tool(
        &mut server,
        "multi_query_search",
        json!({"query_variants": ["liveness probe", "connection probing", "pool acquisition"]}),
    )
    .await;
    let backward = call_tool(
        &mut server,
        "multi_query_search",
        json!({"query_variants": ["pool acquisition", "connection probing", "liveness probe"]}),
    )
    .await;

    let ids = |v: &serde_json::Value| -> Vec<i64> {
        v["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    };
    assert_eq!(ids(&forward), ids(&backward));
}

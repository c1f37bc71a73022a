//! End-to-end scenarios
//!
//! Each test drives the MCP server the way a host client would: tool calls
//! in, JSON payloads out, with scripted external APIs underneath.

use engram_e2e_tests::harness::{TestEnv, call_tool, read_resource, try_call_tool};
use engram_e2e_tests::mocks::JudgeScript;
use serde_json::json;

#[tokio::test]
async fn scenario_compress_then_search() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    for (speaker, content) in [
        ("user", "Do you think agents can develop autonomy?"),
        ("assistant", "Autonomy tends to emerge from recursive self-observation."),
        ("user", "So autonomy is emergent rather than designed?"),
    ] {
        call_tool(
            &mut server,
            "store_raw_dialogue",
            json!({"session_id": "phil-1", "speaker": speaker, "content": content}),
        )
        .await;
    }

    let compressed = call_tool(
        &mut server,
        "compress_to_l2_insight",
        json!({
            "content": "Autonomy is an emergent property of recursive self-observation",
            "source_ids": [1, 2, 3]
        }),
    )
    .await;
    let insight_id = compressed["id"].as_i64().unwrap();

    // A decoy so ranking is non-trivial.
    call_tool(
        &mut server,
        "compress_to_l2_insight",
        json!({"content": "The cafeteria closes at six on weekdays", "source_ids": [3]}),
    )
    .await;

    let result = call_tool(
        &mut server,
        "hybrid_search",
        json!({
            "query_text": "What is autonomy?",
            "top_k": 3,
            "weights": {"semantic": 0.7, "keyword": 0.3}
        }),
    )
    .await;

    let results = result["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    assert_eq!(results[0]["id"].as_i64().unwrap(), insight_id);
    assert!(results[0]["semantic_score"].is_number());
    assert!(results[0]["keyword_score"].is_number());
    assert!(result["counts"]["final_results"].as_u64().unwrap() <= 3);
}

#[tokio::test]
async fn scenario_lru_eviction_spares_new_critical_item() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    let mut first_id = None;
    for i in 0..10 {
        let added = call_tool(
            &mut server,
            "update_working_memory",
            json!({"content": format!("note {i}"), "importance": 0.2 + 0.03 * i as f64}),
        )
        .await;
        first_id.get_or_insert(added["added_id"].as_i64().unwrap());
    }

    let result = call_tool(
        &mut server,
        "update_working_memory",
        json!({"content": "X", "importance": 0.9}),
    )
    .await;

    assert!(result["added_id"].as_i64().is_some());
    // The oldest non-critical item goes; nothing is archived.
    assert_eq!(result["evicted_id"].as_i64(), first_id);
    assert!(result.get("archived_id").is_none());
    assert_eq!(env.store().working_count().unwrap(), 10);
}

#[tokio::test]
async fn scenario_all_critical_eviction_archives() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    for i in 0..10 {
        call_tool(
            &mut server,
            "update_working_memory",
            json!({"content": format!("critical {i}"), "importance": 0.95}),
        )
        .await;
    }
    let result = call_tool(
        &mut server,
        "update_working_memory",
        json!({"content": "newcomer", "importance": 0.5}),
    )
    .await;

    assert!(result["evicted_id"].as_i64().is_some());
    assert!(result["archived_id"].as_i64().is_some());

    let stale = read_resource(&mut server, "memory://stale-memory?reason=LRU_EVICTION").await;
    assert_eq!(stale["total"], 1);
    assert_eq!(stale["items"][0]["content"], "critical 0");
}

#[tokio::test]
async fn scenario_low_reward_stores_and_resurfaces_episode() {
    let env = TestEnv::new();
    env.judge.set_script(JudgeScript::Reward(-0.6));
    let mut server = env.initialized_server().await;

    let report = call_tool(
        &mut server,
        "evaluate_response",
        json!({
            "query": "How do I rotate the signing keys?",
            "context_docs": ["The cafeteria closes at six."],
            "answer": "You probably restart the server."
        }),
    )
    .await;

    assert_eq!(report["reward"], -0.6);
    assert_eq!(report["reflectionTriggered"], true);
    let episode_id = report["episodeId"].as_i64().unwrap();

    let episodes = read_resource(
        &mut server,
        "memory://episode-memory?query=How+do+I+rotate+the+signing+keys%3F&min_similarity=0.9",
    )
    .await;
    assert_eq!(episodes["total"], 1);
    assert_eq!(episodes["items"][0]["id"].as_i64().unwrap(), episode_id);
    assert_eq!(episodes["items"][0]["reward"], -0.6);
}

#[tokio::test]
async fn scenario_fallback_activation_and_recovery() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    // Judge is down: the first evaluation activates fallback and degrades.
    env.judge.set_script(JudgeScript::Unavailable);
    let report = call_tool(
        &mut server,
        "evaluate_response",
        json!({"query": "anything", "answer": "whatever", "context_docs": []}),
    )
    .await;
    assert_eq!(report["degraded"], true);
    assert!(report["warning"].is_string());

    let rows = env.store().fallback_rows(Some("haiku_evaluation")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "active");

    // While active, the external judge is bypassed entirely.
    let calls_before = env.judge.evaluate_calls();
    let report = call_tool(
        &mut server,
        "evaluate_response",
        json!({"query": "again", "answer": "still degraded", "context_docs": []}),
    )
    .await;
    assert_eq!(report["degraded"], true);
    assert_eq!(env.judge.evaluate_calls(), calls_before);

    // Judge comes back; one health tick recovers the service.
    env.judge.set_script(JudgeScript::Reward(0.9));
    env.services.fallback.health_tick(env.judge.as_ref()).await;
    assert_eq!(env.judge.ping_calls(), 1);

    let rows = env.store().fallback_rows(Some("haiku_evaluation")).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].status, "recovered");

    // The next evaluation reaches the external judge again.
    let report = call_tool(
        &mut server,
        "evaluate_response",
        json!({"query": "after recovery", "answer": "fine", "context_docs": []}),
    )
    .await;
    assert_eq!(report["degraded"], false);
    assert_eq!(report["reward"], 0.9);
    assert_eq!(env.judge.evaluate_calls(), calls_before + 1);

    // Recovered and idle: further ticks do not ping.
    env.services.fallback.health_tick(env.judge.as_ref()).await;
    assert_eq!(env.judge.ping_calls(), 1);
}

#[tokio::test]
async fn scenario_irr_contingency() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    // Seed labels whose per-query kappa sits near 0.62, below the 0.70 gate.
    // judge1 runs consistently higher on the third document.
    for i in 0..10 {
        env.store()
            .insert_ground_truth(&engram_core::NewGroundTruth {
                query: format!("labeled query {i}"),
                query_type: "factual".to_string(),
                expected_doc_ids: vec![],
                judge1_scores: vec![0.9, 0.1, 0.9, 0.9, 0.1],
                judge2_scores: vec![0.9, 0.1, 0.1, 0.9, 0.1],
                kappa: None,
                prompt_version: "dual-v1".to_string(),
            })
            .unwrap();
    }

    let result = call_tool(&mut server, "validate_judge_agreement", json!({})).await;
    assert_eq!(result["status"], "contingency_triggered");
    let macro_kappa = result["macro_kappa"].as_f64().unwrap();
    assert!(macro_kappa < 0.70 && macro_kappa > 0.5);

    let contingency = &result["contingency"];
    let triage = contingency["highDisagreementQueries"].as_array().unwrap();
    assert_eq!(triage.len(), 10);
    assert!(triage[0]["meanAbsDiff"].as_f64().unwrap() > 0.0);
    // Bias test ran over the pooled raw scores and is significant.
    assert!(contingency["biasTest"]["pValue"].as_f64().unwrap() < 0.05);

    // The run is persisted.
    let record = env.store().latest_validation().unwrap().unwrap();
    assert_eq!(
        record.status,
        engram_core::ValidationStatus::ContingencyTriggered
    );
}

#[tokio::test]
async fn scenario_graph_traversal() {
    let env = TestEnv::new();
    let mut server = env.initialized_server().await;

    call_tool(
        &mut server,
        "graph_add_node",
        json!({"label": "Project", "name": "P"}),
    )
    .await;
    call_tool(
        &mut server,
        "graph_add_edge",
        json!({"source_name": "P", "target_name": "T1", "relation": "USES", "weight": 1.0}),
    )
    .await;
    call_tool(
        &mut server,
        "graph_add_edge",
        json!({"source_name": "T1", "target_name": "T2", "relation": "RELATED_TO", "weight": 0.7}),
    )
    .await;

    let neighbors = call_tool(
        &mut server,
        "graph_query_neighbors",
        json!({"node_name": "P", "depth": 2}),
    )
    .await;
    assert_eq!(neighbors["count"], 2);
    let items = neighbors["neighbors"].as_array().unwrap();
    let t1 = items.iter().find(|n| n["name"] == "T1").unwrap();
    let t2 = items.iter().find(|n| n["name"] == "T2").unwrap();
    assert_eq!(t1["distance"], 1);
    assert_eq!(t1["relation"], "USES");
    assert_eq!(t2["distance"], 2);
    assert_eq!(t2["relation"], "RELATED_TO");

    let path = call_tool(
        &mut server,
        "graph_find_path",
        json!({"start_name": "P", "end_name": "T2", "max_depth": 5}),
    )
    .await;
    assert_eq!(path["pathFound"], true);
    assert_eq!(path["pathLength"], 2);

    // Depth 6 exceeds the neighbor bound.
    let response = try_call_tool(
        &mut server,
        "graph_query_neighbors",
        json!({"node_name": "P", "depth": 6}),
    )
    .await;
    let error = response.error.unwrap();
    assert_eq!(error.data.unwrap()["error"], "ValidationError");
}

#[tokio::test]
async fn scenario_budget_alert_dedup() {
    let env = TestEnv::with_config({
        let mut cfg = engram_core::EngramConfig::default();
        cfg.budget.monthly_limit_eur = 0.001;
        cfg
    });

    env.store().log_cost("judge", 1000, 5.0).unwrap();
    let now = chrono::Utc::now();
    assert_eq!(env.services.budget.send_alerts(now).unwrap(), Some("exceeded"));
    assert_eq!(env.services.budget.send_alerts(now).unwrap(), None);
    assert_eq!(env.store().budget_alert_rows().unwrap().len(), 1);
}

#![cfg(feature = "cli")]

use std::sync::Arc;

use hybrid_memory::adapters::{Adapter, AdapterKind, InMemoryAdapter};
use hybrid_memory::config::Config;
use hybrid_memory::memory_db::RelationshipStore;
use hybrid_memory::memos::{InsightEngine, InsightEngineConfig, MemoryOrchestrator, OrchestratorConfig};
use hybrid_memory::server::build_router;
use hybrid_memory::shared_state::AppState;
use serde_json::{json, Value};

async fn spawn_app() -> String {
    let store = Arc::new(RelationshipStore::new_in_memory().unwrap());
    let adapters: Vec<Arc<dyn Adapter>> = vec![Arc::new(InMemoryAdapter::new("local", AdapterKind::Vector))];
    let orchestrator = Arc::new(MemoryOrchestrator::new(
        Arc::clone(&store),
        adapters,
        None,
        OrchestratorConfig::default(),
    ));
    let insights = Arc::new(InsightEngine::new(store, InsightEngineConfig::default()));
    let config = Config::from_lookup(|_| None).unwrap();
    let state = AppState::from_parts(orchestrator, insights, config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_round_trip() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let health: Value = client.get(format!("{}/healthz", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    for (id, content) in [
        ("standup", "Moved standup to 10am"),
        ("outage", "Standup ran long because of the outage"),
        ("hub_a", "Morning run"),
        ("hub_b", "Skipped breakfast"),
    ] {
        let response = client
            .post(format!("{}/memories", base))
            .json(&json!({ "id": id, "content": content, "type": "observation", "domain": "work" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    for (from, to) in [("standup", "hub_a"), ("hub_a", "outage"), ("standup", "hub_b"), ("hub_b", "outage")] {
        let response = client
            .post(format!("{}/relationships", base))
            .json(&json!({ "from_id": from, "to_id": to, "relationship": "RELATED_TO", "strength": 1.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    let bad = client
        .post(format!("{}/relationships", base))
        .json(&json!({ "from_id": "standup", "to_id": "outage", "relationship": "CAUSED", "strength": 1.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["code"], 400);

    let related: Value = client
        .get(format!("{}/memories/standup/related?direction=outgoing", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(related["related"].as_array().unwrap().len(), 2);

    let paths: Value = client
        .get(format!("{}/paths?from=standup&to=outage", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paths["paths"].as_array().unwrap().len(), 2);

    let recall: Value = client
        .post(format!("{}/recall", base))
        .json(&json!({ "query": "standup", "limit": 5 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(recall["degraded"], false);
    assert!(!recall["memories"].as_array().unwrap().is_empty());

    let run: Value = client
        .post(format!("{}/insights/run", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["created"], 2);

    let pending: Value = client
        .get(format!("{}/insights/pending", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["count"], 2);
    let id = pending["insights"][0]["id"].as_i64().unwrap();

    let shown: Value = client
        .post(format!("{}/insights/{}/shown", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shown["surfaced"], true);

    let missing = client
        .post(format!("{}/insights/999999/shown", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let status: Value = client.get(format!("{}/status", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(status["stats"]["total_relationships"], 4);
    assert_eq!(status["adapters"][0]["health"], "available");
}

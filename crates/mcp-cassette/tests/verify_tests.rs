//! Integration tests: the verifier drives a live server with recorded
//! requests and reports structural diffs.
//!
//! The "live server" here is a replay server loaded with a second cassette,
//! which makes divergence easy to stage.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Value, json};

use mcp_cassette::cassette::{Cassette, Interaction, load_cassette, save_cassette};
use mcp_cassette::matcher::create_matcher;
use mcp_cassette::replay::{create_replay_app, share_matcher};
use mcp_cassette::serve::{ServerHandle, spawn_server};
use mcp_cassette::verify::{apply_updates, run_verify};

fn request_interaction(id: u64, method: &str, params: Option<Value>, result: Value) -> Interaction {
    let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(params) = params {
        request["params"] = params;
    }
    Interaction::JsonRpcRequest {
        request,
        response: Some(json!({"jsonrpc": "2.0", "id": id, "result": result})),
        response_is_sse: false,
        response_status: 200,
        latency_ms: 0,
    }
}

fn session_cassette(echo_text: &str) -> Cassette {
    let mut cassette = Cassette::new("http://upstream");
    cassette.add_interaction(request_interaction(
        0,
        "initialize",
        Some(json!({"protocolVersion": "2025-11-25"})),
        json!({
            "protocolVersion": "2025-11-25",
            "serverInfo": {"name": "Test Calculator", "version": "1.0.0"}
        }),
    ));
    cassette.add_interaction(Interaction::Notification {
        request: Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
        response_status: 202,
        latency_ms: 0,
    });
    cassette.add_interaction(request_interaction(
        1,
        "tools/call",
        Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
        json!({"content": [{"type": "text", "text": echo_text}]}),
    ));
    cassette.add_interaction(Interaction::Lifecycle {
        http_method: "DELETE".to_string(),
        http_path: "/mcp".to_string(),
        response_is_sse: false,
        response_status: 200,
        latency_ms: 0,
    });
    cassette
}

async fn start_live_server(cassette: &Cassette) -> (ServerHandle, String) {
    let matcher =
        share_matcher(create_matcher("method_params", &cassette.interactions).expect("matcher"));
    let app = create_replay_app(cassette, matcher);
    let server = spawn_server(app, 0, Duration::from_secs(10)).await.expect("spawn");
    let url = server.url();
    (server, url)
}

fn no_ignores() -> (HashSet<String>, HashSet<String>) {
    (HashSet::new(), HashSet::new())
}

#[tokio::test]
async fn identical_server_passes_all_interactions() {
    let golden = session_cassette("hi");
    let (server, url) = start_live_server(&golden).await;

    let (fields, paths) = no_ignores();
    let result = run_verify(&golden, &url, &fields, &paths).await.expect("verify");

    assert_eq!(result.total, 4);
    assert_eq!(result.passed, 4);
    assert_eq!(result.failed, 0);
    assert!(result.results.iter().all(|r| r.passed));

    // Labels mirror the interaction kinds.
    assert_eq!(result.results[0].method, "initialize");
    assert_eq!(result.results[1].method, "notifications/initialized");
    assert_eq!(result.results[2].method, "tools/call [echo]");
    assert_eq!(result.results[3].method, "DELETE /mcp");

    server.shutdown().await;
}

#[tokio::test]
async fn changed_response_is_reported_with_diff() {
    let golden = session_cassette("hi");
    let live = session_cassette("changed");
    let (server, url) = start_live_server(&live).await;

    let (fields, paths) = no_ignores();
    let result = run_verify(&golden, &url, &fields, &paths).await.expect("verify");

    assert_eq!(result.failed, 1);
    let failed = result.results.iter().find(|r| !r.passed).expect("failing result");
    assert_eq!(failed.method, "tools/call [echo]");
    assert!(
        failed
            .diff
            .iter()
            .any(|line| line.contains("$.result.content[0].text") && line.contains("\"hi\"")),
        "diff names the changed path: {:?}",
        failed.diff
    );

    server.shutdown().await;
}

#[tokio::test]
async fn id_differences_never_fail_verification() {
    let golden = session_cassette("hi");
    // The replay server rewrites ids to the incoming request's id, so the
    // live responses carry the golden ids here; craft a cassette whose
    // recorded ids differ from what the live server will echo back.
    let mut reindexed = session_cassette("hi");
    if let Some(interaction) = reindexed.interactions.first_mut() {
        if let Interaction::JsonRpcRequest { response, .. } = interaction {
            *response =
                Some(json!({"jsonrpc": "2.0", "id": 777, "result": {
                    "protocolVersion": "2025-11-25",
                    "serverInfo": {"name": "Test Calculator", "version": "1.0.0"}
                }}));
        }
    }
    let (server, url) = start_live_server(&golden).await;

    let (fields, paths) = no_ignores();
    let result = run_verify(&reindexed, &url, &fields, &paths).await.expect("verify");
    assert_eq!(result.failed, 0, "id is a volatile key");

    server.shutdown().await;
}

#[tokio::test]
async fn ignore_fields_suppress_expected_differences() {
    let golden = session_cassette("hi");
    let mut live = session_cassette("hi");
    // The live server adds a volatile timestamp next to the content.
    if let Some(Interaction::JsonRpcRequest { response, .. }) = live.interactions.get_mut(2) {
        *response = Some(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "content": [{"type": "text", "text": "hi"}],
                "timestamp": "2026-08-01T00:00:00Z"
            }
        }));
    }
    let (server, url) = start_live_server(&live).await;

    let (fields, paths) = no_ignores();
    let strict = run_verify(&golden, &url, &fields, &paths).await.expect("verify");
    assert_eq!(strict.failed, 1, "unexpected key fails by default");
    server.shutdown().await;

    let (server, url) = start_live_server(&live).await;
    let ignore_fields: HashSet<String> = ["timestamp".to_string()].into_iter().collect();
    let relaxed = run_verify(&golden, &url, &ignore_fields, &paths).await.expect("verify");
    assert_eq!(relaxed.failed, 0, "ignored fields are stripped everywhere");
    server.shutdown().await;
}

#[tokio::test]
async fn update_flow_rewrites_failed_responses_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("golden.json");

    let golden = session_cassette("hi");
    save_cassette(&golden, &path).expect("save");

    let live = session_cassette("changed");
    let (server, url) = start_live_server(&live).await;

    let mut cassette = load_cassette(&path).expect("load");
    let (fields, paths) = no_ignores();
    let result = run_verify(&cassette, &url, &fields, &paths).await.expect("verify");
    assert_eq!(result.failed, 1);

    let updated = apply_updates(&mut cassette, &result);
    assert_eq!(updated, 1);
    save_cassette(&cassette, &path).expect("save updated");
    server.shutdown().await;

    // After the update, the cassette verifies clean against the same server.
    let (server, url) = start_live_server(&live).await;
    let reloaded = load_cassette(&path).expect("reload");
    let result = run_verify(&reloaded, &url, &fields, &paths).await.expect("verify");
    assert_eq!(result.failed, 0);
    server.shutdown().await;
}

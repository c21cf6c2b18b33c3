//! Verify engine: replay cassette requests against a live server and
//! compare responses.
//!
//! Responses are normalized before comparison: the built-in volatile keys
//! (`id`, `_meta`) and any user-supplied `ignore_fields` are stripped at
//! every depth, and `ignore_paths` dot-paths are stripped only at their
//! exact position. The structural diff unwraps strings that encode JSON
//! objects or arrays, so tools returning JSON-as-string still diff
//! field-by-field.

use std::collections::{BTreeSet, HashSet};

use reqwest::header;
use serde_json::Value;

use crate::cassette::{Cassette, Interaction};
use crate::client::http_client;
use crate::config::mcp;
use crate::error::ClientError;
use crate::sse::parse_sse_response;

/// Fields stripped before comparison because they change every session.
const VOLATILE_KEYS: &[&str] = &["id", "_meta"];

/// Outcome of verifying a single interaction.
#[derive(Debug, Clone)]
pub struct InteractionResult {
    /// 1-based position in the cassette.
    pub index: usize,
    /// Human-readable label: JSON-RPC method (with tool tag) or HTTP line.
    pub method: String,
    /// True when the live response matched.
    pub passed: bool,
    /// Recorded response, un-normalized.
    pub expected: Option<Value>,
    /// Live response, un-normalized.
    pub actual: Option<Value>,
    /// Human-readable diff lines (empty when passed).
    pub diff: Vec<String>,
}

/// Aggregate verification outcome.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    /// Number of interactions exercised.
    pub total: usize,
    /// Number that passed.
    pub passed: usize,
    /// Number that failed.
    pub failed: usize,
    /// Per-interaction outcomes, in cassette order.
    pub results: Vec<InteractionResult>,
}

/// Replay all interactions from a cassette against `target_url` and compare
/// responses. Transport failures abort; comparison failures are recorded
/// per interaction and aggregated.
pub async fn run_verify(
    cassette: &Cassette,
    target_url: &str,
    ignore_fields: &HashSet<String>,
    ignore_paths: &HashSet<String>,
) -> Result<VerifyResult, ClientError> {
    let base = target_url.trim_end_matches('/');
    let mcp_url =
        if base.ends_with("/mcp") { base.to_string() } else { format!("{base}/mcp") };

    let client = http_client()?;
    let mut session_id: Option<String> = None;
    let mut results = Vec::with_capacity(cassette.interactions.len());

    for (idx, interaction) in cassette.interactions.iter().enumerate() {
        let index = idx + 1;

        match interaction {
            Interaction::Lifecycle { http_method, http_path, .. } => {
                let (_, status) =
                    send_interaction(&client, &mcp_url, interaction, &mut session_id).await?;
                tracing::info!("[{index}] {http_method} {http_path} -> {status} (lifecycle)");
                results.push(InteractionResult {
                    index,
                    method: format!("{http_method} {http_path}"),
                    passed: true,
                    expected: None,
                    actual: None,
                    diff: Vec::new(),
                });
            }
            Interaction::Notification { response_status, .. } => {
                let method = interaction.jsonrpc_method().unwrap_or("notification").to_string();
                let (_, status) =
                    send_interaction(&client, &mcp_url, interaction, &mut session_id).await?;
                let passed = status == *response_status;
                let diff = if passed {
                    Vec::new()
                } else {
                    vec![format!("  status: expected {response_status}, got {status}")]
                };
                tracing::info!(
                    "[{index}] {method} -> {status} ({})",
                    if passed { "pass" } else { "FAIL" }
                );
                results.push(InteractionResult {
                    index,
                    method,
                    passed,
                    expected: None,
                    actual: None,
                    diff,
                });
            }
            Interaction::JsonRpcRequest { response, .. } => {
                let method = interaction.jsonrpc_method().unwrap_or("unknown").to_string();
                let tool_tag =
                    interaction.tool_name().map(|t| format!(" [{t}]")).unwrap_or_default();
                let (actual, _status) =
                    send_interaction(&client, &mcp_url, interaction, &mut session_id).await?;

                let expected_clean = normalize(response.as_ref(), ignore_fields, ignore_paths);
                let actual_clean = normalize(actual.as_ref(), ignore_fields, ignore_paths);
                let diff = deep_diff(&expected_clean, &actual_clean);
                let passed = diff.is_empty();

                tracing::info!(
                    "[{index}] {method}{tool_tag} -> {}",
                    if passed { "pass" } else { "FAIL" }
                );
                for line in &diff {
                    tracing::info!("{line}");
                }

                results.push(InteractionResult {
                    index,
                    method: format!("{method}{tool_tag}"),
                    passed,
                    expected: response.clone(),
                    actual,
                    diff,
                });
            }
        }
    }

    let passed = results.iter().filter(|r| r.passed).count();
    Ok(VerifyResult { total: results.len(), passed, failed: results.len() - passed, results })
}

/// Rewrite each failed `jsonrpc_request` interaction's response with the
/// live server's answer (the `--update` flow). Returns how many changed.
pub fn apply_updates(cassette: &mut Cassette, result: &VerifyResult) -> usize {
    let mut updated = 0;
    for outcome in &result.results {
        if outcome.passed {
            continue;
        }
        if let Some(interaction) = cassette.interactions.get_mut(outcome.index - 1) {
            if interaction.is_jsonrpc_request() {
                interaction.set_response(outcome.actual.clone());
                updated += 1;
            }
        }
    }
    updated
}

/// Send one recorded interaction and return `(parsed_body, status)`.
///
/// The session id is updated unconditionally from any response carrying the
/// header, then propagated to subsequent requests.
async fn send_interaction(
    client: &reqwest::Client,
    url: &str,
    interaction: &Interaction,
    session_id: &mut Option<String>,
) -> Result<(Option<Value>, u16), ClientError> {
    let mut request = match interaction {
        Interaction::Lifecycle { http_method, .. } => {
            let method = reqwest::Method::from_bytes(http_method.as_bytes())
                .unwrap_or(reqwest::Method::DELETE);
            client.request(method, url)
        }
        _ => {
            let body = interaction
                .request()
                .map(|r| serde_json::to_vec(r))
                .transpose()?
                .unwrap_or_default();
            client.post(url).body(body)
        }
    };

    request = request
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, mcp::ACCEPT);
    if let Some(session) = session_id.as_deref() {
        request = request.header(mcp::SESSION_HEADER, session);
    }

    let response = request.send().await?;
    if let Some(session) =
        response.headers().get(mcp::SESSION_HEADER).and_then(|v| v.to_str().ok())
    {
        *session_id = Some(session.to_string());
    }

    let status = response.status().as_u16();
    if matches!(interaction, Interaction::Lifecycle { .. }) {
        return Ok((None, status));
    }

    let is_sse = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));
    let text = response.text().await?;

    let parsed = if is_sse {
        parse_sse_response(&text)
    } else {
        serde_json::from_str(&text).ok()
    };
    Ok((parsed, status))
}

fn normalize(
    value: Option<&Value>,
    ignore_fields: &HashSet<String>,
    ignore_paths: &HashSet<String>,
) -> Value {
    value.map_or(Value::Null, |v| strip_volatile(v, ignore_fields, ignore_paths))
}

/// Recursively strip volatile and user-ignored fields from a JSON structure.
///
/// `ignore_fields` are key names stripped at any depth (e.g. `timestamp`);
/// `ignore_paths` are exact dot-paths rooted at `$` with `[i]` array
/// indexing, stripped only at that location.
#[must_use]
pub fn strip_volatile(
    value: &Value,
    ignore_fields: &HashSet<String>,
    ignore_paths: &HashSet<String>,
) -> Value {
    strip_at(value, ignore_fields, ignore_paths, "$")
}

fn strip_at(
    value: &Value,
    ignore_fields: &HashSet<String>,
    ignore_paths: &HashSet<String>,
    current_path: &str,
) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, child) in map {
                if VOLATILE_KEYS.contains(&key.as_str()) || ignore_fields.contains(key) {
                    continue;
                }
                let child_path = format!("{current_path}.{key}");
                if ignore_paths.contains(&child_path) {
                    continue;
                }
                out.insert(
                    key.clone(),
                    strip_at(child, ignore_fields, ignore_paths, &child_path),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    strip_at(item, ignore_fields, ignore_paths, &format!("{current_path}[{i}]"))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Produce human-readable diff lines between two JSON-like structures.
#[must_use]
pub fn deep_diff(expected: &Value, actual: &Value) -> Vec<String> {
    let mut diffs = Vec::new();
    diff_at(expected, actual, "$", &mut diffs);
    diffs
}

fn diff_at(expected: &Value, actual: &Value, path: &str, diffs: &mut Vec<String>) {
    if type_name(expected) != type_name(actual) {
        diffs.push(format!("  {path}: type {} != type {}", type_name(expected), type_name(actual)));
        diffs.push(format!("    expected: {}", dump(expected)));
        diffs.push(format!("    actual:   {}", dump(actual)));
        return;
    }

    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            let all_keys: BTreeSet<&String> =
                expected_map.keys().chain(actual_map.keys()).collect();
            for key in all_keys {
                let child_path = format!("{path}.{key}");
                match (expected_map.get(key.as_str()), actual_map.get(key.as_str())) {
                    (Some(expected_child), Some(actual_child)) => {
                        diff_at(expected_child, actual_child, &child_path, diffs);
                    }
                    (Some(expected_child), None) => {
                        diffs.push(format!("  {child_path}: missing in actual"));
                        diffs.push(format!("    expected: {}", dump(expected_child)));
                    }
                    (None, Some(actual_child)) => {
                        diffs.push(format!("  {child_path}: unexpected key in actual"));
                        diffs.push(format!("    actual: {}", dump(actual_child)));
                    }
                    (None, None) => {}
                }
            }
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            if expected_items.len() != actual_items.len() {
                diffs.push(format!(
                    "  {path}: array length {} != {}",
                    expected_items.len(),
                    actual_items.len()
                ));
            }
            for (i, (expected_item, actual_item)) in
                expected_items.iter().zip(actual_items.iter()).enumerate()
            {
                diff_at(expected_item, actual_item, &format!("{path}[{i}]"), diffs);
            }
        }
        _ => {
            if expected != actual {
                // Strings that both encode a JSON object or array are
                // compared structurally. Handles tools returning
                // JSON-as-string in content[0].text. Scalar JSON (numbers,
                // booleans, quoted strings) stays a plain string compare.
                if let (Value::String(expected_str), Value::String(actual_str)) =
                    (expected, actual)
                {
                    if let (Ok(parsed_expected), Ok(parsed_actual)) = (
                        serde_json::from_str::<Value>(expected_str),
                        serde_json::from_str::<Value>(actual_str),
                    ) {
                        if is_container(&parsed_expected) && is_container(&parsed_actual) {
                            diff_at(&parsed_expected, &parsed_actual, path, diffs);
                            return;
                        }
                    }
                }
                diffs.push(format!("  {path}: {} != {}", dump(expected), dump(actual)));
            }
        }
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_f64() {
                "float"
            } else {
                "int"
            }
        }
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn dump(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

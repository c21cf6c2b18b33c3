//! Explicit secret redaction for cassettes.
//!
//! No auto-detection magic: every redaction is triggered by an explicit
//! flag. URL-path redaction touches metadata only; value redaction touches
//! metadata and response bodies. Request bodies are never modified, so
//! replay and verify still match — matches found there only produce a
//! warning.

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::cassette::{Cassette, Interaction};

/// Replacement text for redacted values.
pub const PLACEHOLDER: &str = "[REDACTED]";

/// JSON-RPC structural keys whose values are never rewritten.
const STRUCTURAL_KEYS: &[&str] = &["jsonrpc", "method", "id"];

/// What to redact, straight from the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct RedactOptions {
    /// Strip the URL path from `metadata.server_url`.
    pub server_url: bool,
    /// Env var names whose values are redacted from metadata + responses.
    pub env: Vec<String>,
    /// Regex patterns redacted from metadata + responses.
    pub patterns: Vec<String>,
}

impl RedactOptions {
    fn is_empty(&self) -> bool {
        !self.server_url && self.env.is_empty() && self.patterns.is_empty()
    }
}

/// Return a new cassette with the requested redactions applied.
#[must_use]
pub fn scrub_cassette(cassette: &Cassette, options: &RedactOptions) -> Cassette {
    if options.is_empty() {
        return cassette.clone();
    }

    let mut out = cassette.clone();

    if options.server_url {
        out.metadata.server_url = redact_url_path(&out.metadata.server_url);
    }

    let patterns = compile_patterns(&options.env, &options.patterns);
    if patterns.is_empty() {
        return out;
    }

    out.metadata.server_url = redact_string(&out.metadata.server_url, &patterns);

    let mut request_hits = 0usize;
    for interaction in &mut out.interactions {
        match interaction {
            Interaction::JsonRpcRequest { request, response, .. } => {
                if let Some(response) = response {
                    *response = redact_value(response, &patterns);
                }
                if request_contains_match(request, &patterns) {
                    request_hits += 1;
                }
            }
            Interaction::Notification { request, .. } => {
                if request.as_ref().is_some_and(|r| request_contains_match(r, &patterns)) {
                    request_hits += 1;
                }
            }
            Interaction::Lifecycle { .. } => {}
        }
    }

    if request_hits > 0 {
        tracing::warn!(
            request_hits,
            "redacted values found in request bodies; request bodies are NOT \
             redacted to preserve replay/verify — review the cassette manually"
        );
    }

    out
}

/// Replace the path component of a URL with the placeholder, keeping
/// scheme + host. Unparseable URLs pass through unchanged.
fn redact_url_path(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        tracing::warn!(url = %url, "server_url is not a valid URL; leaving unredacted");
        return url.to_string();
    };
    if parsed.path().is_empty() || parsed.path() == "/" {
        return url.to_string();
    }
    parsed.set_path(&format!("/{PLACEHOLDER}"));
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Build regex patterns from env var names and raw regex strings. Missing
/// or empty env vars and invalid regexes are skipped with a warning.
fn compile_patterns(env_vars: &[String], raw_patterns: &[String]) -> Vec<Regex> {
    let mut patterns = Vec::new();

    for name in env_vars {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => {
                if let Ok(pattern) = Regex::new(&regex::escape(&value)) {
                    patterns.push(pattern);
                }
            }
            Ok(_) => tracing::warn!(var = %name, "redact-env variable is empty, skipping"),
            Err(_) => {
                tracing::warn!(var = %name, "redact-env variable not found in environment, skipping");
            }
        }
    }

    for raw in raw_patterns {
        match Regex::new(raw) {
            Ok(pattern) => patterns.push(pattern),
            Err(err) => {
                tracing::warn!(pattern = %raw, error = %err, "invalid redact pattern, skipping");
            }
        }
    }

    patterns
}

fn redact_string(value: &str, patterns: &[Regex]) -> String {
    let mut out = value.to_string();
    for pattern in patterns {
        out = pattern.replace_all(&out, PLACEHOLDER).into_owned();
    }
    out
}

/// Recursively redact matching strings, skipping JSON-RPC structural keys.
fn redact_value(value: &Value, patterns: &[Regex]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    let child = if STRUCTURAL_KEYS.contains(&key.as_str()) {
                        child.clone()
                    } else {
                        redact_value(child, patterns)
                    };
                    (key.clone(), child)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| redact_value(item, patterns)).collect())
        }
        Value::String(s) => Value::String(redact_string(s, patterns)),
        other => other.clone(),
    }
}

fn request_contains_match(request: &Value, patterns: &[Regex]) -> bool {
    let rendered = request.to_string();
    patterns.iter().any(|pattern| pattern.is_match(&rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::Cassette;
    use serde_json::json;

    fn cassette_with_response(response: Value) -> Cassette {
        let mut cassette = Cassette::new("http://api.example.com/mcp/secret-tenant");
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                            "params": {"name": "fetch", "arguments": {"token": "sk-live-12345"}}}),
            response: Some(response),
            response_is_sse: false,
            response_status: 200,
            latency_ms: 0,
        });
        cassette
    }

    #[test]
    fn no_options_returns_identical_cassette() {
        let cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        let scrubbed = scrub_cassette(&cassette, &RedactOptions::default());
        assert_eq!(scrubbed, cassette);
    }

    #[test]
    fn server_url_path_is_stripped() {
        let cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        let options = RedactOptions { server_url: true, ..RedactOptions::default() };
        let scrubbed = scrub_cassette(&cassette, &options);
        assert_eq!(scrubbed.metadata.server_url, "http://api.example.com/[REDACTED]");
    }

    #[test]
    fn bare_host_url_is_left_alone() {
        let mut cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1}));
        cassette.metadata.server_url = "http://localhost:8000/".to_string();
        let options = RedactOptions { server_url: true, ..RedactOptions::default() };
        let scrubbed = scrub_cassette(&cassette, &options);
        assert_eq!(scrubbed.metadata.server_url, "http://localhost:8000/");
    }

    #[test]
    fn patterns_redact_responses_but_not_requests() {
        let cassette = cassette_with_response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "token sk-live-12345 leaked"}]}
        }));
        let options = RedactOptions {
            server_url: false,
            env: Vec::new(),
            patterns: vec!["sk-live-\\d+".to_string()],
        };
        let scrubbed = scrub_cassette(&cassette, &options);

        let response = scrubbed.interactions[0].response().unwrap();
        assert_eq!(
            response["result"]["content"][0]["text"],
            "token [REDACTED] leaked"
        );
        // Request bodies are untouched even though they contain a match.
        let request = scrubbed.interactions[0].request().unwrap();
        assert_eq!(request["params"]["arguments"]["token"], "sk-live-12345");
    }

    #[test]
    fn structural_keys_are_never_rewritten() {
        let cassette = cassette_with_response(json!({
            "jsonrpc": "2.0",
            "id": "secret",
            "method": "secret",
            "result": {"note": "secret"}
        }));
        let options = RedactOptions {
            server_url: false,
            env: Vec::new(),
            patterns: vec!["secret".to_string()],
        };
        let scrubbed = scrub_cassette(&cassette, &options);

        let response = scrubbed.interactions[0].response().unwrap();
        assert_eq!(response["id"], "secret");
        assert_eq!(response["method"], "secret");
        assert_eq!(response["result"]["note"], "[REDACTED]");
    }

    #[test]
    fn invalid_regex_is_skipped() {
        let cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1, "result": {"v": "x"}}));
        let options = RedactOptions {
            server_url: false,
            env: Vec::new(),
            patterns: vec!["([unclosed".to_string()],
        };
        let scrubbed = scrub_cassette(&cassette, &options);
        assert_eq!(scrubbed.interactions[0].response(), cassette.interactions[0].response());
    }

    #[test]
    fn env_value_redacted_from_metadata() {
        // PATH is present in any test environment; its value stands in for
        // a secret that leaked into the metadata.
        let Ok(path_value) = std::env::var("PATH") else { return };
        if path_value.is_empty() {
            return;
        }

        let mut cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1}));
        cassette.metadata.server_url = format!("http://api.example.com/{path_value}");

        let options = RedactOptions {
            server_url: false,
            env: vec!["PATH".to_string()],
            patterns: Vec::new(),
        };
        let scrubbed = scrub_cassette(&cassette, &options);
        assert_eq!(scrubbed.metadata.server_url, "http://api.example.com/[REDACTED]");
    }

    #[test]
    fn missing_env_var_is_skipped() {
        let cassette = cassette_with_response(json!({"jsonrpc": "2.0", "id": 1, "result": {"v": "x"}}));
        let options = RedactOptions {
            server_url: false,
            env: vec!["MCP_CASSETTE_DEFINITELY_UNSET".to_string()],
            patterns: Vec::new(),
        };
        let scrubbed = scrub_cassette(&cassette, &options);
        assert_eq!(scrubbed.interactions, cassette.interactions);
    }
}

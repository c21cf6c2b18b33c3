//! Cassette data model and persistence.
//!
//! A cassette is the persistent artifact of one recording session: an
//! ordered list of captured interactions plus session metadata, tagged with
//! a `MAJOR.MINOR` format version. Interactions are modeled as a tagged sum
//! type in memory and serialized to a flat record on disk, with `null` for
//! the fields a variant does not carry.

use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CassetteError;

/// On-disk cassette format version. The major component must match on load.
pub const FORMAT_VERSION: &str = "1.0";

/// A complete recording session: metadata plus ordered interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cassette {
    /// Format version of the on-disk shape (`MAJOR.MINOR`).
    pub version: String,

    /// Session metadata.
    pub metadata: CassetteMetadata,

    /// Captured interactions in temporal order of capture.
    pub interactions: Vec<Interaction>,
}

/// Session metadata recorded alongside the interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CassetteMetadata {
    /// ISO-8601 UTC timestamp of when recording started.
    pub recorded_at: String,

    /// URL of the recorded server (path may be redacted by the scrubber).
    pub server_url: String,

    /// Protocol version from the first initialize response, once seen.
    pub protocol_version: Option<String>,

    /// Server info object from the first initialize response, once seen.
    pub server_info: Option<Value>,
}

impl CassetteMetadata {
    /// Create metadata for a new recording against `server_url`.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            server_url: server_url.into(),
            protocol_version: None,
            server_info: None,
        }
    }
}

/// One captured HTTP exchange, classified by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InteractionRepr", into = "InteractionRepr")]
pub enum Interaction {
    /// A JSON-RPC request (body carries an `id`) and its response.
    JsonRpcRequest {
        /// The JSON-RPC request object.
        request: Value,
        /// The JSON-RPC response object, if one was captured.
        response: Option<Value>,
        /// True when the response arrived as an SSE stream.
        response_is_sse: bool,
        /// HTTP status observed from the server.
        response_status: u16,
        /// Wall-clock latency (for SSE, measured to stream close).
        latency_ms: u64,
    },

    /// A JSON-RPC notification (no `id`, no response body).
    Notification {
        /// The notification object, when the body parsed as JSON.
        request: Option<Value>,
        /// HTTP status observed from the server (typically 202).
        response_status: u16,
        /// Wall-clock latency.
        latency_ms: u64,
    },

    /// A non-JSON-RPC exchange: SSE listener GET or session DELETE.
    Lifecycle {
        /// HTTP method, `GET` or `DELETE`.
        http_method: String,
        /// Request path as seen by the proxy.
        http_path: String,
        /// True for GET keep-alive streams.
        response_is_sse: bool,
        /// HTTP status observed from the server.
        response_status: u16,
        /// Wall-clock latency.
        latency_ms: u64,
    },
}

impl Interaction {
    /// True for the `jsonrpc_request` variant (the only kind matchers index).
    #[must_use]
    pub fn is_jsonrpc_request(&self) -> bool {
        matches!(self, Self::JsonRpcRequest { .. })
    }

    /// The captured request body, if any.
    #[must_use]
    pub fn request(&self) -> Option<&Value> {
        match self {
            Self::JsonRpcRequest { request, .. } => Some(request),
            Self::Notification { request, .. } => request.as_ref(),
            Self::Lifecycle { .. } => None,
        }
    }

    /// The captured response body, if any.
    #[must_use]
    pub fn response(&self) -> Option<&Value> {
        match self {
            Self::JsonRpcRequest { response, .. } => response.as_ref(),
            _ => None,
        }
    }

    /// Replace the captured response body (verifier `--update` flow).
    pub fn set_response(&mut self, new_response: Option<Value>) {
        if let Self::JsonRpcRequest { response, .. } = self {
            *response = new_response;
        }
    }

    /// True when the response was captured from an SSE stream.
    #[must_use]
    pub fn response_is_sse(&self) -> bool {
        match self {
            Self::JsonRpcRequest { response_is_sse, .. }
            | Self::Lifecycle { response_is_sse, .. } => *response_is_sse,
            Self::Notification { .. } => false,
        }
    }

    /// HTTP status observed from the server.
    #[must_use]
    pub fn response_status(&self) -> u16 {
        match self {
            Self::JsonRpcRequest { response_status, .. }
            | Self::Notification { response_status, .. }
            | Self::Lifecycle { response_status, .. } => *response_status,
        }
    }

    /// Recorded latency in milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        match self {
            Self::JsonRpcRequest { latency_ms, .. }
            | Self::Notification { latency_ms, .. }
            | Self::Lifecycle { latency_ms, .. } => *latency_ms,
        }
    }

    /// JSON-RPC method name from the request body, if present.
    #[must_use]
    pub fn jsonrpc_method(&self) -> Option<&str> {
        self.request()?.get("method")?.as_str()
    }

    /// Tool name for `tools/call` requests.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        if self.jsonrpc_method()? != "tools/call" {
            return None;
        }
        self.request()?.get("params")?.get("name")?.as_str()
    }

    /// One-line summary for console logging.
    #[must_use]
    pub fn summary(&self) -> String {
        let sse_tag = if self.response_is_sse() { " SSE" } else { "" };
        match self {
            Self::JsonRpcRequest { response_status, latency_ms, .. } => {
                let method = self.jsonrpc_method().unwrap_or("?");
                let tool_tag =
                    self.tool_name().map(|t| format!(" [{t}]")).unwrap_or_default();
                format!("{method}{tool_tag} -> {response_status}{sse_tag} ({latency_ms}ms)")
            }
            Self::Notification { response_status, latency_ms, .. } => {
                let method = self.jsonrpc_method().unwrap_or("?");
                format!("{method} -> {response_status} ({latency_ms}ms) notification")
            }
            Self::Lifecycle { http_method, http_path, response_status, latency_ms, .. } => {
                format!("{http_method} {http_path} -> {response_status}{sse_tag} ({latency_ms}ms)")
            }
        }
    }
}

/// Flat on-disk shape of an interaction. Every field is present in the
/// serialized record; `null` marks the fields a variant does not carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InteractionRepr {
    #[serde(rename = "type")]
    kind: InteractionKind,
    #[serde(default)]
    request: Option<Value>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    response_is_sse: bool,
    #[serde(default = "default_status")]
    response_status: u16,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    http_method: Option<String>,
    #[serde(default)]
    http_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InteractionKind {
    JsonrpcRequest,
    Notification,
    Lifecycle,
}

fn default_status() -> u16 {
    200
}

impl TryFrom<InteractionRepr> for Interaction {
    type Error = String;

    fn try_from(repr: InteractionRepr) -> Result<Self, Self::Error> {
        match repr.kind {
            InteractionKind::JsonrpcRequest => Ok(Self::JsonRpcRequest {
                request: repr
                    .request
                    .ok_or("jsonrpc_request interaction is missing its request body")?,
                response: repr.response,
                response_is_sse: repr.response_is_sse,
                response_status: repr.response_status,
                latency_ms: repr.latency_ms,
            }),
            InteractionKind::Notification => Ok(Self::Notification {
                request: repr.request,
                response_status: repr.response_status,
                latency_ms: repr.latency_ms,
            }),
            InteractionKind::Lifecycle => Ok(Self::Lifecycle {
                http_method: repr
                    .http_method
                    .ok_or("lifecycle interaction is missing http_method")?,
                http_path: repr
                    .http_path
                    .ok_or("lifecycle interaction is missing http_path")?,
                response_is_sse: repr.response_is_sse,
                response_status: repr.response_status,
                latency_ms: repr.latency_ms,
            }),
        }
    }
}

impl From<Interaction> for InteractionRepr {
    fn from(interaction: Interaction) -> Self {
        match interaction {
            Interaction::JsonRpcRequest {
                request,
                response,
                response_is_sse,
                response_status,
                latency_ms,
            } => Self {
                kind: InteractionKind::JsonrpcRequest,
                request: Some(request),
                response,
                response_is_sse,
                response_status,
                latency_ms,
                http_method: None,
                http_path: None,
            },
            Interaction::Notification { request, response_status, latency_ms } => Self {
                kind: InteractionKind::Notification,
                request,
                response: None,
                response_is_sse: false,
                response_status,
                latency_ms,
                http_method: None,
                http_path: None,
            },
            Interaction::Lifecycle {
                http_method,
                http_path,
                response_is_sse,
                response_status,
                latency_ms,
            } => Self {
                kind: InteractionKind::Lifecycle,
                request: None,
                response: None,
                response_is_sse,
                response_status,
                latency_ms,
                http_method: Some(http_method),
                http_path: Some(http_path),
            },
        }
    }
}

impl Cassette {
    /// Create an empty cassette for a recording against `server_url`.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            metadata: CassetteMetadata::new(server_url),
            interactions: Vec::new(),
        }
    }

    /// Append an interaction, extracting initialize metadata on first sight.
    ///
    /// The first `initialize` interaction with a non-null `result` supplies
    /// `metadata.protocol_version` and `metadata.server_info`; later
    /// initialize calls never overwrite them.
    pub fn add_interaction(&mut self, interaction: Interaction) {
        if self.metadata.protocol_version.is_none() && self.metadata.server_info.is_none() {
            if interaction.jsonrpc_method() == Some("initialize") {
                if let Some(result) = interaction.response().and_then(|r| r.get("result")) {
                    self.metadata.protocol_version = result
                        .get("protocolVersion")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.metadata.server_info =
                        result.get("serverInfo").filter(|v| !v.is_null()).cloned();
                }
            }
        }
        self.interactions.push(interaction);
    }

    /// Count of interactions of each type: (requests, notifications, lifecycle).
    #[must_use]
    pub fn type_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for interaction in &self.interactions {
            match interaction {
                Interaction::JsonRpcRequest { .. } => counts.0 += 1,
                Interaction::Notification { .. } => counts.1 += 1,
                Interaction::Lifecycle { .. } => counts.2 += 1,
            }
        }
        counts
    }
}

/// Load and validate a cassette from a JSON file.
///
/// The major component of the file's `version` must equal the
/// implementation's expected major; otherwise loading fails without
/// surfacing any interactions.
pub fn load_cassette(path: &Path) -> Result<Cassette, CassetteError> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;

    let found = value.get("version").and_then(Value::as_str).unwrap_or("").to_string();
    let expected_major = FORMAT_VERSION.split('.').next().unwrap_or(FORMAT_VERSION);
    if found.split('.').next() != Some(expected_major) {
        return Err(CassetteError::version_mismatch(found, expected_major));
    }

    Ok(serde_json::from_value(value)?)
}

/// Serialize a cassette to a JSON file, creating parent directories.
///
/// Output is pretty-printed UTF-8 with two-space indentation, non-ASCII
/// characters preserved, and a trailing newline. The `interactions` array
/// keeps insertion order.
pub fn save_cassette(cassette: &Cassette, path: &Path) -> Result<(), CassetteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut data = serde_json::to_string_pretty(cassette)?;
    data.push('\n');
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_cassette() -> Cassette {
        let mut cassette = Cassette::new("http://localhost:8000/mcp");
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {"protocolVersion": "2025-11-25"}
            }),
            response: json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": {
                    "protocolVersion": "2025-11-25",
                    "serverInfo": {"name": "Test Calculator", "version": "1.2.3"}
                }
            })
            .into(),
            response_is_sse: true,
            response_status: 200,
            latency_ms: 12,
        });
        cassette.add_interaction(Interaction::Notification {
            request: Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            response_status: 202,
            latency_ms: 1,
        });
        cassette.add_interaction(Interaction::Lifecycle {
            http_method: "DELETE".to_string(),
            http_path: "/mcp".to_string(),
            response_is_sse: false,
            response_status: 200,
            latency_ms: 2,
        });
        cassette
    }

    #[test]
    fn round_trip_preserves_cassette() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");

        let mut cassette = sample_cassette();
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"message": "héllo — ünïcode"}}
            }),
            response: json!({"jsonrpc": "2.0", "id": 1, "result": {"text": "héllo — ünïcode"}})
                .into(),
            response_is_sse: false,
            response_status: 200,
            latency_ms: 40,
        });

        save_cassette(&cassette, &path).expect("save");
        let loaded = load_cassette(&path).expect("load");
        assert_eq!(loaded, cassette);
    }

    #[test]
    fn save_writes_pretty_utf8_with_trailing_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        let mut cassette = sample_cassette();
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                            "params": {"name": "echo", "arguments": {"message": "grüß"}}}),
            response: None,
            response_is_sse: false,
            response_status: 200,
            latency_ms: 5,
        });
        save_cassette(&cassette, &path).expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("{\n  \"version\""));
        assert!(text.ends_with("\n"));
        // Non-ASCII is preserved, not \u-escaped.
        assert!(text.contains("grüß"));
    }

    #[test]
    fn load_rejects_major_version_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("future.json");
        std::fs::write(
            &path,
            r#"{"version": "2.0", "metadata": {"recorded_at": "now", "server_url": "x",
                "protocol_version": null, "server_info": null}, "interactions": []}"#,
        )
        .expect("write");

        let err = load_cassette(&path).expect_err("must reject");
        let msg = err.to_string();
        assert!(msg.contains("2.0"), "diagnostic names the found version: {msg}");
        assert!(msg.contains("1.x"), "diagnostic names the expected family: {msg}");
    }

    #[test]
    fn add_interaction_extracts_initialize_metadata_once() {
        let cassette = sample_cassette();
        assert_eq!(cassette.metadata.protocol_version.as_deref(), Some("2025-11-25"));
        assert_eq!(
            cassette.metadata.server_info,
            Some(json!({"name": "Test Calculator", "version": "1.2.3"}))
        );

        // A later initialize must not overwrite.
        let mut cassette = cassette;
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({"jsonrpc": "2.0", "id": 9, "method": "initialize"}),
            response: json!({"jsonrpc": "2.0", "id": 9, "result": {
                "protocolVersion": "9.9", "serverInfo": {"name": "Other"}
            }})
            .into(),
            response_is_sse: false,
            response_status: 200,
            latency_ms: 3,
        });
        assert_eq!(cassette.metadata.protocol_version.as_deref(), Some("2025-11-25"));
        assert_eq!(
            cassette.metadata.server_info,
            Some(json!({"name": "Test Calculator", "version": "1.2.3"}))
        );
    }

    #[test]
    fn initialize_with_null_result_does_not_populate_metadata() {
        let mut cassette = Cassette::new("http://localhost:8000");
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"}),
            response: json!({"jsonrpc": "2.0", "id": 0, "error": {"code": -32000, "message": "boom"}})
                .into(),
            response_is_sse: false,
            response_status: 200,
            latency_ms: 1,
        });
        assert_eq!(cassette.metadata.protocol_version, None);
        assert_eq!(cassette.metadata.server_info, None);
    }

    #[test]
    fn interaction_serializes_to_flat_shape_with_nulls() {
        let lifecycle = Interaction::Lifecycle {
            http_method: "GET".to_string(),
            http_path: "/mcp".to_string(),
            response_is_sse: true,
            response_status: 200,
            latency_ms: 7,
        };
        let value = serde_json::to_value(&lifecycle).expect("serialize");
        assert_eq!(value["type"], "lifecycle");
        assert_eq!(value["request"], Value::Null);
        assert_eq!(value["response"], Value::Null);
        assert_eq!(value["http_method"], "GET");
        assert_eq!(value["http_path"], "/mcp");
        assert_eq!(value["response_is_sse"], true);

        let notification = Interaction::Notification {
            request: Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            response_status: 202,
            latency_ms: 0,
        };
        let value = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(value["type"], "notification");
        assert_eq!(value["response"], Value::Null);
        assert_eq!(value["http_method"], Value::Null);
        assert_eq!(value["http_path"], Value::Null);
        assert_eq!(value["response_status"], 202);
    }

    #[test]
    fn lifecycle_without_method_is_rejected() {
        let raw = json!({"type": "lifecycle", "http_path": "/mcp"});
        let parsed: Result<Interaction, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn derived_accessors() {
        let interaction = Interaction::JsonRpcRequest {
            request: json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 1, "b": 2}}
            }),
            response: None,
            response_is_sse: false,
            response_status: 200,
            latency_ms: 0,
        };
        assert_eq!(interaction.jsonrpc_method(), Some("tools/call"));
        assert_eq!(interaction.tool_name(), Some("add"));

        let listing = Interaction::JsonRpcRequest {
            request: json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
            response: None,
            response_is_sse: false,
            response_status: 200,
            latency_ms: 0,
        };
        assert_eq!(listing.tool_name(), None);
    }

    #[test]
    fn type_counts_by_variant() {
        let cassette = sample_cassette();
        assert_eq!(cassette.type_counts(), (1, 1, 1));
    }
}

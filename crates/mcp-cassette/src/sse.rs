//! Server-Sent Events parsing helpers.
//!
//! Shared by the recording proxy (line-at-a-time while streaming), the
//! verifier, and the minimal MCP client (buffered bodies).

use serde_json::Value;

/// Parse a single SSE line into a JSON-RPC payload.
///
/// Returns `Some` only for `data:` lines whose payload decodes as JSON.
/// Everything else (`event:` lines, comments, keep-alive pings, non-JSON
/// payloads) is skipped.
#[must_use]
pub fn parse_sse_line(line: &str) -> Option<Value> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    serde_json::from_str(payload).ok()
}

/// Extract the first JSON-RPC message from a complete SSE response body.
#[must_use]
pub fn parse_sse_response(body: &str) -> Option<Value> {
    body.lines().find_map(parse_sse_line)
}

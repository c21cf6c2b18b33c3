//! Replay server: serves recorded MCP interactions from a cassette.
//!
//! One method-dispatched endpoint on `/*`. POST bodies are matched against
//! the cassette through a [`Matcher`]; matched responses are returned with
//! the recorded HTTP status and the JSON-RPC `id` rewritten to the incoming
//! request's `id`. Responses recorded as SSE are re-framed as a single
//! `event: message` event.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use futures::stream;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cassette::Cassette;
use crate::config::mcp;
use crate::matcher::Matcher;

/// Matcher shared between the replay server and its creator, so that
/// `all_consumed` / `unmatched_requests` can be inspected after shutdown.
pub type SharedMatcher = Arc<Mutex<Box<dyn Matcher>>>;

/// Wrap a matcher for use by a replay server.
#[must_use]
pub fn share_matcher(matcher: Box<dyn Matcher>) -> SharedMatcher {
    Arc::new(Mutex::new(matcher))
}

/// Replay behavior toggles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Sleep the recorded latency before answering each matched request.
    pub simulate_latency: bool,
}

struct ReplayState {
    matcher: SharedMatcher,
    session_id: String,
    simulate_latency: bool,
}

/// Create an axum app that serves recorded responses from a cassette.
pub fn create_replay_app(cassette: &Cassette, matcher: SharedMatcher) -> Router {
    create_replay_app_with_options(cassette, matcher, ReplayOptions::default())
}

/// Create a replay app with explicit options.
pub fn create_replay_app_with_options(
    cassette: &Cassette,
    matcher: SharedMatcher,
    options: ReplayOptions,
) -> Router {
    // One session id per server instance, fresh on every start.
    let session_id = Uuid::new_v4().simple().to_string();
    let (requests, notifications, lifecycle) = cassette.type_counts();
    tracing::info!(
        requests,
        notifications,
        lifecycle,
        session_id = %session_id,
        "replay server serving cassette"
    );

    let state = Arc::new(ReplayState {
        matcher,
        session_id,
        simulate_latency: options.simulate_latency,
    });

    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dispatch(State(state): State<Arc<ReplayState>>, request: Request) -> Response {
    let method = request.method().clone();
    if method == Method::POST {
        handle_post(&state, request).await
    } else if method == Method::GET {
        handle_get(&state)
    } else if method == Method::DELETE {
        handle_delete(&state)
    } else {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        response
    }
}

async fn handle_post(state: &ReplayState, request: Request) -> Response {
    let Ok(body_bytes) = axum::body::to_bytes(request.into_body(), usize::MAX).await else {
        return parse_error_response(state);
    };
    let Some(Value::Object(body)) = parse_json(&body_bytes) else {
        return parse_error_response(state);
    };

    let method = body.get("method").and_then(Value::as_str).unwrap_or("").to_string();

    // Notifications (no id) are acknowledged without touching the matcher.
    if !body.contains_key("id") {
        tracing::info!(method = %method, "notification -> 202");
        return notification_response(state);
    }

    let request_id = body.get("id").cloned().unwrap_or(Value::Null);
    let body = Value::Object(body);

    let matched = lock_matcher(&state.matcher).match_request(&body);

    let Some(matched) = matched else {
        let mut message = format!("No matching interaction for {method}");
        if let Some(tool) = body.get("params").and_then(|p| p.get("name")).and_then(Value::as_str)
        {
            message.push_str(&format!(" [{tool}]"));
        }
        tracing::warn!(method = %method, "no matching interaction");
        return json_response(
            state,
            StatusCode::OK,
            &jsonrpc_error(request_id, -32600, &message),
        );
    };

    if state.simulate_latency && matched.latency_ms() > 0 {
        tokio::time::sleep(Duration::from_millis(matched.latency_ms())).await;
    }

    // Rewrite the response id to correlate with the incoming request;
    // nothing else in the recorded response is modified.
    let mut response_body = matched.response().cloned();
    if let Some(response) = response_body.as_mut() {
        rewrite_id(response, &request_id);
    }

    let status =
        StatusCode::from_u16(matched.response_status()).unwrap_or(StatusCode::OK);
    let tool_tag = matched.tool_name().map(|t| format!(" [{t}]")).unwrap_or_default();
    let sse_tag = if matched.response_is_sse() { " SSE" } else { "" };
    tracing::info!("{method}{tool_tag} -> {}{sse_tag} (replayed)", status.as_u16());

    match response_body {
        Some(response) if matched.response_is_sse() => sse_response(state, status, &response),
        Some(response) => json_response(state, status, &response),
        None => {
            let mut response = base_response(state, Body::empty());
            *response.status_mut() = status;
            insert_header(&mut response, header::CONTENT_TYPE, "application/json");
            response
        }
    }
}

/// Server-push SSE listener: an open stream that yields no bytes.
fn handle_get(state: &ReplayState) -> Response {
    tracing::info!("GET -> SSE keep-alive");
    let empty = stream::empty::<Result<Bytes, Infallible>>();
    let mut response = base_response(state, Body::from_stream(empty));
    insert_header(&mut response, header::CONTENT_TYPE, "text/event-stream");
    insert_header(&mut response, header::CACHE_CONTROL, mcp::CACHE_CONTROL);
    response
}

/// Session teardown.
fn handle_delete(state: &ReplayState) -> Response {
    tracing::info!("DELETE -> 200 (session teardown)");
    let mut response = base_response(state, Body::empty());
    insert_header(&mut response, header::CONTENT_TYPE, "application/json");
    response
}

fn rewrite_id(response: &mut Value, request_id: &Value) {
    if let Some(object) = response.as_object_mut() {
        if object.contains_key("id") {
            object.insert("id".to_string(), request_id.clone());
        }
    }
}

fn jsonrpc_error(request_id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "error": {"code": code, "message": message},
    })
}

fn parse_json(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_slice(raw).ok()
}

fn parse_error_response(state: &ReplayState) -> Response {
    json_response(
        state,
        StatusCode::OK,
        &jsonrpc_error(Value::Null, -32700, "Parse error: invalid JSON"),
    )
}

fn notification_response(state: &ReplayState) -> Response {
    let mut response = base_response(state, Body::empty());
    *response.status_mut() = StatusCode::ACCEPTED;
    insert_header(&mut response, header::CONTENT_TYPE, "application/json");
    response
}

fn json_response(state: &ReplayState, status: StatusCode, body: &Value) -> Response {
    let payload = serde_json::to_string(body).unwrap_or_default();
    let mut response = base_response(state, Body::from(payload));
    *response.status_mut() = status;
    insert_header(&mut response, header::CONTENT_TYPE, "application/json");
    insert_header(&mut response, header::CACHE_CONTROL, mcp::CACHE_CONTROL);
    response
}

/// Frame a recorded JSON-RPC message as a single SSE event.
fn sse_response(state: &ReplayState, status: StatusCode, body: &Value) -> Response {
    let payload = serde_json::to_string(body).unwrap_or_default();
    let frame = format!("event: message\ndata: {payload}\n\n");
    let once = stream::once(async move { Ok::<_, Infallible>(Bytes::from(frame)) });

    let mut response = base_response(state, Body::from_stream(once));
    *response.status_mut() = status;
    insert_header(&mut response, header::CONTENT_TYPE, "text/event-stream");
    insert_header(&mut response, header::CACHE_CONTROL, mcp::CACHE_CONTROL);
    response
}

/// A 200 response carrying the session header.
fn base_response(state: &ReplayState, body: Body) -> Response {
    let mut response = Response::new(body);
    if let Ok(value) = HeaderValue::from_str(&state.session_id) {
        response.headers_mut().insert(mcp::SESSION_HEADER, value);
    }
    response
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

fn lock_matcher(matcher: &SharedMatcher) -> MutexGuard<'_, Box<dyn Matcher>> {
    matcher.lock().unwrap_or_else(PoisonError::into_inner)
}

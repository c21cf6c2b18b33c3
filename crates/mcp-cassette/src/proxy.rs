//! Recording reverse proxy.
//!
//! Forwards every request received on `/*` to the target MCP server,
//! returns the upstream response bit-equivalently, and appends one
//! classified interaction per completed exchange to a shared cassette.
//!
//! SSE responses are streamed: each upstream line is forwarded downstream
//! verbatim as soon as it arrives and concurrently inspected for JSON-RPC
//! `data:` payloads. The capture is finalized from a drop guard, so an
//! interaction is recorded even when the downstream client disconnects
//! mid-stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::cassette::{Cassette, Interaction};
use crate::config;
use crate::error::ProxyError;
use crate::sse::parse_sse_line;

/// Cassette shared between concurrent proxy exchanges.
pub type SharedCassette = Arc<Mutex<Cassette>>;

/// Wrap a cassette for use by a recording proxy.
#[must_use]
pub fn share_cassette(cassette: Cassette) -> SharedCassette {
    Arc::new(Mutex::new(cassette))
}

/// Headers that must not travel through the proxy in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

struct ProxyState {
    client: reqwest::Client,
    target_url: String,
    target_host: String,
    cassette: SharedCassette,
}

/// How the exchange will be recorded, decided from the request alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    JsonRpcRequest,
    Notification,
    Lifecycle,
}

fn classify(method: &Method, request_body: Option<&Value>) -> Classification {
    if *method == Method::GET || *method == Method::DELETE {
        Classification::Lifecycle
    } else if request_body.is_some_and(|body| body.get("id").is_some()) {
        Classification::JsonRpcRequest
    } else {
        Classification::Notification
    }
}

/// Create an axum app that proxies all requests to `target_url`.
///
/// Every completed exchange is appended to the shared cassette; appends are
/// serialized by the cassette mutex and ordered by exchange completion time
/// (for SSE, end of stream).
pub fn create_proxy_app(target_url: &str, cassette: SharedCassette) -> Result<Router, ProxyError> {
    let parsed =
        Url::parse(target_url).map_err(|err| ProxyError::invalid_target(target_url, err))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ProxyError::invalid_target(target_url, "URL has no host"))?;
    let target_host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    // No automatic decompression and no redirect-following: the downstream
    // caller must observe the upstream bytes unchanged.
    let client = reqwest::Client::builder()
        .timeout(config::http::REQUEST_TIMEOUT)
        .connect_timeout(config::http::CONNECT_TIMEOUT)
        .pool_max_idle_per_host(config::http::MAX_KEEPALIVE)
        .pool_idle_timeout(config::http::KEEPALIVE_EXPIRY)
        .no_gzip()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let state = Arc::new(ProxyState {
        client,
        target_url: target_url.trim_end_matches('/').to_string(),
        target_host,
        cassette,
    });

    Ok(Router::new()
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let Ok(request_bytes) = axum::body::to_bytes(body, usize::MAX).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let request_parsed = parse_json_body(&request_bytes);
    let classification = classify(&parts.method, request_parsed.as_ref());

    let mut upstream_url = format!("{}{}", state.target_url, parts.uri.path());
    if let Some(query) = parts.uri.query() {
        upstream_url.push('?');
        upstream_url.push_str(query);
    }

    let outbound_headers = forward_headers(&parts.headers, &state.target_host);
    let started = Instant::now();

    let upstream = state
        .client
        .request(parts.method.clone(), &upstream_url)
        .headers(outbound_headers)
        .body(request_bytes)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(err) => return upstream_error(&err),
    };

    let status = upstream.status();
    let is_sse = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("text/event-stream"));

    if is_sse {
        return stream_sse(&state, classification, request_parsed, &parts, upstream, started);
    }

    let response_headers = filtered_headers(upstream.headers());
    let response_bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return upstream_error(&err),
    };
    let latency_ms = started.elapsed().as_millis() as u64;
    let response_parsed = parse_json_body(&response_bytes);

    let interaction = build_interaction(
        classification,
        request_parsed,
        response_parsed,
        false,
        status.as_u16(),
        latency_ms,
        parts.method.as_str(),
        parts.uri.path(),
    );
    record(&state.cassette, interaction);

    let mut response = Response::new(Body::from(response_bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Stream the upstream SSE body downstream line-by-line while capturing
/// JSON-RPC payloads. The interaction is recorded when the stream ends or
/// the downstream client disconnects, whichever comes first.
fn stream_sse(
    state: &Arc<ProxyState>,
    classification: Classification,
    request_parsed: Option<Value>,
    parts: &axum::http::request::Parts,
    upstream: reqwest::Response,
    started: Instant,
) -> Response {
    let status = upstream.status();
    let response_headers = filtered_headers(upstream.headers());

    let mut capture = SseCapture {
        cassette: Arc::clone(&state.cassette),
        classification,
        request: request_parsed,
        http_method: parts.method.to_string(),
        http_path: parts.uri.path().to_string(),
        status: status.as_u16(),
        started,
        events: Vec::new(),
    };

    let mut upstream_body = upstream.bytes_stream();
    let stream = async_stream::stream! {
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = upstream_body.next().await {
            match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    // Forward every complete line verbatim, newline included.
                    while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=end).collect();
                        capture.observe_line(&line);
                        yield Ok::<_, std::io::Error>(Bytes::from(line));
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "upstream SSE stream error");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            capture.observe_line(&pending);
            yield Ok(Bytes::from(std::mem::take(&mut pending)));
        }
        // `capture` drops here (or when the client disconnects) and records
        // the interaction with whatever events were seen.
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Finalizes an SSE capture; recording happens in `Drop` so that client
/// disconnects still produce an interaction.
struct SseCapture {
    cassette: SharedCassette,
    classification: Classification,
    request: Option<Value>,
    http_method: String,
    http_path: String,
    status: u16,
    started: Instant,
    events: Vec<Value>,
}

impl SseCapture {
    fn observe_line(&mut self, raw: &[u8]) {
        if let Ok(text) = std::str::from_utf8(raw) {
            if let Some(event) = parse_sse_line(text) {
                self.events.push(event);
            }
        }
    }
}

impl Drop for SseCapture {
    fn drop(&mut self) {
        let latency_ms = self.started.elapsed().as_millis() as u64;
        let first_event = if self.events.is_empty() { None } else { Some(self.events.remove(0)) };
        let interaction = build_interaction(
            self.classification,
            self.request.take(),
            first_event,
            true,
            self.status,
            latency_ms,
            &self.http_method,
            &self.http_path,
        );
        record(&self.cassette, interaction);
    }
}

#[allow(clippy::too_many_arguments)]
fn build_interaction(
    classification: Classification,
    request: Option<Value>,
    response: Option<Value>,
    response_is_sse: bool,
    response_status: u16,
    latency_ms: u64,
    http_method: &str,
    http_path: &str,
) -> Interaction {
    match classification {
        Classification::JsonRpcRequest => Interaction::JsonRpcRequest {
            request: request.unwrap_or(Value::Null),
            response,
            response_is_sse,
            response_status,
            latency_ms,
        },
        Classification::Notification => Interaction::Notification {
            request,
            response_status,
            latency_ms,
        },
        Classification::Lifecycle => Interaction::Lifecycle {
            http_method: http_method.to_owned(),
            http_path: http_path.to_owned(),
            response_is_sse,
            response_status,
            latency_ms,
        },
    }
}

fn record(cassette: &SharedCassette, interaction: Interaction) {
    tracing::info!("{}", interaction.summary());
    lock_cassette(cassette).add_interaction(interaction);
}

fn lock_cassette(cassette: &SharedCassette) -> MutexGuard<'_, Cassette> {
    cassette.lock().unwrap_or_else(PoisonError::into_inner)
}

fn upstream_error(err: &reqwest::Error) -> Response {
    tracing::error!(error = %err, "upstream error");
    (StatusCode::BAD_GATEWAY, Json(json!({"error": format!("Upstream error: {err}")})))
        .into_response()
}

fn parse_json_body(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_slice(raw).ok()
}

/// Filter hop-by-hop headers and rewrite `Host` for the upstream request.
fn forward_headers(headers: &HeaderMap, target_host: &str) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if name == &header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    if let Ok(host) = HeaderValue::from_str(target_host) {
        out.insert(header::HOST, host);
    }
    out
}

/// Filter hop-by-hop headers from the upstream response.
fn filtered_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

//! Minimal MCP client and recording session.
//!
//! [`McpClient`] speaks just enough JSON-RPC 2.0 over HTTP/SSE to drive
//! interactions through the recording proxy: request id assignment, session
//! tracking, and SSE response parsing. [`RecordSession`] wires a proxy, a
//! client, and cassette persistence together.

use std::path::PathBuf;

use reqwest::header;
use serde_json::{Value, json};

use crate::cassette::{Cassette, save_cassette};
use crate::config::{http, mcp, serve};
use crate::error::ClientError;
use crate::proxy::{SharedCassette, create_proxy_app, share_cassette};
use crate::scrubber::{RedactOptions, scrub_cassette};
use crate::serve::{ServerHandle, spawn_server};

/// Build the outbound HTTP client shared by the verifier and MCP client.
pub(crate) fn http_client() -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .timeout(http::REQUEST_TIMEOUT)
        .connect_timeout(http::CONNECT_TIMEOUT)
        .pool_max_idle_per_host(http::MAX_KEEPALIVE)
        .pool_idle_timeout(http::KEEPALIVE_EXPIRY)
        .build()?)
}

/// Minimal MCP client speaking JSON-RPC 2.0 over HTTP/SSE.
pub struct McpClient {
    client: reqwest::Client,
    mcp_url: String,
    next_id: u64,
    session_id: Option<String>,
}

impl McpClient {
    /// Create a client for the MCP endpoint under `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client()?,
            mcp_url: format!("{}/mcp", base_url.trim_end_matches('/')),
            next_id: 0,
            session_id: None,
        })
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn apply_session(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, mcp::ACCEPT);
        match self.session_id.as_deref() {
            Some(session) => request.header(mcp::SESSION_HEADER, session),
            None => request,
        }
    }

    fn update_session(&mut self, response: &reqwest::Response) {
        if let Some(session) =
            response.headers().get(mcp::SESSION_HEADER).and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }
    }

    /// Send a JSON-RPC request and return the parsed response, JSON or SSE.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Option<Value>, ClientError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.take_id(),
            "method": method,
            "params": params,
        });
        tracing::debug!(method = %method, "-> request");

        let request = self.apply_session(self.client.post(&self.mcp_url)).json(&body);
        let response = request.send().await?;
        self.update_session(&response);

        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let status = response.status();
        let text = response.text().await?;

        let parsed = if is_sse {
            crate::sse::parse_sse_response(&text)
        } else {
            serde_json::from_str(&text).ok()
        };
        tracing::debug!(status = status.as_u16(), "<- response");
        Ok(parsed)
    }

    /// Send a JSON-RPC notification (no id, no response body expected).
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        let mut body = json!({"jsonrpc": "2.0", "method": method});
        if let Some(params) = params {
            body["params"] = params;
        }
        tracing::debug!(method = %method, "-> notification");

        let request = self.apply_session(self.client.post(&self.mcp_url)).json(&body);
        let response = request.send().await?;
        self.update_session(&response);
        Ok(())
    }

    // -- Protocol lifecycle --------------------------------------------------

    /// Send `initialize` + `notifications/initialized`. Returns the server's
    /// init result.
    pub async fn initialize(&mut self) -> Result<Option<Value>, ClientError> {
        let result = self
            .send_request(
                "initialize",
                json!({
                    "protocolVersion": mcp::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        self.send_notification("notifications/initialized", None).await?;
        Ok(result)
    }

    // -- Tools ---------------------------------------------------------------

    /// List the server's tools.
    pub async fn list_tools(&mut self) -> Result<Option<Value>, ClientError> {
        self.send_request("tools/list", json!({})).await
    }

    /// Call a tool by name.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<Option<Value>, ClientError> {
        self.send_request("tools/call", json!({"name": name, "arguments": arguments})).await
    }

    // -- Prompts -------------------------------------------------------------

    /// List the server's prompts.
    pub async fn list_prompts(&mut self) -> Result<Option<Value>, ClientError> {
        self.send_request("prompts/list", json!({})).await
    }

    /// Fetch a prompt by name.
    pub async fn get_prompt(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Option<Value>, ClientError> {
        let mut params = json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.send_request("prompts/get", params).await
    }

    // -- Resources -----------------------------------------------------------

    /// List the server's resources.
    pub async fn list_resources(&mut self) -> Result<Option<Value>, ClientError> {
        self.send_request("resources/list", json!({})).await
    }

    /// Read a resource by URI.
    pub async fn read_resource(&mut self, uri: &str) -> Result<Option<Value>, ClientError> {
        self.send_request("resources/read", json!({"uri": uri})).await
    }
}

/// Records MCP interactions through an in-process proxy.
///
/// Starts a recording proxy on an OS-assigned port, exposes an [`McpClient`]
/// connected through it (already initialized), and scrubs + saves the
/// cassette on [`finish`](Self::finish).
pub struct RecordSession {
    server: ServerHandle,
    client: McpClient,
    cassette: SharedCassette,
    output: PathBuf,
    redact: RedactOptions,
}

impl RecordSession {
    /// Start a recording session against `target`, writing to `output`.
    pub async fn start(
        target: &str,
        output: impl Into<PathBuf>,
        redact: RedactOptions,
    ) -> anyhow::Result<Self> {
        let cassette = share_cassette(Cassette::new(target));
        let app = create_proxy_app(target, SharedCassette::clone(&cassette))?;
        let server = spawn_server(app, 0, serve::START_TIMEOUT).await?;

        let mut client = McpClient::new(&server.url())?;
        client.initialize().await?;

        Ok(Self { server, client, cassette, output: output.into(), redact })
    }

    /// The client connected through the recording proxy.
    pub fn client(&mut self) -> &mut McpClient {
        &mut self.client
    }

    /// Stop the proxy, scrub the cassette, and save it when non-empty.
    pub async fn finish(self) -> anyhow::Result<Cassette> {
        self.server.shutdown().await;

        let recorded = self
            .cassette
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let scrubbed = scrub_cassette(&recorded, &self.redact);

        if scrubbed.interactions.is_empty() {
            tracing::warn!("no interactions captured; cassette not written");
        } else {
            save_cassette(&scrubbed, &self.output)?;
            tracing::info!(
                interactions = scrubbed.interactions.len(),
                path = %self.output.display(),
                "cassette saved"
            );
        }
        Ok(scrubbed)
    }
}

//! Configuration constants for mcp-cassette.

/// Outbound HTTP client settings shared by the proxy, verifier, and client.
pub mod http {
    use std::time::Duration;

    /// Total request timeout (covers long SSE tool calls).
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Maximum idle keepalive connections per host.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
}

/// In-process server settings.
pub mod serve {
    use std::time::Duration;

    /// Default port for the recording proxy and replay server.
    pub const DEFAULT_PORT: u16 = 5555;

    /// How long to wait for a spawned server to accept connections.
    pub const START_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long to wait for a spawned server to drain on shutdown.
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// MCP protocol constants.
pub mod mcp {
    /// Protocol version announced by the minimal client.
    pub const PROTOCOL_VERSION: &str = "2025-11-25";

    /// Session header exchanged on every MCP response.
    pub const SESSION_HEADER: &str = "mcp-session-id";

    /// Cache-control value for replayed JSON-RPC responses.
    pub const CACHE_CONTROL: &str = "no-cache, no-transform";

    /// Accept header sent by MCP clients (JSON or SSE responses).
    pub const ACCEPT: &str = "application/json, text/event-stream";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_ordered() {
        assert!(http::CONNECT_TIMEOUT < http::REQUEST_TIMEOUT);
    }

    #[test]
    fn session_header_is_lowercase() {
        assert_eq!(mcp::SESSION_HEADER, mcp::SESSION_HEADER.to_lowercase());
    }
}

//! Error types for mcp-cassette.
//!
//! Uses `thiserror` for structured error handling with automatic `From`
//! implementations. Each pipeline layer owns a small enum; the binary
//! boundary collects them behind `anyhow`.

use std::time::Duration;

/// Errors from cassette loading and saving.
#[derive(thiserror::Error, Debug)]
pub enum CassetteError {
    /// Cassette file carries an incompatible major format version.
    #[error("incompatible cassette version {found:?} (expected {expected})")]
    VersionMismatch {
        /// Version string found in the file
        found: String,
        /// Accepted version family, e.g. "1.x"
        expected: String,
    },

    /// Cassette file is not valid JSON or not a valid cassette shape.
    #[error("failed to parse cassette: {0}")]
    Parse(#[from] serde_json::Error),

    /// Filesystem failure while reading or writing.
    #[error("cassette I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CassetteError {
    /// Create a version mismatch error against the expected major family.
    #[must_use]
    pub fn version_mismatch(found: impl Into<String>, expected_major: &str) -> Self {
        Self::VersionMismatch { found: found.into(), expected: format!("{expected_major}.x") }
    }
}

/// Errors from matcher construction.
#[derive(thiserror::Error, Debug)]
pub enum MatcherError {
    /// Strategy name not in the known set.
    #[error("unknown matching strategy {name:?}; choose from: {known}")]
    UnknownStrategy {
        /// The rejected strategy name
        name: String,
        /// Comma-separated known strategy names
        known: String,
    },
}

impl MatcherError {
    /// Create an unknown-strategy error listing the known choices.
    #[must_use]
    pub fn unknown_strategy(name: impl Into<String>, known: &[&str]) -> Self {
        Self::UnknownStrategy { name: name.into(), known: known.join(", ") }
    }
}

/// Errors from building a recording proxy.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    /// Target URL could not be parsed or has no host.
    #[error("invalid target URL {url:?}: {reason}")]
    InvalidTarget {
        /// The rejected URL
        url: String,
        /// Parse failure detail
        reason: String,
    },

    /// Outbound HTTP client construction failed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ProxyError {
    /// Create an invalid-target error.
    #[must_use]
    pub fn invalid_target(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidTarget { url: url.into(), reason: reason.to_string() }
    }
}

/// Errors from spawning an in-process server.
#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    /// The listener did not become ready within the allowed window.
    #[error("server failed to start on port {port} within {timeout:?}")]
    StartTimeout {
        /// Requested port (0 means OS-assigned)
        port: u16,
        /// Readiness window that elapsed
        timeout: Duration,
    },

    /// Bind or accept failure.
    #[error("failed to start server: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the minimal MCP client and the verifier's HTTP layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from scenario file loading and validation.
#[derive(thiserror::Error, Debug)]
pub enum ScenarioError {
    /// Scenarios file could not be read.
    #[error("failed to read scenarios file: {0}")]
    Io(#[from] std::io::Error),

    /// Scenarios file is not valid YAML or not a valid schema shape.
    #[error("invalid scenarios file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Schema version belongs to an incompatible major family.
    #[error("incompatible scenarios schema version {found:?} (expected {expected})")]
    SchemaVersion {
        /// Version string found in the file
        found: String,
        /// Accepted version family, e.g. "1.x"
        expected: String,
    },

    /// Action name not in the supported set.
    #[error("unknown action {name:?}; supported actions: {supported}")]
    UnknownAction {
        /// The rejected action name
        name: String,
        /// Comma-separated supported action names
        supported: String,
    },

    /// Parameterized action was not a single-key mapping.
    #[error("parameterized action must be a single-key mapping, got: {got}")]
    InvalidAction {
        /// Debug rendering of the offending action
        got: String,
    },

    /// Action parameters did not match the expected shape.
    #[error("invalid action parameters: {0}")]
    Params(#[from] serde_json::Error),

    /// The underlying MCP client failed while executing an action.
    #[error(transparent)]
    Client(#[from] ClientError),
}

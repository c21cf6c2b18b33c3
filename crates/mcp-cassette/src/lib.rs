//! MCP Cassette
//!
//! Record, replay, and verify Model Context Protocol (MCP) server
//! interactions for deterministic testing. MCP is a JSON-RPC 2.0 dialect
//! over HTTP with optional Server-Sent Events responses; this crate captures
//! live exchanges into a versioned cassette file, serves cassettes back as a
//! mock MCP endpoint, and checks that a live server still produces
//! cassette-equivalent responses.
//!
//! # Pipeline
//!
//! - **Record**: [`proxy::create_proxy_app`] builds a transparent reverse
//!   proxy that streams SSE responses to the caller while capturing them
//!   into a shared [`Cassette`].
//! - **Replay**: [`replay::create_replay_app`] answers recorded requests
//!   through a [`matcher::Matcher`] strategy with FIFO consumption of
//!   duplicates and JSON-RPC id rewriting.
//! - **Verify**: [`verify::run_verify`] drives a live server with the
//!   recorded requests and produces structural diffs.
//!
//! # Example
//!
//! ```no_run
//! use mcp_cassette::cassette::load_cassette;
//! use mcp_cassette::matcher::create_matcher;
//! use mcp_cassette::replay::{create_replay_app, share_matcher};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cassette = load_cassette("golden.json".as_ref())?;
//! let matcher = share_matcher(create_matcher("method_params", &cassette.interactions)?);
//! let app = create_replay_app(&cassette, matcher);
//! # Ok(())
//! # }
//! ```

pub mod cassette;
pub mod client;
pub mod config;
pub mod error;
pub mod matcher;
pub mod proxy;
pub mod replay;
pub mod scenarios;
pub mod scrubber;
pub mod serve;
pub mod sse;
pub mod verify;

pub use cassette::{Cassette, CassetteMetadata, Interaction, load_cassette, save_cassette};
pub use client::{McpClient, RecordSession};
pub use matcher::{Matcher, create_matcher};
pub use proxy::{SharedCassette, create_proxy_app};
pub use replay::{SharedMatcher, create_replay_app};
pub use verify::{VerifyResult, run_verify};

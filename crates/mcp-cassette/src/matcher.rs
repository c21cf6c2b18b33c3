//! Request matching strategies for cassette replay.
//!
//! All strategies operate on `jsonrpc_request` interactions only and consume
//! duplicates FIFO: identical recorded keys are returned in recorded order,
//! once each. `method_params` and `strict` index by a content-based stable
//! key; `sequential` ignores the body entirely and walks the recorded order.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cassette::Interaction;
use crate::error::MatcherError;

/// Known strategy names, in factory order.
pub const STRATEGIES: &[&str] = &["method_params", "sequential", "strict"];

/// Strip volatile fields from params before matching.
///
/// Removes the top-level `_meta` key (contains `progressToken`, which
/// changes every run). Non-object params pass through unchanged.
#[must_use]
pub fn normalize_params(params: Option<&Value>) -> Option<Value> {
    match params {
        Some(Value::Object(map)) => Some(Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "_meta")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )),
        other => other.cloned(),
    }
}

/// Deterministic short hash of a JSON value: the first 16 hex characters of
/// the SHA-256 of its canonical encoding (sorted keys, ASCII-safe).
#[must_use]
pub fn stable_hash(value: Option<&Value>) -> String {
    let mut canonical = String::new();
    match value {
        Some(v) => write_canonical(v, &mut canonical),
        None => canonical.push_str("null"),
    }
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..8].iter().fold(String::with_capacity(16), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Compute the match key for a JSON-RPC request body.
///
/// Key format: `method::hash(normalized_params)`.
#[must_use]
pub fn match_key_for(request: &Value) -> String {
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let normalized = normalize_params(request.get("params"));
    format!("{method}::{}", stable_hash(normalized.as_ref()))
}

/// Match key over the raw params, `_meta` included.
fn strict_key_for(request: &Value) -> String {
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    format!("{method}::{}", stable_hash(request.get("params")))
}

/// Canonical JSON writer: object keys sorted, compact separators, non-ASCII
/// escaped as `\uXXXX` so the encoding is byte-stable across platforms.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c if c.is_ascii() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

/// Shared accounting across all matching strategies.
#[derive(Debug, Default)]
pub struct MatchStats {
    total: usize,
    matched: usize,
    unmatched: Vec<Value>,
}

impl MatchStats {
    fn new(interactions: &[Interaction]) -> Self {
        Self {
            total: interactions.iter().filter(|i| i.is_jsonrpc_request()).count(),
            matched: 0,
            unmatched: Vec::new(),
        }
    }

    fn record_match(&mut self) {
        self.matched += 1;
    }

    fn record_miss(&mut self, request_body: &Value) {
        self.unmatched.push(request_body.clone());
    }

    /// Total `jsonrpc_request` interactions eligible for matching.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of successful matches so far.
    #[must_use]
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// True once every eligible interaction has been consumed.
    #[must_use]
    pub fn all_consumed(&self) -> bool {
        self.matched >= self.total
    }

    /// Request bodies that arrived but found no match, in arrival order.
    #[must_use]
    pub fn unmatched_requests(&self) -> &[Value] {
        &self.unmatched
    }
}

/// A replay matching strategy over a cassette's recorded requests.
pub trait Matcher: Send + std::fmt::Debug {
    /// Find the matching interaction for a request body, consuming it.
    /// Returns `None` (and logs the miss) when nothing matches.
    fn match_request(&mut self, request_body: &Value) -> Option<Interaction>;

    /// Shared match accounting.
    fn stats(&self) -> &MatchStats;

    /// True if every `jsonrpc_request` interaction has been consumed.
    fn all_consumed(&self) -> bool {
        self.stats().all_consumed()
    }

    /// Requests that came in but found no match, in arrival order.
    fn unmatched_requests(&self) -> &[Value] {
        self.stats().unmatched_requests()
    }
}

/// Match by JSON-RPC method + normalized params.
#[derive(Debug)]
pub struct MethodParamsMatcher {
    stats: MatchStats,
    index: HashMap<String, VecDeque<Interaction>>,
}

impl MethodParamsMatcher {
    /// Index the cassette's request interactions by normalized match key.
    #[must_use]
    pub fn new(interactions: &[Interaction]) -> Self {
        let mut index: HashMap<String, VecDeque<Interaction>> = HashMap::new();
        for interaction in interactions {
            if let Some(request) = request_body(interaction) {
                index.entry(match_key_for(request)).or_default().push_back(interaction.clone());
            }
        }
        Self { stats: MatchStats::new(interactions), index }
    }
}

impl Matcher for MethodParamsMatcher {
    fn match_request(&mut self, request_body: &Value) -> Option<Interaction> {
        let key = match_key_for(request_body);
        match self.index.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(interaction) => {
                self.stats.record_match();
                Some(interaction)
            }
            None => {
                self.stats.record_miss(request_body);
                None
            }
        }
    }

    fn stats(&self) -> &MatchStats {
        &self.stats
    }
}

/// Return the next unconsumed request interaction in recorded order,
/// regardless of the incoming body.
#[derive(Debug)]
pub struct SequentialMatcher {
    stats: MatchStats,
    queue: VecDeque<Interaction>,
}

impl SequentialMatcher {
    /// Queue the cassette's request interactions in recorded order.
    #[must_use]
    pub fn new(interactions: &[Interaction]) -> Self {
        let queue = interactions.iter().filter(|i| i.is_jsonrpc_request()).cloned().collect();
        Self { stats: MatchStats::new(interactions), queue }
    }
}

impl Matcher for SequentialMatcher {
    fn match_request(&mut self, request_body: &Value) -> Option<Interaction> {
        match self.queue.pop_front() {
            Some(interaction) => {
                self.stats.record_match();
                Some(interaction)
            }
            None => {
                self.stats.record_miss(request_body);
                None
            }
        }
    }

    fn stats(&self) -> &MatchStats {
        &self.stats
    }
}

/// Match by full body equality, `_meta` included.
#[derive(Debug)]
pub struct StrictMatcher {
    stats: MatchStats,
    index: HashMap<String, VecDeque<Interaction>>,
}

impl StrictMatcher {
    /// Index the cassette's request interactions by un-normalized match key.
    #[must_use]
    pub fn new(interactions: &[Interaction]) -> Self {
        let mut index: HashMap<String, VecDeque<Interaction>> = HashMap::new();
        for interaction in interactions {
            if let Some(request) = request_body(interaction) {
                index.entry(strict_key_for(request)).or_default().push_back(interaction.clone());
            }
        }
        Self { stats: MatchStats::new(interactions), index }
    }
}

impl Matcher for StrictMatcher {
    fn match_request(&mut self, request_body: &Value) -> Option<Interaction> {
        let key = strict_key_for(request_body);
        match self.index.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(interaction) => {
                self.stats.record_match();
                Some(interaction)
            }
            None => {
                self.stats.record_miss(request_body);
                None
            }
        }
    }

    fn stats(&self) -> &MatchStats {
        &self.stats
    }
}

fn request_body(interaction: &Interaction) -> Option<&Value> {
    if interaction.is_jsonrpc_request() { interaction.request() } else { None }
}

/// Create a matcher by strategy name.
pub fn create_matcher(
    strategy: &str,
    interactions: &[Interaction],
) -> Result<Box<dyn Matcher>, MatcherError> {
    match strategy {
        "method_params" => Ok(Box::new(MethodParamsMatcher::new(interactions))),
        "sequential" => Ok(Box::new(SequentialMatcher::new(interactions))),
        "strict" => Ok(Box::new(StrictMatcher::new(interactions))),
        other => Err(MatcherError::unknown_strategy(other, STRATEGIES)),
    }
}

//! YAML scenario parsing, validation, and execution.
//!
//! A scenarios file names a target server and a set of named scenarios,
//! each a list of high-level actions. Each scenario is recorded through a
//! fresh proxy into `<name>.json` under the output directory.
//!
//! ```yaml
//! schema_version: "1.0"
//! target: http://localhost:8000
//! redact:
//!   server_url: true
//! scenarios:
//!   calculator:
//!     description: exercise the calculator tools
//!     actions:
//!       - list_tools
//!       - call_tool:
//!           name: add
//!           arguments: {a: 2, b: 3}
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::client::{McpClient, RecordSession};
use crate::error::ScenarioError;
use crate::scrubber::RedactOptions;

/// Supported scenarios file schema version; major must match on load.
pub const SCENARIOS_FORMAT_VERSION: &str = "1.0";

/// Actions that take no parameters.
const SIMPLE_ACTIONS: &[&str] = &["list_tools", "list_prompts", "list_resources"];

/// Actions that take a parameter mapping.
const PARAMETERIZED_ACTIONS: &[&str] = &["call_tool", "get_prompt", "read_resource"];

/// A parsed scenarios file.
#[derive(Debug, Deserialize)]
pub struct ScenariosFile {
    /// Schema version (`MAJOR.MINOR`).
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// URL of the real MCP server to record against.
    pub target: String,

    /// Redaction applied to every recorded cassette.
    #[serde(default)]
    pub redact: RedactConfig,

    /// Named scenarios, in file order.
    pub scenarios: IndexMap<String, Scenario>,
}

/// Redaction block of a scenarios file.
#[derive(Debug, Deserialize)]
pub struct RedactConfig {
    /// Strip the URL path from cassette metadata (on by default).
    #[serde(default = "default_true")]
    pub server_url: bool,

    /// Env var names whose values are redacted.
    #[serde(default)]
    pub env: Vec<String>,

    /// Regex patterns redacted from metadata + responses.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self { server_url: true, env: Vec::new(), patterns: Vec::new() }
    }
}

impl RedactConfig {
    fn to_options(&self) -> RedactOptions {
        RedactOptions {
            server_url: self.server_url,
            env: self.env.clone(),
            patterns: self.patterns.clone(),
        }
    }
}

/// One named scenario: a description plus an ordered action list.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Free-form description (unused by the runner).
    #[serde(default)]
    pub description: String,

    /// Actions executed in order through the recording client.
    pub actions: Vec<Action>,
}

/// A scenario action: either a bare name or a single-key parameter mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// `- list_tools`
    Simple(String),
    /// `- call_tool: {name: add, arguments: {a: 1}}`
    Parameterized(IndexMap<String, Value>),
}

#[derive(Debug, Deserialize)]
struct ToolCallAction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct PromptGetAction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceReadAction {
    uri: String,
}

fn default_schema_version() -> String {
    SCENARIOS_FORMAT_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn supported_actions() -> String {
    let mut all: Vec<&str> =
        SIMPLE_ACTIONS.iter().chain(PARAMETERIZED_ACTIONS.iter()).copied().collect();
    all.sort_unstable();
    all.join(", ")
}

/// Parse and validate a YAML scenarios file.
pub fn load_scenarios_file(path: &Path) -> Result<ScenariosFile, ScenarioError> {
    let raw = std::fs::read_to_string(path)?;
    let file: ScenariosFile = serde_yaml::from_str(&raw)?;

    let expected_major =
        SCENARIOS_FORMAT_VERSION.split('.').next().unwrap_or(SCENARIOS_FORMAT_VERSION);
    if file.schema_version.split('.').next() != Some(expected_major) {
        return Err(ScenarioError::SchemaVersion {
            found: file.schema_version,
            expected: format!("{expected_major}.x"),
        });
    }
    Ok(file)
}

/// Execute a single scenario action against the MCP client.
pub async fn execute_action(client: &mut McpClient, action: &Action) -> Result<(), ScenarioError> {
    match action {
        Action::Simple(name) => match name.as_str() {
            "list_tools" => {
                client.list_tools().await?;
            }
            "list_prompts" => {
                client.list_prompts().await?;
            }
            "list_resources" => {
                client.list_resources().await?;
            }
            other => {
                return Err(ScenarioError::UnknownAction {
                    name: other.to_string(),
                    supported: supported_actions(),
                });
            }
        },
        Action::Parameterized(map) => {
            if map.len() != 1 {
                return Err(ScenarioError::InvalidAction { got: format!("{map:?}") });
            }
            let (name, params) = map
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v.clone()))
                .unwrap_or(("", Value::Null));
            match name {
                "call_tool" => {
                    let parsed: ToolCallAction = serde_json::from_value(params)?;
                    let arguments = if parsed.arguments.is_null() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        parsed.arguments
                    };
                    client.call_tool(&parsed.name, arguments).await?;
                }
                "get_prompt" => {
                    let parsed: PromptGetAction = serde_json::from_value(params)?;
                    client.get_prompt(&parsed.name, parsed.arguments).await?;
                }
                "read_resource" => {
                    let parsed: ResourceReadAction = serde_json::from_value(params)?;
                    client.read_resource(&parsed.uri).await?;
                }
                other => {
                    return Err(ScenarioError::UnknownAction {
                        name: other.to_string(),
                        supported: supported_actions(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Run all scenarios, writing `<name>.json` per scenario. Returns
/// `(name, interaction_count)` pairs in file order.
pub async fn run_scenarios(
    file: &ScenariosFile,
    output_dir: &Path,
) -> anyhow::Result<Vec<(String, usize)>> {
    let mut results = Vec::with_capacity(file.scenarios.len());
    for (name, scenario) in &file.scenarios {
        let output_path = output_dir.join(format!("{name}.json"));
        let count = run_single_scenario(name, scenario, &file.target, &output_path, &file.redact)
            .await?;
        results.push((name.clone(), count));
    }
    Ok(results)
}

/// Record one scenario through a fresh proxy. Returns the number of
/// interactions captured.
async fn run_single_scenario(
    name: &str,
    scenario: &Scenario,
    target: &str,
    output_path: &Path,
    redact: &RedactConfig,
) -> anyhow::Result<usize> {
    tracing::info!(scenario = %name, description = %scenario.description, "recording scenario");

    let mut session = RecordSession::start(target, output_path, redact.to_options()).await?;
    for action in &scenario.actions {
        execute_action(session.client(), action).await?;
    }
    let cassette = session.finish().await?;

    tracing::info!(
        scenario = %name,
        output = %output_path.display(),
        interactions = cassette.interactions.len(),
        "scenario recorded"
    );
    Ok(cassette.interactions.len())
}

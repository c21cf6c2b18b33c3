//! mcp-cassette — record, replay, and verify MCP server interactions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_cassette::cassette::{Cassette, load_cassette, save_cassette};
use mcp_cassette::config::serve as serve_config;
use mcp_cassette::matcher::create_matcher;
use mcp_cassette::proxy::{create_proxy_app, share_cassette};
use mcp_cassette::replay::{ReplayOptions, create_replay_app_with_options, share_matcher};
use mcp_cassette::scenarios::{load_scenarios_file, run_scenarios};
use mcp_cassette::scrubber::{RedactOptions, scrub_cassette};
use mcp_cassette::serve::spawn_server;
use mcp_cassette::verify::{apply_updates, run_verify};

#[derive(Parser, Debug)]
#[command(name = "mcp-cassette")]
#[command(about = "Record, replay, and verify MCP server interactions for deterministic testing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record interactions from a live MCP server until interrupted
    Record {
        /// URL of the real MCP server
        #[arg(long)]
        target: String,

        /// Local proxy port
        #[arg(long, default_value_t = serve_config::DEFAULT_PORT)]
        port: u16,

        /// Output cassette file
        #[arg(long, default_value = "recording.json")]
        output: PathBuf,

        /// Disable automatic server-URL redaction
        #[arg(long)]
        no_redact: bool,

        /// Env var names whose values are redacted from the cassette
        #[arg(long = "redact-env", value_name = "VAR")]
        redact_env: Vec<String>,

        /// Additional regex patterns to redact
        #[arg(long = "redact-patterns", value_name = "REGEX")]
        redact_patterns: Vec<String>,
    },

    /// Record cassettes from a YAML scenarios file
    RecordScenarios {
        /// Path to the scenarios file
        #[arg(long)]
        scenarios: PathBuf,

        /// Directory that receives one cassette per scenario
        #[arg(long, default_value = "cassettes")]
        output_dir: PathBuf,
    },

    /// Start a mock server from a recorded cassette
    Replay {
        /// Path to the cassette file
        #[arg(long)]
        cassette: PathBuf,

        /// Local server port
        #[arg(long, default_value_t = serve_config::DEFAULT_PORT)]
        port: u16,

        /// Request matching strategy (method_params, sequential, strict)
        #[arg(long = "match", default_value = "method_params")]
        strategy: String,

        /// Replay with the original recorded timing
        #[arg(long)]
        simulate_latency: bool,
    },

    /// Replay recorded requests against a server and compare responses
    Verify {
        /// Path to the golden cassette file
        #[arg(long)]
        cassette: PathBuf,

        /// URL of the server to verify
        #[arg(long)]
        target: String,

        /// Field names ignored during comparison, at any depth
        #[arg(long = "ignore-fields", value_name = "FIELD")]
        ignore_fields: Vec<String>,

        /// Exact dot-paths ignored during comparison (e.g. $.result.ts)
        #[arg(long = "ignore-paths", value_name = "PATH")]
        ignore_paths: Vec<String>,

        /// Update the cassette with the live server's responses
        #[arg(long)]
        update: bool,
    },

    /// Pretty-print a cassette summary
    Inspect {
        /// Path to the cassette file
        cassette: PathBuf,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Command::Record { target, port, output, no_redact, redact_env, redact_patterns } => {
            record(target, port, output, no_redact, redact_env, redact_patterns).await
        }
        Command::RecordScenarios { scenarios, output_dir } => {
            record_scenarios(&scenarios, &output_dir).await
        }
        Command::Replay { cassette, port, strategy, simulate_latency } => {
            replay(&cassette, port, &strategy, simulate_latency).await
        }
        Command::Verify { cassette, target, ignore_fields, ignore_paths, update } => {
            verify(&cassette, &target, ignore_fields, ignore_paths, update).await
        }
        Command::Inspect { cassette } => inspect(&cassette),
    }
}

async fn record(
    target: String,
    port: u16,
    output: PathBuf,
    no_redact: bool,
    redact_env: Vec<String>,
    redact_patterns: Vec<String>,
) -> anyhow::Result<()> {
    let cassette = share_cassette(Cassette::new(target.as_str()));
    let app = create_proxy_app(&target, cassette.clone())?;
    let server = spawn_server(app, port, serve_config::START_TIMEOUT).await?;

    println!("Recording from {target} on {} -> {}", server.url(), output.display());
    println!("Press Ctrl-C to stop and write the cassette.");
    tokio::signal::ctrl_c().await?;

    server.shutdown().await;

    let recorded =
        cassette.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
    let options =
        RedactOptions { server_url: !no_redact, env: redact_env, patterns: redact_patterns };
    let scrubbed = scrub_cassette(&recorded, &options);
    save_cassette(&scrubbed, &output)?;

    println!("Saved {} interactions to {}", scrubbed.interactions.len(), output.display());
    Ok(())
}

async fn record_scenarios(scenarios: &Path, output_dir: &Path) -> anyhow::Result<()> {
    let file = load_scenarios_file(scenarios)?;
    println!("Recording {} scenario(s) against {}", file.scenarios.len(), file.target);

    let results = run_scenarios(&file, output_dir).await?;
    for (name, count) in results {
        println!("  {name} -> {name}.json ({count} interactions)");
    }
    Ok(())
}

async fn replay(
    cassette_path: &Path,
    port: u16,
    strategy: &str,
    simulate_latency: bool,
) -> anyhow::Result<()> {
    let cassette = load_cassette(cassette_path)?;
    let matcher = share_matcher(create_matcher(strategy, &cassette.interactions)?);
    let app = create_replay_app_with_options(
        &cassette,
        matcher.clone(),
        ReplayOptions { simulate_latency },
    );
    let server = spawn_server(app, port, serve_config::START_TIMEOUT).await?;

    println!(
        "Replaying {} on {} (match={strategy})",
        cassette_path.display(),
        server.mcp_url()
    );
    println!("Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    server.shutdown().await;

    let matcher = matcher.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let stats = matcher.stats();
    println!("Consumed {}/{} recorded requests.", stats.matched(), stats.total());
    if !matcher.unmatched_requests().is_empty() {
        println!("Unmatched requests:");
        for body in matcher.unmatched_requests() {
            let method = body.get("method").and_then(|m| m.as_str()).unwrap_or("?");
            println!("  {method}");
        }
    }
    Ok(())
}

async fn verify(
    cassette_path: &Path,
    target: &str,
    ignore_fields: Vec<String>,
    ignore_paths: Vec<String>,
    update: bool,
) -> anyhow::Result<()> {
    let mut cassette = load_cassette(cassette_path)?;
    let ignore_fields: HashSet<String> = ignore_fields.into_iter().collect();
    let ignore_paths: HashSet<String> = ignore_paths.into_iter().collect();

    println!("Verifying {} against {target}", cassette_path.display());
    let result = run_verify(&cassette, target, &ignore_fields, &ignore_paths).await?;

    for outcome in &result.results {
        let mark = if outcome.passed { "pass" } else { "FAIL" };
        println!("[{}] {} ... {mark}", outcome.index, outcome.method);
        for line in &outcome.diff {
            println!("{line}");
        }
    }
    println!("{} passed, {} failed, {} total", result.passed, result.failed, result.total);

    if update && result.failed > 0 {
        let updated = apply_updates(&mut cassette, &result);
        save_cassette(&cassette, cassette_path)?;
        println!("Updated {updated} response(s) in {}", cassette_path.display());
        return Ok(());
    }

    if result.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn inspect(cassette_path: &Path) -> anyhow::Result<()> {
    let cassette = load_cassette(cassette_path)?;
    let (requests, notifications, lifecycle) = cassette.type_counts();

    let file_name =
        cassette_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    println!("{file_name}");
    println!("  recorded_at:      {}", cassette.metadata.recorded_at);
    println!("  server_url:       {}", cassette.metadata.server_url);
    println!(
        "  protocol_version: {}",
        cassette.metadata.protocol_version.as_deref().unwrap_or("-")
    );
    if let Some(info) = &cassette.metadata.server_info {
        let name = info.get("name").and_then(|n| n.as_str()).unwrap_or("-");
        let version = info.get("version").and_then(|v| v.as_str()).unwrap_or("-");
        println!("  server:           {name} {version}");
    }
    println!(
        "  interactions:     {requests} requests, {notifications} notification(s), \
         {lifecycle} lifecycle"
    );
    println!();

    for (idx, interaction) in cassette.interactions.iter().enumerate() {
        println!("  [{}] {}", idx + 1, interaction.summary());
    }
    Ok(())
}

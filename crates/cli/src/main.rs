mod config;
mod replay;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use searchsync_core::{Change, PropagationTarget, Router};
use searchsync_engine::EngineConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Search index synchronization toolkit.
#[derive(Parser)]
#[command(
    name = "searchsync",
    version,
    about = "Keep a denormalized search index in step with its primary store"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine configuration file (TOML); falls back to SEARCHSYNC_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON change log against an in-memory primary store and index
    Replay {
        /// Path to the JSON array of replay steps
        file: PathBuf,
    },

    /// Show the index updates a change would produce, without applying them
    Route {
        /// Path to a JSON change, or an array of changes
        file: PathBuf,
    },

    /// Print the effective engine configuration
    Config {
        /// Only validate the configuration
        #[arg(long)]
        check: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = config::config_path(cli.config.as_deref());

    let engine_config = match config::load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };
    init_tracing(&engine_config.log_level, cli.quiet);

    match cli.command {
        Commands::Replay { file } => {
            cmd_replay(&file, engine_config, cli.output, cli.quiet);
        }
        Commands::Route { file } => {
            cmd_route(&file, &engine_config, cli.output, cli.quiet);
        }
        Commands::Config { check } => {
            cmd_config(&engine_config, check, cli.output, cli.quiet);
        }
    }
}

/// Structured logs go to stderr so command output stays machine-readable.
/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, quiet: bool) {
    let default = if quiet { "error" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            let msg = format!("failed to start async runtime: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn read_input(path: &Path, output: OutputFormat, quiet: bool) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

// ── Replay ───────────────────────────────────────────────────────────

fn cmd_replay(path: &Path, config: EngineConfig, output: OutputFormat, quiet: bool) {
    let content = read_input(path, output, quiet);
    let steps = match replay::parse_steps(&content) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error parsing replay steps in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let rt = runtime(output, quiet);
    let report = match rt.block_on(replay::replay(config, steps)) {
        Ok(r) => r,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => print_json(&report, output, quiet),
        OutputFormat::Text => {
            for out in &report.outputs {
                println!("[{}] {}", out.step, out.kind);
                println!("{}", pretty(&out.value));
            }
            if !quiet {
                println!(
                    "replayed {} steps: {} applied, {} failed, {} dropped",
                    report.steps, report.queue.applied, report.queue.failed, report.queue.dropped
                );
            }
        }
    }
}

// ── Route ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum ChangeInput {
    Many(Vec<Change>),
    One(Box<Change>),
}

#[derive(Serialize)]
struct RoutedChange {
    change: &'static str,
    entity: String,
    targets: Vec<PropagationTarget>,
}

fn cmd_route(path: &Path, config: &EngineConfig, output: OutputFormat, quiet: bool) {
    let content = read_input(path, output, quiet);
    let changes = match serde_json::from_str::<ChangeInput>(&content) {
        Ok(ChangeInput::Many(v)) => v,
        Ok(ChangeInput::One(c)) => vec![*c],
        Err(e) => {
            let msg = format!("error parsing change in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let router = Router::new(config.routing_table());
    let mut routed = Vec::with_capacity(changes.len());
    for change in &changes {
        match router.route(change) {
            Ok(targets) => routed.push(RoutedChange {
                change: change.kind(),
                entity: change.subject().to_string(),
                targets,
            }),
            Err(e) => {
                let msg = format!("cannot route {} of {}: {}", change.kind(), change.subject(), e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        }
    }

    match output {
        OutputFormat::Json => print_json(&routed, output, quiet),
        OutputFormat::Text => {
            for r in &routed {
                println!("{} {}: {} target(s)", r.change, r.entity, r.targets.len());
                for t in &r.targets {
                    println!("  {}", t.describe());
                }
            }
        }
    }
}

// ── Config ───────────────────────────────────────────────────────────

fn cmd_config(config: &EngineConfig, check: bool, output: OutputFormat, quiet: bool) {
    if check {
        match output {
            OutputFormat::Json => println!("{{\"valid\": true}}"),
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "configuration is valid: {} indexes, queue capacity {}",
                        config.indexes.len(),
                        config.queue_capacity
                    );
                }
            }
        }
        return;
    }
    match output {
        OutputFormat::Json => print_json(config, output, quiet),
        OutputFormat::Text => match toml::to_string_pretty(config) {
            Ok(s) => print!("{}", s),
            Err(e) => {
                let msg = format!("failed to render configuration: {}", e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        },
    }
}

// ── Output helpers ───────────────────────────────────────────────────

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T, output: OutputFormat, quiet: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            let msg = format!("failed to serialize output: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

/// Report an error to stderr, as plain text or a JSON object.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

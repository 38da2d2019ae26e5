use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;
use tracelens_core::contract;
use tracelens_core::dispatch_event;
use tracelens_core::load_recording;
use tracelens_core::Message;
use tracelens_core::MessageLog;
use tracelens_core::MessageRole;
use tracelens_core::ReducerConfig;
use tracelens_core::SessionState;
use tracing::debug;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tracelens")]
#[command(version, about = "Replay recorded trace-analysis streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fold a JSONL recording through the reducer and print the messages.
    Replay {
        file: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Synthetic clock step for records without `receivedAtMs`.
        #[arg(long, default_value_t = 250)]
        step_ms: i64,
        #[arg(long)]
        json: bool,
    },
    /// Render a conclusion contract JSON file.
    Contract {
        file: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            file,
            config,
            step_ms,
            json,
        } => replay(&file, config.as_deref(), step_ms, json),
        Command::Contract { file, config } => render_contract(&file, config.as_deref()),
    }
}

/// `--config` wins; otherwise `<config_dir>/tracelens/config.toml` when it
/// exists; otherwise defaults.
fn load_config(explicit: Option<&Path>) -> Result<ReducerConfig> {
    if let Some(path) = explicit {
        return ReducerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    let Some(path) = dirs::config_dir().map(|dir| dir.join("tracelens").join("config.toml")) else {
        return Ok(ReducerConfig::default());
    };
    if !path.exists() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(ReducerConfig::default());
    }
    ReducerConfig::load(&path).with_context(|| format!("loading config {}", path.display()))
}

fn replay(file: &Path, config: Option<&Path>, step_ms: i64, json: bool) -> Result<()> {
    let config = load_config(config)?;
    let events = load_recording(file, step_ms)
        .with_context(|| format!("reading recording {}", file.display()))?;

    let mut state = SessionState::new(config);
    let mut log = MessageLog::new();
    info!(session_id = %state.session_id, events = events.len(), "replay started");

    let mut dispatched = 0usize;
    for event in &events {
        let outcome = dispatch_event(&mut state, event);
        log.apply_all(outcome.effects);
        dispatched += 1;
        if outcome.is_terminal {
            break;
        }
    }
    if dispatched < events.len() {
        info!(skipped = events.len() - dispatched, "records after terminal event not replayed");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(log.messages())?);
    } else {
        for message in log.messages() {
            print_message(message);
        }
    }
    Ok(())
}

fn print_message(message: &Message) {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };
    let tag = message
        .flow_tag
        .map(|tag| format!(" [{}]", tag.label()))
        .unwrap_or_default();
    println!("── {} · {role}{tag}", message.id);
    println!("{}", message.content);
    if let Some(table) = &message.table {
        println!("{}", table.columns.join(" | "));
        for row in &table.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            println!("{}", cells.join(" | "));
        }
    }
    if let Some(url) = &message.report_url {
        println!("report: {url}");
    }
    println!();
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn render_contract(file: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing contract {}", file.display()))?;
    println!("{}", contract::render_contract(&value, &config.contract));
    Ok(())
}

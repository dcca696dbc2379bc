use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scene_wm::actor::scene_manager::{Record, Reply, Request, SceneManager, replay};
use scene_wm::common::config::{Config, config_file};
use scene_wm::common::error::ErrorCode;
use scene_wm::common::log;
use serde::Serialize;
use tracing::{info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
struct Cli {
    /// Path to configuration file to use (overrides default).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Check whether the configuration can be loaded and is consistent, then
    /// exit.
    #[arg(long)]
    validate: bool,

    /// Record every request to the specified file path. Overwrites the file
    /// if it exists.
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recorded request file against a headless manager and print the
    /// resulting sessions.
    Replay { file: PathBuf },
}

/// One line of output for a request read from stdin.
#[derive(Serialize)]
struct Outcome {
    code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() {
    sigpipe::reset();
    let opt = Cli::parse();
    log::init_logging();

    if let Err(e) = run(opt) {
        eprintln!("scene-wm: {e:#}");
        process::exit(1);
    }
}

fn run(opt: Cli) -> anyhow::Result<()> {
    let config_path = opt.config.clone().unwrap_or_else(config_file);
    let config = Config::read_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    config.ensure_valid()?;
    if opt.validate {
        println!("Config validation passed");
        return Ok(());
    }

    let (manager, _render) = SceneManager::headless(config);
    let result = match &opt.command {
        Some(Commands::Replay { file }) => run_replay(&manager, file),
        None => {
            manager.set_record(Record::new(opt.record.as_deref())?);
            serve_stdin(&manager)
        }
    };
    manager.shutdown();
    result
}

fn run_replay(manager: &SceneManager, file: &Path) -> anyhow::Result<()> {
    let codes = replay(file, manager)?;
    let failed = codes.iter().filter(|c| **c != ErrorCode::Ok).count();
    info!(requests = codes.len(), failed, "replay finished");
    if let Err(e) = manager.wait_idle(IDLE_TIMEOUT) {
        warn!(%e, "queues did not drain after replay");
    }
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &manager.snapshots())?;
    writeln!(out)?;
    Ok(())
}

/// Reads one RON request per line and answers each with one JSON line.
fn serve_stdin(manager: &SceneManager) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match ron::de::from_str::<Request>(&line) {
            Ok(request) => {
                let result = manager.dispatch(request);
                let code = ErrorCode::of(&result);
                match result {
                    Ok(reply) => Outcome { code, reply: Some(reply), error: None },
                    Err(e) => Outcome { code, reply: None, error: Some(e.to_string()) },
                }
            }
            Err(e) => Outcome {
                code: ErrorCode::InvalidParameter,
                reply: None,
                error: Some(format!("unparseable request: {e}")),
            },
        };
        serde_json::to_writer(&mut out, &outcome)?;
        writeln!(out)?;
        out.flush()?;
    }
    Ok(())
}

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use sluice_config::PipelineDef;
use sluice_engine::{LocalExecutor, PipelineRunner, Session, SessionConfig};

/// Sluice - a dataflow pipeline runner
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline
  Run {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,

    /// Directory holding task work directories
    #[arg(long, default_value = "work")]
    work_dir: PathBuf,

    /// Maximum number of tasks running at once (default: number of cores)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Never reuse results from previous runs
    #[arg(long)]
    no_cache: bool,

    /// Resume a previous session, reusing its cached tasks
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<Uuid>,
  },

  /// Validate a pipeline without running it
  Check {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      pipeline_file,
      work_dir,
      pool_size,
      no_cache,
      resume,
    }) => {
      let config = SessionConfig {
        session_id: resume,
        pool_size,
        cache_enabled: !no_cache,
        work_dir,
      };
      run_pipeline(pipeline_file, config)?;
    }
    Some(Commands::Check { pipeline_file }) => {
      check_pipeline(pipeline_file)?;
    }
    None => {
      println!("sluice - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_pipeline(pipeline_file: PathBuf, config: SessionConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_pipeline_async(pipeline_file, config).await })
}

async fn run_pipeline_async(pipeline_file: PathBuf, config: SessionConfig) -> Result<()> {
  let mut pipeline = load_pipeline(&pipeline_file).await?;

  // Params from stdin override those in the file
  let overrides = read_params_from_stdin()?;
  pipeline.params.extend(overrides);

  let session = Arc::new(Session::new(config));
  eprintln!("Loaded pipeline: {}", pipeline.name);
  eprintln!("Session: {} (resume with --resume {})", session.id(), session.id());

  let runner = PipelineRunner::new(session, Arc::new(LocalExecutor::new()));

  let cancel = CancellationToken::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupt received, stopping pipeline");
      ctrl_c.cancel();
    }
  });

  let result = runner
    .run(&pipeline, cancel)
    .await
    .context("pipeline execution failed")?;

  for report in &result.reports {
    eprintln!(
      "  {}: {} task(s), {} cached, {} failed",
      report.process, report.firings, report.cached, report.failed
    );
  }

  // Print leftover channels as JSON
  let output: serde_json::Map<String, serde_json::Value> = result
    .channels
    .iter()
    .map(|(name, items)| {
      (
        name.clone(),
        serde_json::Value::Array(items.iter().map(|i| i.to_json()).collect()),
      )
    })
    .collect();

  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn check_pipeline(pipeline_file: PathBuf) -> Result<()> {
  let content = std::fs::read_to_string(&pipeline_file)
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;
  let pipeline: PipelineDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))?;

  let processes = PipelineRunner::build(&pipeline).context("pipeline is invalid")?;
  eprintln!(
    "Pipeline '{}' is valid: {} process(es), {} channel(s)",
    pipeline.name,
    processes.len(),
    pipeline.channels.len()
  );
  Ok(())
}

async fn load_pipeline(pipeline_file: &Path) -> Result<PipelineDef> {
  let content = tokio::fs::read_to_string(pipeline_file)
    .await
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))
}

fn read_params_from_stdin() -> Result<serde_json::Map<String, serde_json::Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read params from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::Map::new())
  } else {
    serde_json::from_str(&input).context("failed to parse params JSON from stdin")
  }
}

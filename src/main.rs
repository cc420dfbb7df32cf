//! Sensor Window Engine CLI
//!
//! Runs the segment worker and inspects stored windows.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sensor_window_engine::{
    channels::CHEST_CHANNELS, Config, KvStore, Pipeline, PipelineError, SensorSegment, Window,
    VERSION,
};

#[derive(Parser)]
#[command(name = "sensor-window")]
#[command(version = VERSION)]
#[command(about = "Sliding-window feature extraction and inference for sensor streams", long_about = None)]
struct Cli {
    /// Override the window store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process JSON-lines sensor segments until input ends or Ctrl+C
    Run {
        /// Read segments from this file instead of stdin
        #[arg(long, short)]
        input: Option<PathBuf>,
    },

    /// Show a user's buffered window
    Inspect {
        user_id: String,
    },

    /// List users with a stored window
    Users,

    /// Delete a user's stored window
    Forget {
        user_id: String,
    },

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load().context("loading configuration")?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    match cli.command {
        Commands::Run { input } => cmd_run(&config, input),
        Commands::Inspect { user_id } => cmd_inspect(&config, &user_id),
        Commands::Users => cmd_users(&config),
        Commands::Forget { user_id } => cmd_forget(&config, &user_id),
        Commands::Config => cmd_config(&config),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn cmd_run(config: &Config, input: Option<PathBuf>) -> Result<()> {
    config.ensure_directories()?;

    let mut pipeline =
        Pipeline::from_config(config, CHEST_CHANNELS).context("starting pipeline")?;
    tracing::info!(
        version = VERSION,
        instance_id = %uuid::Uuid::new_v4(),
        store = %config.store_path.display(),
        window_size_secs = config.window_size_secs,
        overlap_size_secs = config.overlap_size_secs,
        "worker started"
    );

    // Ctrl+C stops intake; the segment in flight still completes and persists.
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let receiver = spawn_reader(input)?;

    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(segment) => match pipeline.process_segment(&segment) {
                Ok(outcome) => {
                    for result in &outcome.results {
                        println!(
                            "{}",
                            serde_json::json!({
                                "user_id": result.features.user_id,
                                "timestamp": result.features.timestamp,
                                "label": result.prediction.label,
                                "score": result.prediction.score,
                            })
                        );
                    }
                }
                Err(PipelineError::Model { user_id, source }) => {
                    tracing::error!(%user_id, timestamp = segment.timestamp, "inference failed: {source}");
                }
                Err(e) => {
                    tracing::error!("stopping: {e}");
                    break;
                }
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                tracing::info!("input closed");
                break;
            }
        }
    }

    let summary = pipeline.stats().summary();
    pipeline.shutdown().context("shutting down pipeline")?;
    eprintln!("{summary}");
    Ok(())
}

/// Decode JSON-lines segments on a background thread.
fn spawn_reader(input: Option<PathBuf>) -> Result<crossbeam_channel::Receiver<SensorSegment>> {
    let reader: Box<dyn BufRead + Send> = match input {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    let (sender, receiver) = crossbeam_channel::bounded(1_000);
    thread::spawn(move || {
        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SensorSegment>(&line) {
                Ok(segment) => {
                    if sender.send(segment).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(line = line_no + 1, "undecodable segment: {e}"),
            }
        }
    });
    Ok(receiver)
}

fn open_store(config: &Config) -> Result<KvStore<Window>> {
    KvStore::open(&config.store_path)
        .with_context(|| format!("opening store {}", config.store_path.display()))
}

fn cmd_inspect(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config)?;
    match store.get(user_id)? {
        Some(window) => {
            println!("Window for {user_id}");
            println!("  Last timestamp: {:?}", window.last_timestamp);
            for descriptor in CHEST_CHANNELS {
                let count = window.sample_count(descriptor.name);
                let secs = count as f64 / descriptor.rate_hz as f64;
                println!("  {:<12} {:>8} samples ({secs:.2}s)", descriptor.name, count);
            }
        }
        None => println!("No window stored for {user_id}"),
    }
    store.close()?;
    Ok(())
}

fn cmd_users(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    for key in store.keys()? {
        println!("{key}");
    }
    store.close()?;
    Ok(())
}

fn cmd_forget(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config)?;
    store
        .delete(user_id)
        .with_context(|| format!("forgetting {user_id}"))?;
    store.close()?;
    println!("Deleted window for {user_id}");
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}

//! # Media Compressor - Main Entry Point
//!
//! Punto di ingresso della CLI.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti con `clap` (sottocomandi `scan`, `run`, `encoders`)
//! - Inizializzazione del logging con `tracing` (INFO, DEBUG con `--verbose`, `RUST_LOG` prevale)
//! - Caricamento configurazione e override da riga di comando
//! - Comandi da stdin (`pause`, `resume`, `stop`) e Ctrl-C → stop
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-compressor scan /photos
//! media-compressor run /photos /photos-small --quality 80 --hardware nvidia --exclude 3 7
//! media-compressor run /photos /photos-small --resume --json
//! media-compressor encoders
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_compressor::encoders::{EncoderCatalog, CONTAINERS};
use media_compressor::file_manager::FileManager;
use media_compressor::platform::EngineTools;
use media_compressor::progress::ProgressManager;
use media_compressor::{
    CheckpointStore, Command, CompressionOrchestrator, Config, FileCatalog, HardwareClass, RunController,
    RunEvent, RunSummary, SizeEstimator,
};

#[derive(Parser)]
#[command(name = "media-compressor")]
#[command(about = "Batch-compress images and videos with pause/resume and crash-safe checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List the files of a directory with their estimated compressed size
    Scan {
        source: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },

    /// Compress a directory into a target directory
    Run(RunArgs),

    /// Show which encoders the engine supports and how each container resolves
    Encoders {
        #[command(flatten)]
        settings: Settings,
    },
}

#[derive(Args)]
struct Settings {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Video CRF (0-51, lower = better quality)
    #[arg(long)]
    crf: Option<u8>,

    /// Hardware mode: cpu, nvidia or amd
    #[arg(long)]
    hardware: Option<HardwareClass>,

    /// Write every video with this container extension (e.g. .mp4)
    #[arg(long)]
    container: Option<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct RunArgs {
    source: PathBuf,
    target: PathBuf,

    #[command(flatten)]
    settings: Settings,

    /// Catalog indices to exclude (as listed by `scan`)
    #[arg(long, num_args = 1..)]
    exclude: Vec<usize>,

    /// Only compress these catalog indices
    #[arg(long, num_args = 1..)]
    select: Vec<usize>,

    /// Continue from the saved checkpoint
    #[arg(long)]
    resume: bool,

    /// Checkpoint file (default: ~/.media-compressor/checkpoint.json)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Emit JSON lines instead of a progress bar
    #[arg(long)]
    json: bool,
}

impl Settings {
    async fn load(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::from_file(path).await?,
            None => Config::default(),
        };

        if let Some(quality) = self.quality {
            config.photo_quality = quality;
        }
        if let Some(crf) = self.crf {
            config.video_crf = crf;
        }
        if let Some(hardware) = self.hardware {
            config.hardware_mode = hardware;
        }
        if let Some(ref container) = self.container {
            let container = container.to_ascii_lowercase();
            config.video_container = Some(if container.starts_with('.') {
                container
            } else {
                format!(".{}", container)
            });
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        CliCommand::Scan { source, settings } => scan(&source, &settings).await,
        CliCommand::Run(args) => run(args).await,
        CliCommand::Encoders { settings } => encoders(&settings).await,
    }
}

async fn scan(source: &Path, settings: &Settings) -> Result<()> {
    let config = settings.load().await?;
    let tools = EngineTools::locate(&config);
    let estimator = SizeEstimator::new(&tools.ffprobe);

    let spinner = ProgressManager::spinner("Scanning and estimating...");
    let catalog = FileCatalog::scan(source, &config, Some(&estimator)).await;
    spinner.finish_and_clear();
    let catalog = catalog?;

    for (index, file) in catalog.snapshot().iter().enumerate() {
        println!(
            "{:>5} {} {:<6} {:>10} → {:>10}  {}",
            index,
            if catalog.is_excluded(index) { "x" } else { " " },
            format!("{:?}", file.kind).to_lowercase(),
            FileManager::format_size(file.original_size),
            FileManager::format_size(file.estimated_size),
            file.relative_path().display()
        );
    }

    let totals = catalog.totals();
    println!(
        "\n{} files ({} excluded): {} → ~{} ({:.1}% estimated saving)",
        totals.files,
        totals.excluded_files,
        FileManager::format_size(totals.included_original),
        FileManager::format_size(totals.included_estimated),
        FileManager::calculate_reduction(totals.included_original, totals.included_estimated)
    );
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.settings.load().await?;
    let store = match args.checkpoint {
        Some(ref path) => CheckpointStore::new(path),
        None => CheckpointStore::default_location(),
    };

    let restored = if args.resume {
        match store.load().await {
            Some(checkpoint) => {
                if checkpoint.source_dir != args.source || checkpoint.target_dir != args.target {
                    anyhow::bail!(
                        "Checkpoint belongs to {} → {}, not {} → {}",
                        checkpoint.source_dir.display(),
                        checkpoint.target_dir.display(),
                        args.source.display(),
                        args.target.display()
                    );
                }
                Some(CompressionOrchestrator::restore(config.clone(), &checkpoint)?)
            }
            None => {
                warn!("No usable checkpoint at {}, starting fresh", store.path().display());
                None
            }
        }
    } else {
        None
    };

    let (orchestrator, selection) = match restored {
        Some((orchestrator, selection)) => (orchestrator, Some(selection)),
        None => {
            let tools = EngineTools::locate(&config);
            let estimator = SizeEstimator::new(&tools.ffprobe);
            let catalog = FileCatalog::scan(&args.source, &config, Some(&estimator))
                .await
                .with_context(|| format!("Cannot scan {}", args.source.display()))?;
            for &index in &args.exclude {
                catalog.exclude(index)?;
            }
            let selection = (!args.select.is_empty()).then(|| args.select.clone());
            let orchestrator = CompressionOrchestrator::new(config, Arc::new(catalog), &args.target)?;
            (orchestrator, selection)
        }
    };
    let orchestrator = orchestrator.with_checkpoint_store(store);

    let events = orchestrator.subscribe();
    let handle = match orchestrator.start(selection.as_deref()).await {
        Ok(handle) => handle,
        Err(e) => {
            if args.json {
                RunEvent::error(e.to_string()).emit();
            }
            return Err(e.into());
        }
    };

    spawn_command_reader(handle.controller());
    spawn_ctrl_c(handle.controller());

    let reporter = if args.json {
        tokio::spawn(emit_json(events))
    } else {
        let progress = ProgressManager::new(handle.snapshot().total as u64);
        tokio::spawn(async move {
            progress.follow(events).await;
        })
    };

    let summary = handle.wait().await?;
    let _ = reporter.await;

    if !args.json {
        print_summary(&summary, orchestrator.target_root());
    }
    Ok(())
}

async fn emit_json(mut events: tokio::sync::broadcast::Receiver<RunEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(event) => {
                event.emit();
                if matches!(event, RunEvent::Finished(_)) {
                    return;
                }
            }
            Err(RecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Read `pause` / `resume` / `stop` lines from stdin.
///
/// Runs on a detached thread: a blocking read inside the runtime would keep
/// it alive after the run ends.
fn spawn_command_reader(controller: RunController) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if !controller.send(command) {
                        break;
                    }
                }
                Err(e) => warn!("{} (expected pause, resume or stop)", e),
            }
        }
    });
}

fn spawn_ctrl_c(controller: RunController) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            controller.stop();
        }
    });
}

fn print_summary(summary: &RunSummary, target: &Path) {
    info!("📊 {}", summary.format_summary());
    info!(
        "📦 {} → {} (ratio {:.2}) in {:.1}s",
        FileManager::format_size(summary.original_bytes),
        FileManager::format_size(summary.compressed_bytes),
        summary.ratio,
        summary.elapsed_seconds
    );
    if summary.stopped {
        info!(
            "⏹️ Stopped. Continue with: media-compressor run <source> {} --resume",
            target.display()
        );
    }
}

async fn encoders(settings: &Settings) -> Result<()> {
    let config = settings.load().await?;
    let tools = EngineTools::locate(&config);
    if !tools.is_available() {
        warn!("Engine not found: {}", tools.ffmpeg.display());
    }

    let catalog = EncoderCatalog::new();
    let available = catalog.probe_available(&tools.ffmpeg).await;
    println!("Engine: {}", tools.ffmpeg.display());
    for class in [HardwareClass::Cpu, HardwareClass::Nvidia, HardwareClass::Amd] {
        let names: Vec<&str> = catalog.available_for(class).iter().map(|e| e.name).collect();
        println!("  {:<7} {}", class, if names.is_empty() { "-".to_string() } else { names.join(", ") });
    }
    if available.is_empty() {
        println!("No usable video encoders: video files will fail");
        return Ok(());
    }

    println!("\nResolution for hardware mode {}:", config.hardware_mode);
    for container in CONTAINERS {
        match catalog.resolve(container.extension, config.hardware_mode, &config) {
            Ok(resolution) => println!(
                "  {:<6} {}{}",
                container.extension,
                resolution.encoder.name,
                if resolution.downgraded() { " (cpu fallback)" } else { "" }
            ),
            Err(e) => println!("  {:<6} {}", container.extension, e),
        }
    }
    Ok(())
}

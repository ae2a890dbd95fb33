//! dmk-hd (Danmaku Highlight Detector) - command-line entry point
//!
//! Scans a folder of recorder danmaku exports, or analyzes a single file, and prints the
//! ranked highlight windows. An external scheduler (cron, systemd timer) decides when to run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dmk_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, write_toml_config,
    ConfigResolver, TomlConfig,
};
use dmk_hd::{HighlightPipeline, LocalFileSource, PipelineConfig, RecordingAnalysis, ScanReport};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dmk-hd
#[derive(Parser, Debug)]
#[command(name = "dmk-hd")]
#[command(about = "Danmaku highlight detector")]
#[command(version)]
struct Args {
    /// Config file (TOML); defaults to DMK_CONFIG, then the platform config dir
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Window size in seconds
    #[arg(long, global = true)]
    window: Option<f64>,

    /// Step between windows in seconds
    #[arg(long, global = true)]
    step: Option<f64>,

    /// Peaks to keep per recording
    #[arg(long, global = true)]
    top: Option<usize>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a folder tree and rank highlights for every recording
    Scan {
        /// Root folder (defaults to DMK_ROOT_FOLDER, then scan.root_folder)
        root: Option<PathBuf>,
    },
    /// Analyze a single danmaku XML file
    Analyze { file: PathBuf },
    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = ConfigResolver::new().with_cli_path(args.config.clone());
    let level = resolver
        .config_path()
        .and_then(|path| load_toml_config(&path).ok())
        .map(|config| config.logging.level)
        .unwrap_or_else(|| "info".to_string());

    // Initialize tracing (RUST_LOG wins over the configured level)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting dmk-hd v{}", env!("CARGO_PKG_VERSION"));

    if let Command::InitConfig { force } = &args.command {
        return init_config(args.config.clone(), *force);
    }

    let mut config = resolver.resolve();
    apply_overrides(&mut config, &args);

    let pipeline = HighlightPipeline::new(
        Arc::new(LocalFileSource::new()),
        PipelineConfig::from(&config),
    )
    .context("Invalid analysis settings")?;

    match &args.command {
        Command::Scan { root } => {
            let root = resolve_root_folder(root.as_deref(), &config);
            info!("Scan root: {}", root.display());

            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

            let report = pipeline
                .scan_and_analyze(&root.to_string_lossy(), &cancel)
                .await
                .with_context(|| format!("Failed to scan {}", root.display()))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Analyze { file } => {
            let analysis = pipeline
                .analyze_file(&file.to_string_lossy())
                .await
                .with_context(|| format!("Failed to analyze {}", file.display()))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_analysis(&analysis);
            }
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn apply_overrides(config: &mut TomlConfig, args: &Args) {
    if let Some(window) = args.window {
        config.analysis.window_size_secs = window;
    }
    if let Some(step) = args.step {
        config.analysis.step_size_secs = step;
    }
    if let Some(top) = args.top {
        config.analysis.max_peaks = top;
    }
}

fn init_config(cli_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match cli_path.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No platform config directory; pass --config"),
    };

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    write_toml_config(&TomlConfig::default(), &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if signal::ctrl_c().await.is_ok() {
        warn!("Ctrl+C received, cancelling scan");
        cancel.cancel();
    }
}

fn print_report(report: &ScanReport) {
    println!(
        "Scanned {}: {} analyzed, {} failed, {} total{}",
        report.root,
        report.progress.succeeded,
        report.progress.failed,
        report.progress.total,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    for analysis in &report.results {
        println!();
        print_analysis(analysis);
    }

    if !report.failures.is_empty() || !report.skipped_dirs.is_empty() {
        println!();
        println!("Skipped:");
        for failure in report.failures.iter().chain(&report.skipped_dirs) {
            println!("  {}: {}", failure.path, failure.error);
        }
    }
}

fn print_analysis(analysis: &RecordingAnalysis) {
    let recording = &analysis.recording;
    let metadata = &recording.metadata;

    println!("{}", recording.source);
    if let Some(title) = &metadata.title {
        println!("  title:    {}", title);
    }
    if let Some(channel) = &metadata.channel {
        println!("  channel:  {}", channel);
    }
    if let Some(date) = &metadata.recording_date {
        println!("  date:     {}", date);
    }
    println!(
        "  messages: {} ({} users, {:.1}/min over {:.0}s)",
        analysis.stats.total_messages,
        analysis.stats.unique_users,
        analysis.stats.messages_per_minute,
        recording.duration
    );

    if analysis.peaks.is_empty() {
        println!("  no peaks");
        return;
    }
    for (rank, peak) in analysis.peaks.iter().enumerate() {
        println!(
            "  #{:<2} {:>8.1}s - {:>8.1}s  count={:<4} avg_len={:<5.1} position={:?}  {}",
            rank + 1,
            peak.start_time,
            peak.end_time,
            peak.count,
            peak.average_content_length,
            peak.dominant_position,
            peak.start_absolute_time.to_rfc3339()
        );
    }
}

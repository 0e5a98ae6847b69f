//! CLI commands using clap

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humansize::{BINARY, format_size};
use std::path::PathBuf;
use std::sync::Arc;

use super::progress::ProgressReporter;
use crate::application::{RecoveryEngine, TracingLogger, summarize};
use crate::config::EngineConfig;
use crate::domain::entities::{DeviceId, ExtensionSet, RecoveryMode, ScanPhase};
use crate::domain::services::SignatureRegistry;
use crate::infrastructure::block_device::discover_devices;

/// filerecall - recover deleted files from disks and disk images
///
/// Files are located through the file system metadata of each volume
/// and by scanning raw sectors for known file signatures. The device is
/// only ever read.
#[derive(Parser, Debug)]
#[command(name = "filerecall")]
#[command(author, version)]
#[command(about = "Recover deleted files from disks and disk images", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the disks that can be opened
    Devices,

    /// Show the partitions and file systems of a device
    Volumes {
        /// Drive index or path to a device or image file
        #[arg(short = 'i', long)]
        device: String,
    },

    /// List the file types the signature scan recognizes
    Signatures,

    /// Recover files into a directory
    Recover {
        /// Drive index or path to a device or image file (e.g. 0, /dev/sdb, disk.img)
        #[arg(short = 'i', long)]
        device: String,

        /// Output directory for recovered files; must not be on the source device
        #[arg(short, long, default_value = "./recovered")]
        output: PathBuf,

        /// metadata, signature or combined
        #[arg(short, long, default_value = "combined")]
        mode: RecoveryMode,

        /// Extensions to recover (jpg,png,pdf); all when omitted
        #[arg(short = 'e', long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        /// Stop selecting files once this many bytes are planned
        #[arg(long)]
        max_bytes: Option<u64>,

        /// JSON engine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not write manifest.json
        #[arg(long)]
        no_manifest: bool,

        /// Print the manifest as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        if self.debug {
            tracing::Level::DEBUG
        } else if self.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

/// Runs the selected command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Volumes { device } => list_volumes(&device),
        Commands::Signatures => {
            list_signatures();
            Ok(())
        }
        Commands::Recover {
            device,
            output,
            mode,
            extensions,
            max_bytes,
            config,
            no_manifest,
            json,
        } => {
            let mut engine_config = match config {
                Some(path) => EngineConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            if no_manifest {
                engine_config = engine_config.with_manifest(false);
            }
            let request = RecoverRequest {
                device,
                output,
                mode,
                extensions: extensions.into_iter().collect(),
                max_bytes: max_bytes.unwrap_or(u64::MAX),
                json,
            };
            recover(request, engine_config).await
        }
    }
}

struct RecoverRequest {
    device: String,
    output: PathBuf,
    mode: RecoveryMode,
    extensions: ExtensionSet,
    max_bytes: u64,
    json: bool,
}

fn list_devices() -> Result<()> {
    let devices = discover_devices().context("Failed to discover disk devices")?;
    if devices.is_empty() {
        println!("No disks found. Reading raw devices usually needs root.");
        return Ok(());
    }

    println!("{:<6} {:<12} {:<10} {:>12} PATH", "INDEX", "NAME", "TYPE", "SIZE");
    println!("{}", "-".repeat(60));
    for device in &devices {
        println!(
            "{:<6} {:<12} {:<10} {:>12} {}",
            device.index,
            device.name,
            device.device_type,
            device.human_size(),
            device.path
        );
    }
    Ok(())
}

fn list_volumes(device: &str) -> Result<()> {
    let id: DeviceId = device.parse()?;
    let engine = RecoveryEngine::new(TracingLogger);
    let info = engine
        .open(&id)
        .with_context(|| format!("Failed to open {id}"))?;

    println!(
        "{} - {} sectors of {} bytes ({})",
        info.path,
        info.total_sectors,
        info.sector_size,
        format_size(info.size_bytes(), BINARY)
    );
    for volume in engine.volumes()? {
        println!(
            "  {volume}  {}{}",
            format_size(volume.sector_count * info.sector_size as u64, BINARY),
            volume
                .name
                .as_deref()
                .map(|name| format!("  \"{name}\""))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn list_signatures() {
    let registry = SignatureRegistry::default_formats();
    let mut seen = Vec::new();
    for signature in registry.signatures() {
        let format = signature.format();
        if seen.contains(&format) {
            continue;
        }
        seen.push(format);
        println!(
            "{:<18} {:<28} up to {}",
            format.name(),
            format.extensions().join(", "),
            format_size(signature.max_size(), BINARY)
        );
    }
}

async fn recover(request: RecoverRequest, config: EngineConfig) -> Result<()> {
    let id: DeviceId = request.device.parse()?;
    let engine = Arc::new(RecoveryEngine::with_config(TracingLogger, config));
    let info = engine
        .open(&id)
        .with_context(|| format!("Failed to open {id}"))?;

    let handler_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || handler_engine.cancel())
        .context("Failed to set Ctrl+C handler")?;

    let reporter = ProgressReporter::new(info.total_sectors);
    let mut progress = engine.progress();
    let watcher_reporter = reporter.clone();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            watcher_reporter.update(&snapshot);
            if snapshot.phase == ScanPhase::Done {
                break;
            }
        }
    });

    let outcome = engine
        .recover_files(request.mode, request.extensions, request.max_bytes, &request.output)
        .await;
    watcher.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            reporter.abandon("Recovery failed");
            return Err(e).context("Recovery failed");
        }
    };
    reporter.finish(&format!(
        "{} files recovered into {}",
        result.files_recovered(),
        request.output.display()
    ));

    let manifest = summarize(&result);
    if request.json {
        println!("{}", manifest.to_json()?);
    } else {
        print!("{}", manifest.to_text());
    }
    engine.close();
    Ok(())
}

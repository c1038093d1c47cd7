/*!
# Bit-Flip Search

Single event effect test tool for the MIMOSIS-1 sensor. Writes known
register contents, then polls one register block and reports every
difference from the reference snapshot, optionally tagged with the current
micro-beam scan position.

## Usage

### From the configuration file
```bash
bitflip_search --config bitflip_search.toml
```

### With overrides
```bash
bitflip_search search --block DAC --interval-ms 50 --beam --host beamctl --port 8188
```

### Read one block once
```bash
bitflip_search dump --block GenConf
```

Reports go to stdout, logs to stderr (`RUST_LOG` controls the level).
*/

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimosis::{Chip, ChipId, ReadCorruption, RegisterBlock, SimulatedDevice};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod detector;
mod report;
mod shutdown;
mod subscriber;
mod supervisor;

use config::{AppConfig, BeamConfig};
use detector::{BitFlipSearch, CorrectiveAction, RegisterProbe, SearchOutcome, SearchSettings, StopReason};
use report::ReportFormat;
use shutdown::ShutdownSignal;
use subscriber::BeamPositionSubscriber;

#[derive(Parser)]
#[command(name = "bitflip_search")]
#[command(about = "Register bit-flip search for MIMOSIS-1 single event effect tests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "bitflip_search.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bit-flip search, overriding values from the config file
    Search {
        /// Register block to poll
        #[arg(short, long)]
        block: Option<RegisterBlock>,

        /// Polling interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Inject simulated bit flips into reads
        #[arg(long)]
        sim_read_flip: bool,

        /// Tag events with the beam position feed
        #[arg(long)]
        beam: bool,

        /// Beam position publisher host
        #[arg(long)]
        host: Option<String>,

        /// Beam position publisher port
        #[arg(long)]
        port: Option<u16>,

        /// Stop after this many polls
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Report format
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
    },

    /// Write the default registers and print one block as hex
    Dump {
        /// Register block to read
        #[arg(short, long, default_value = "GenConf")]
        block: RegisterBlock,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "bitflip_search.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the report stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bitflip_search=info,mimosis=info")),
        )
        .init();

    match cli.command {
        Some(Commands::Search {
            block,
            interval_ms,
            sim_read_flip,
            beam,
            host,
            port,
            max_iterations,
            format,
        }) => {
            let mut config = load_config(&cli.config);
            if let Some(block) = block {
                config.search.block = block;
            }
            if let Some(interval_ms) = interval_ms {
                config.search.interval_ms = interval_ms;
            }
            config.search.sim_read_flip |= sim_read_flip;
            config.beam.enabled |= beam;
            if let Some(host) = host {
                config.beam.host = host;
            }
            if let Some(port) = port {
                config.beam.port = port;
            }
            if max_iterations.is_some() {
                config.search.max_iterations = max_iterations;
            }
            if let Some(format) = format {
                config.report.format = format;
            }
            run_search(config)
        }

        Some(Commands::Dump { block }) => run_dump(load_config(&cli.config), block),

        Some(Commands::Config { output }) => generate_config_file(output),

        None => {
            let config = AppConfig::load_from_file(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            run_search(config)
        }
    }
}

/// Load the config file, falling back to defaults when it is missing or bad
fn load_config(path: &Path) -> AppConfig {
    AppConfig::load_from_file(path).unwrap_or_else(|e| {
        warn!("⚠️ Failed to load config ({:#}), using defaults", e);
        AppConfig::new()
    })
}

/// Simulated chip with the configured defaults written
fn prepare_chip(config: &AppConfig) -> Result<Chip<SimulatedDevice>> {
    if !config.chip.simulate {
        bail!("no hardware transport is available in this build; set [chip] simulate = true");
    }

    let id = ChipId::new(config.chip.chip_id)?;
    let defaults = config.register_defaults()?;
    let mut chip = Chip::new(SimulatedDevice::new(id), id).with_defaults(defaults);

    for block in &config.search.initialize {
        let written = chip
            .write_block_or_default(*block, None)
            .with_context(|| format!("Failed to initialize {}", block))?;
        info!("✍️ Wrote {} bytes to {}", written, block);
    }
    Ok(chip)
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

/// Run the bit-flip search until it stops or Ctrl+C
fn run_search(config: AppConfig) -> Result<()> {
    config.validate()?;
    let chip = prepare_chip(&config)?;

    let mut settings = SearchSettings::new(config.search.interval());
    settings.max_iterations = config.search.max_iterations;
    if config.search.sim_read_flip {
        let seed = config.search.seed.unwrap_or_else(time_seed);
        settings.read_corruption = Some(ReadCorruption::new(config.search.flip_probability, seed)?);
    }

    let probe = RegisterProbe::block(config.search.block);
    let corrective: Vec<CorrectiveAction<SimulatedDevice>> = config
        .search
        .corrective
        .iter()
        .map(|block| CorrectiveAction::rewrite_default(*block))
        .collect();
    if corrective.is_empty() {
        info!("🎯 Polling {}, stopping at the first bit flip", probe.name());
    } else {
        let names: Vec<&str> = corrective.iter().map(|action| action.name()).collect();
        info!("🎯 Polling {}, re-writing with [{}] after each bit flip", probe.name(), names.join(", "));
    }

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let report = report::spawn_report_thread(events_rx, config.report.format);

    let search = BitFlipSearch::new(chip, probe, settings, events_tx)?
        .with_corrective_actions(corrective);

    let (trigger, signal) = shutdown::channel();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        trigger.fire();
    })?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let outcome = runtime.block_on(run_until_stopped(&config.beam, search, signal))?;

    let written = match report.join() {
        Ok(result) => result.context("Failed to write report")?,
        Err(_) => bail!("report thread panicked"),
    };

    match outcome.stop {
        StopReason::BitFlipFound => warn!(
            "💥 Bit flip found after {} iterations",
            outcome.iterations
        ),
        stop => info!(
            "✅ Search finished ({:?}): {} iterations, {} event(s)",
            stop, outcome.iterations, outcome.events
        ),
    }
    if let Some(event) = &outcome.last_event {
        info!("🔎 Last bit flip: {}", event.summary());
    }
    info!("📝 {} event(s) reported", written);
    Ok(())
}

/// Drive the search, next to the beam feed when enabled
async fn run_until_stopped(
    beam: &BeamConfig,
    search: BitFlipSearch<SimulatedDevice>,
    signal: ShutdownSignal,
) -> Result<SearchOutcome> {
    if !beam.enabled {
        return Ok(search.run(signal).await?);
    }

    let (feed, position) = BeamPositionSubscriber::connect(&beam.host, beam.port)
        .await
        .with_context(|| format!("Failed to connect to beam feed at {}:{}", beam.host, beam.port))?;
    Ok(supervisor::supervise(search.with_position(position), feed, signal).await?)
}

/// Write the configured defaults and print one block
fn run_dump(config: AppConfig, block: RegisterBlock) -> Result<()> {
    let mut chip = prepare_chip(&config)?;
    let bytes = chip.read_block_vec(block)?;
    println!(
        "{}\t{} bytes\t{} ones\t{}",
        block,
        bytes.len(),
        report::ones_in_bytes(&bytes),
        report::hex_bytes(&bytes)
    );
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   bitflip_search --config {}", output_path.display());

    Ok(())
}

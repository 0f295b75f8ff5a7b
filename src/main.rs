//! CLI entry point for `ni-mio`.
//!
//! Attaches a simulated NI E/M-series board and drives it the way a
//! program would drive the real one.
//!
//! # Usage
//!
//! Show the subdevices of a board:
//! ```bash
//! ni-mio --board pci-6221 info
//! ```
//!
//! Stream 1000 scans of channels 0..3 to a CSV file:
//! ```bash
//! ni-mio read --channels 0,1,2,3 --scans 1000 --output scans.csv
//! ```
//!
//! Print the effective configuration:
//! ```bash
//! NI_MIO_ATTACH__DMA=false ni-mio config
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ni_mio_daq::{logging, AppConfig, Bench, Overrides};
use tracing::info;

#[derive(Parser)]
#[command(name = "ni-mio")]
#[command(about = "NI E/M-series acquisition on a simulated board", long_about = None)]
struct Cli {
    /// Configuration file (default: ni-mio.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Board name from the driver's board table
    #[arg(long, global = true)]
    board: Option<String>,

    /// Interrupt line
    #[arg(long, global = true)]
    irq: Option<u32>,

    /// Service FIFOs instead of using DMA
    #[arg(long, global = true)]
    no_dma: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the board and list its subdevices
    Info {
        /// Print the report as JSON
        #[arg(long)]
        as_json: bool,
    },

    /// Run an analog input command and write one CSV row per scan
    Read {
        /// Channels in scan order
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<u32>>,

        /// Scans to acquire
        #[arg(long)]
        scans: Option<u32>,

        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Play the configured sine waveform on the analog output
    Write,

    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let (channels, scans) = match &self.command {
            Commands::Read { channels, scans, .. } => (channels.clone(), *scans),
            _ => (None, None),
        };
        Overrides {
            board: self.board.clone(),
            irq: self.irq,
            dma: self.no_dma.then_some(false),
            channels,
            scans,
            json: self.json.then_some(true),
            log_level: self.log_level.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("failed to load configuration")?;
    logging::init(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Commands::Info { as_json } => info_cmd(&config, as_json),
        Commands::Read { output, .. } => read_cmd(&config, output),
        Commands::Write => write_cmd(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn info_cmd(config: &AppConfig, as_json: bool) -> Result<()> {
    let bench = Bench::attach(config).context("attach failed")?;
    let report = bench.report();
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode report")?
        );
    } else {
        print!("{report}");
    }
    Ok(())
}

fn read_cmd(config: &AppConfig, output: Option<PathBuf>) -> Result<()> {
    let bench = Bench::attach(config).context("attach failed")?;
    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let summary = bench
        .acquire(&config.acquisition, &mut out)
        .context("acquisition failed")?;
    out.flush()?;
    info!(
        scans = summary.scans,
        dropped = summary.samples_dropped,
        "read complete"
    );
    Ok(())
}

fn write_cmd(config: &AppConfig) -> Result<()> {
    let bench = Bench::attach(config).context("attach failed")?;
    let summary = bench
        .generate(&config.waveform)
        .context("waveform output failed")?;
    println!(
        "{} samples written, {} updates",
        summary.samples_written, summary.updates
    );
    Ok(())
}

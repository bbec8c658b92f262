mod progress;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use flashb_core::config::{FlashConfig, ProtocolConfig};
use flashb_core::error::FlashError;
use flashb_core::image::Image;
use flashb_core::device::{Device, DeviceFilter};
use flashb_core::loader::load_sections;
use flashb_core::session::{DeviceOutcome, FlashSession, SessionOptions};
use flashb_core::transport::I2cTransport;
use tracing::{error, info};

use progress::ConsoleObserver;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flash MSP430s over I2C", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "flashb.toml")]
    config: String,

    /// I2C device path (overrides the config file)
    #[arg(short, long)]
    device: Option<String>,

    /// Board name in config file
    #[arg(short, long)]
    name: String,

    /// Target the device at this address (hex) instead of the configured one
    #[arg(long, value_parser = parse_hex_u8)]
    address: Option<u8>,

    /// Flash even if the device already runs this firmware version
    #[arg(short, long)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// ELF file linked for the bottom half
    bottom: String,

    /// ELF file linked for the top half
    top: String,
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("'{}' is not a hex byte: {}", s, e))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Everything a run needs, resolved before the bus is opened.
struct Plan {
    config: ProtocolConfig,
    bus_path: String,
    address: u8,
    filter: DeviceFilter,
    first: Image,
    second: Image,
}

/// Resolve config and images. Any failure here is fatal before bus I/O.
fn prepare(args: &Args) -> Result<Plan, FlashError> {
    let file = FlashConfig::load_from_file(&args.config)?;
    let config = file.protocol_config(&args.name)?;
    let bus_path = match &args.device {
        Some(path) => path.clone(),
        None => file.bus_device()?.to_string(),
    };
    let (address, filter) = match args.address {
        Some(address) => (
            address,
            DeviceFilter::Address {
                address,
                board: args.name.clone(),
            },
        ),
        None => (
            file.board_address(&args.name)?,
            DeviceFilter::Board(args.name.clone()),
        ),
    };

    let first = load_sections(&args.bottom)?;
    let second = load_sections(&args.top)?;
    Ok(Plan {
        config,
        bus_path,
        address,
        filter,
        first,
        second,
    })
}

fn run(args: &Args) -> Result<()> {
    let Plan {
        config,
        bus_path,
        address,
        filter,
        first,
        second,
    } = prepare(args)?;

    let bus = I2cTransport::open(&bus_path, Device::new(address, args.name.as_str()))?;
    info!(bus = %bus.path(), "Bus ready");

    let options = SessionOptions {
        filter,
        force: args.force,
    };
    let session = FlashSession::with_observer(&bus, &config, options, Arc::new(ConsoleObserver));
    let report = session.run(first, second)?;

    for entry in &report.devices {
        match &entry.outcome {
            DeviceOutcome::Updated { from, to, half } => {
                println!("{}: {:x} -> {:x} ({} half)", entry.device, from, to, half)
            }
            DeviceOutcome::UpToDate { version } => {
                println!("{}: already at {:x}", entry.device, version)
            }
            DeviceOutcome::Skipped { reason } => println!("{}: skipped ({})", entry.device, reason),
        }
    }
    if report.devices.is_empty() {
        println!("No {} devices found", args.name);
    }
    Ok(())
}

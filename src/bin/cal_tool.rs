//! cal-tool
//!
//! Command-line access to individual CAL blocks.

use std::io::Write;
use std::process::ExitCode;

use calstore::{Area, CalError, CalStore, Config, RestrictedMode};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// CAL block tool
#[derive(Parser, Debug)]
#[command(name = "cal-tool")]
#[command(about = "Read and write CAL blocks on an MTD partition")]
#[command(version)]
struct Args {
    /// MTD device holding the CAL partition
    #[arg(short, long, default_value = "/dev/mtd1")]
    device: String,

    /// Directory for the lock file
    #[arg(long, default_value = "/tmp")]
    lock_dir: String,

    /// OTP selector for the restricted area
    #[arg(long, value_enum, default_value = "user")]
    otp: OtpArg,

    /// Compact an erase block when the partition is full
    #[arg(long)]
    compact_on_full: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OtpArg {
    Factory,
    User,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a block's payload
    Get {
        /// Block name
        name: String,

        /// Write raw bytes to stdout instead of a hex dump
        #[arg(long)]
        raw: bool,
    },

    /// Write a new version of a block
    Set {
        /// Block name
        name: String,

        /// Payload (text, or hex digits with --hex)
        value: String,

        /// Parse the payload as hex
        #[arg(long)]
        hex: bool,
    },

    /// List every block on the device
    List,

    /// Show device geometry
    Info,

    /// Reclaim space held by superseded blocks
    Compact,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cal-tool: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: Args) -> calstore::Result<()> {
    let config = Config::builder()
        .device_path(&args.device)
        .lock_dir(&args.lock_dir)
        .restricted_mode(match args.otp {
            OtpArg::Factory => RestrictedMode::Factory,
            OtpArg::User => RestrictedMode::User,
        })
        .compact_on_full(args.compact_on_full)
        .build();

    let mut store = CalStore::open(config)?;

    match args.command {
        Commands::Get { name, raw } => {
            let data = store.read(&name)?;
            let mut stdout = std::io::stdout().lock();
            if raw {
                stdout.write_all(data)?;
            } else {
                stdout.write_all(hex_dump(data).as_bytes())?;
            }
        }
        Commands::Set { name, value, hex } => {
            let payload = if hex {
                parse_hex(&value)?
            } else {
                value.into_bytes()
            };
            store.write(&name, &payload)?;
        }
        Commands::List => {
            println!("{:<10} {:>8} {:<16} {:>3} {:>6} {:>6}  active", "area", "addr", "name", "ver", "flags", "len");
            for info in store.blocks() {
                let area = match info.area {
                    Area::Normal => "normal",
                    Area::Restricted => "restricted",
                };
                println!(
                    "{:<10} {:>#8x} {:<16} {:>3} {:>#6x} {:>6}  {}",
                    area,
                    info.addr,
                    info.name.to_string(),
                    info.block_version,
                    info.flags,
                    info.len,
                    if info.active { "*" } else { "" }
                );
            }
        }
        Commands::Info => {
            let geometry = store.geometry();
            println!("size:        {:#x}", geometry.size);
            println!("erase size:  {:#x}", geometry.erase_size);
            println!("write size:  {:#x}", geometry.write_size);
            println!("max payload: {}", geometry.max_payload().unwrap_or(0));
        }
        Commands::Compact => {
            let report = store.compact()?;
            println!(
                "compacted {:#x}: {} retained, {} dropped, {} bytes free",
                report.erase_block, report.retained, report.dropped, report.free_bytes
            );
        }
    }

    store.close();
    Ok(())
}

/// Distinct exit status per error class
fn exit_code(err: &CalError) -> u8 {
    match err {
        CalError::Lock(_) => 2,
        CalError::Device(_) | CalError::Io(_) => 3,
        CalError::Scan(_) => 4,
        CalError::NotFound(_) => 5,
        CalError::Write(_) => 6,
        CalError::Closed | CalError::Config(_) => 1,
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}:", i * 16));
        for byte in line {
            out.push_str(&format!(" {:02x}", byte));
        }
        out.push('\n');
    }
    out
}

fn parse_hex(value: &str) -> calstore::Result<Vec<u8>> {
    let digits: Vec<u8> = value.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(CalError::Config(format!("odd number of hex digits in {:?}", value)));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| CalError::Config(format!("invalid hex in {:?}", value)))
        })
        .collect()
}

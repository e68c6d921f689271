//! BLE firmware update tool for swup devices
//!
//! Usage:
//!   swup-ble scan                          - Scan for swup devices
//!   swup-ble flash firmware.bin [--device NAME] [--chunk-size 512]
//!   swup-ble result [--device NAME]        - Read the current attempt's result
//!   swup-ble checksum firmware.bin         - Print the CRC-32 the device will expect
//!
//! The target device defaults to $SWUP_DEVICE when --device is not given.

use clap::{Parser, Subcommand};
use std::time::Duration;
use swup_ble_controller::ble::{self, FlashOptions};

#[derive(Parser)]
#[command(name = "swup-ble")]
#[command(about = "Push firmware to swup devices over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for swup devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Print devices as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a firmware image to a device
    Flash {
        /// Firmware image file
        file: String,
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Bytes per data write
        #[arg(short, long, default_value_t = swup_proto::RECOMMENDED_CHUNK_SIZE)]
        chunk_size: usize,
        /// Wait for an acknowledgement of every chunk
        #[arg(long)]
        with_response: bool,
        /// Seconds to scan for the device
        #[arg(long, default_value = "5")]
        scan: u64,
        /// Seconds to wait for the result notification
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read the result of the current update attempt
    Result {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Seconds to scan for the device
        #[arg(long, default_value = "5")]
        scan: u64,
    },
    /// Print the CRC-32 of a firmware image
    Checksum {
        /// Firmware image file
        file: String,
    },
}

/// --device wins over $SWUP_DEVICE
fn resolve_device(arg: Option<String>, env: Option<String>) -> Option<String> {
    arg.or(env).filter(|d| !d.is_empty())
}

fn device_from_env(arg: Option<String>) -> Option<String> {
    resolve_device(arg, std::env::var("SWUP_DEVICE").ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration, json } => cmd_scan(duration, json).await?,
        Commands::Flash { file, device, chunk_size, with_response, scan, timeout, json } => {
            let options = FlashOptions {
                chunk_size,
                scan_secs: scan,
                with_response,
                result_timeout: Duration::from_secs(timeout),
            };
            cmd_flash(&file, device_from_env(device), &options, json).await?
        }
        Commands::Result { device, scan } => cmd_result(device_from_env(device), scan).await?,
        Commands::Checksum { file } => {
            let image = std::fs::read(&file)?;
            println!(
                "{}: {} bytes, crc32 0x{:08x}",
                file,
                image.len(),
                swup_proto::crc::checksum(&image)
            );
        }
    }

    Ok(())
}

async fn cmd_scan(duration: u64, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !json {
        println!("Scanning for BLE devices ({} seconds)...", duration);
    }
    let devices = ble::scan(duration).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let (updatable, other): (Vec<_>, Vec<_>) =
        devices.iter().partition(|d| d.has_update_service);

    if !updatable.is_empty() {
        println!("\nswup devices:");
        for device in &updatable {
            let rssi = device.rssi.map(|r| format!(" ({}dBm)", r)).unwrap_or_default();
            println!("  {} - {}{}", device.name, device.address, rssi);
        }
    }

    if !other.is_empty() {
        println!("\nOther devices:");
        for device in &other {
            let rssi = device.rssi.map(|r| format!(" ({}dBm)", r)).unwrap_or_default();
            println!("  {} - {}{}", device.name, device.address, rssi);
        }
    }

    if updatable.is_empty() {
        println!("\nNo swup devices found.");
        println!("Make sure your device is powered on and advertising.");
    }
    Ok(())
}

async fn cmd_flash(
    file: &str,
    device: Option<String>,
    options: &FlashOptions,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = std::fs::read(file)?;
    if !json {
        println!(
            "Flashing {} ({} bytes, crc32 0x{:08x}) in {} byte chunks...",
            file,
            image.len(),
            swup_proto::crc::checksum(&image),
            options.chunk_size
        );
    }

    let mut last_step = 0;
    let report = ble::flash(device.as_deref(), &image, options, |p| {
        let step = p.percent() / 10;
        if !json && step > last_step {
            println!("  {}/{} bytes ({}%)", p.written, p.total, p.percent());
            last_step = step;
        }
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Device result: {} (0x{:02x})",
            report.description, report.result
        );
    }

    if !report.is_success() {
        return Err(format!("update failed: {}", report.description).into());
    }
    if !json {
        println!("Update stored. The new firmware runs after the device restarts.");
    }
    Ok(())
}

async fn cmd_result(device: Option<String>, scan: u64) -> Result<(), Box<dyn std::error::Error>> {
    match ble::read_result(device.as_deref(), scan).await? {
        Some(code) => println!(
            "Current attempt: {} (0x{:02x})",
            swup_proto::describe_result(code),
            code
        ),
        None => println!("No result for the current update attempt."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_argument_overrides_env() {
        assert_eq!(
            resolve_device(Some("swup-a".into()), Some("swup-b".into())),
            Some("swup-a".to_string())
        );
        assert_eq!(resolve_device(None, Some("swup-b".into())), Some("swup-b".to_string()));
        assert_eq!(resolve_device(None, Some(String::new())), None);
        assert_eq!(resolve_device(None, None), None);
    }

    #[test]
    fn flash_defaults() {
        let cli = Cli::try_parse_from(["swup-ble", "flash", "fw.bin"]).unwrap();
        match cli.command {
            Commands::Flash { file, device, chunk_size, with_response, timeout, .. } => {
                assert_eq!(file, "fw.bin");
                assert_eq!(device, None);
                assert_eq!(chunk_size, 512);
                assert!(!with_response);
                assert_eq!(timeout, 30);
            }
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

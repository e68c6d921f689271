//! swup BLE Controller
//!
//! BLE client for pushing firmware images to swup devices.
//!
//! # Example
//!
//! ```ignore
//! use swup_ble_controller::ble;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for devices
//!     let devices = ble::scan(5).await?;
//!     for device in &devices {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     // Push an image to the first swup device found
//!     let image = std::fs::read("firmware.bin")?;
//!     let report = ble::flash(None, &image, &ble::FlashOptions::default(), |p| {
//!         println!("{}%", p.percent());
//!     })
//!     .await?;
//!     println!("result: {}", report.description);
//!
//!     Ok(())
//! }
//! ```

pub mod ble;

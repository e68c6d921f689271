//! swup firmware update service for ESP32
//!
//! Advertises the swup GATT service and writes received images to the next OTA
//! partition. The onboard LED is lit while an image is being received.

mod ble;
mod ota;

use esp_idf_hal::{
    gpio::{Gpio2, Output, PinDriver},
    prelude::Peripherals,
};
use log::*;
use std::time::Duration;
use swup_mcu::{OrderingPolicy, Phase, SessionConfig};
use swup_proto::RESULT_OK;

const DEVICE_NAME: &str = "swup-esp32";

// Boot into the new image as soon as one is stored
const RESTART_AFTER_UPDATE: bool = true;

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("swup ESP32 v{}", env!("CARGO_PKG_VERSION"));

    // Reaching this point means the image boots
    if let Err(e) = ota::mark_running_slot_valid() {
        warn!("Could not mark running slot valid: {:?}", e);
    }

    let peripherals = Peripherals::take()?;
    let mut led = PinDriver::output(peripherals.pins.gpio2)?;
    led.set_low()?;

    let writer = ota::EspOtaWriter::new()
        .map_err(|e| anyhow::anyhow!("no OTA partition available: {}", e))?;
    let config = SessionConfig {
        max_image_size: writer.capacity(),
        ordering: OrderingPolicy::Strict,
    };

    let session = ble::start_update_service(DEVICE_NAME, writer, config)?;
    info!("Waiting for firmware updates over BLE");

    let mut last_phase = Phase::Idle;
    loop {
        std::thread::sleep(Duration::from_millis(100));

        let (phase, result, written) = match session.lock() {
            Ok(s) => (s.phase(), s.last_result(), s.bytes_written()),
            Err(_) => {
                error!("Update session lock poisoned");
                restart_device();
            }
        };

        if phase == last_phase {
            continue;
        }
        last_phase = phase;
        set_activity(&mut led, phase == Phase::Receiving);

        if phase != Phase::Done {
            continue;
        }
        match result {
            Some(RESULT_OK) => {
                info!("Update of {} bytes stored", written);
                if RESTART_AFTER_UPDATE {
                    restart_device();
                }
            }
            Some(code) => warn!(
                "Update failed: {} (0x{:02x})",
                swup_proto::describe_result(code),
                code
            ),
            None => {}
        }
    }
}

fn set_activity(led: &mut PinDriver<'static, Gpio2, Output>, on: bool) {
    let outcome = if on { led.set_high() } else { led.set_low() };
    if let Err(e) = outcome {
        warn!("Activity LED update failed: {:?}", e);
    }
}

/// Restart the device
fn restart_device() -> ! {
    info!("Restarting in 1 second...");
    std::thread::sleep(Duration::from_secs(1));
    unsafe {
        esp_idf_svc::sys::esp_restart();
    }
}

//! BLE Client for updating swup devices
//!
//! Provides functions to scan for devices, push a firmware image and read back the
//! result of the last update.

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use swup_proto::{Attribute, decode_u32, describe_result, encode_u32};

/// Prefix of the advertised name of swup devices
pub const DEVICE_NAME_PREFIX: &str = "swup";

// UUIDs from swup_proto::ble
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xcb0b9a0b_a84c_4c0d_bdbb_442e3144ee30);
const TOTAL_SIZE_UUID: Uuid = Uuid::from_u128(0xe74dd9c0_a301_4a6f_95a1_f0e1dbea8e1e);
const DATA_UUID: Uuid = Uuid::from_u128(0xe272ebac_d463_4b98_bc84_5cc1a39ee517);
const CHECKSUM_UUID: Uuid = Uuid::from_u128(0x4826129c_c22a_43a3_b066_ce8f0d5bacc6);
const RESULT_UUID: Uuid = Uuid::from_u128(0x5e134862_7411_4424_ac4a_210937432c77);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no swup device found")]
    DeviceNotFound,
    #[error("{0} characteristic not found")]
    MissingAttribute(Attribute),
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("firmware image is too large ({0} bytes)")]
    ImageTooLarge(usize),
    #[error("chunk size must be at least one byte")]
    InvalidChunkSize,
    #[error("device refused image size {requested} (read back {accepted})")]
    SizeRejected { requested: u32, accepted: u32 },
    #[error("invalid value from device: {0}")]
    Payload(#[from] std::io::Error),
    #[error("device did not report a result")]
    NoResult,
}

/// A discovered BLE device
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpdatableDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub has_update_service: bool,
}

/// Knobs for `flash`
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Bytes per data write, must fit the negotiated ATT payload
    pub chunk_size: usize,
    /// How long to scan for the device
    pub scan_secs: u64,
    /// Acknowledge every data chunk; slower but survives congested links
    pub with_response: bool,
    /// How long to wait for the result notification before reading it
    pub result_timeout: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            chunk_size: swup_proto::RECOMMENDED_CHUNK_SIZE,
            scan_secs: 5,
            with_response: false,
            result_timeout: Duration::from_secs(30),
        }
    }
}

impl FlashOptions {
    fn data_write_type(&self) -> WriteType {
        if self.with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }
}

/// Transfer progress, reported after every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub written: usize,
    pub total: usize,
    pub chunks: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.written * 100 / self.total) as u8
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlashReport {
    pub bytes: usize,
    pub chunks: usize,
    pub checksum: u32,
    pub result: u8,
    pub description: &'static str,
}

impl FlashReport {
    pub fn is_success(&self) -> bool {
        self.result == swup_proto::RESULT_OK
    }
}

fn attribute_uuid(attribute: Attribute) -> Uuid {
    match attribute {
        Attribute::TotalSize => TOTAL_SIZE_UUID,
        Attribute::Data => DATA_UUID,
        Attribute::Checksum => CHECKSUM_UUID,
        Attribute::Result => RESULT_UUID,
    }
}

/// Whether an advertisement looks like a swup device
///
/// Matches "swup-xxx", the "nimble [swup-xxx]" form some stacks report, or any device
/// advertising the update service.
pub fn is_update_device(name: &str, services: &[Uuid]) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
        || name.contains(&format!("[{DEVICE_NAME_PREFIX}"))
        || services.contains(&SERVICE_UUID)
}

fn find_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    attribute: Attribute,
) -> Result<&Characteristic, ControllerError> {
    let uuid = attribute_uuid(attribute);
    characteristics
        .iter()
        .find(|c| c.uuid == uuid)
        .ok_or(ControllerError::MissingAttribute(attribute))
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, ControllerError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(ControllerError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. Devices exposing the update service have
/// `has_update_service = true`.
pub async fn scan(duration_secs: u64) -> Result<Vec<UpdatableDevice>, ControllerError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let has_update_service = is_update_device(&name, &props.services);
            devices.push(UpdatableDevice {
                name,
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                has_update_service,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a device by name/address pattern, or find any swup device
pub async fn find_device(
    target: Option<&str>,
    scan_secs: u64,
) -> Result<Peripheral, ControllerError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(scan_secs)).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => is_update_device(&name, &props.services),
            };

            if matches {
                adapter.stop_scan().await?;
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(ControllerError::DeviceNotFound)
}

/// Push a firmware image and wait for the device's verdict
///
/// # Arguments
/// * `target` - Device name/address pattern, or None to find any swup device
/// * `image` - Complete firmware image
/// * `progress` - Called after each chunk is written
pub async fn flash<F: FnMut(Progress)>(
    target: Option<&str>,
    image: &[u8],
    options: &FlashOptions,
    mut progress: F,
) -> Result<FlashReport, ControllerError> {
    if image.is_empty() {
        return Err(ControllerError::EmptyImage);
    }
    let size =
        u32::try_from(image.len()).map_err(|_| ControllerError::ImageTooLarge(image.len()))?;
    if options.chunk_size == 0 {
        return Err(ControllerError::InvalidChunkSize);
    }

    let device = find_device(target, options.scan_secs).await?;
    device.connect().await?;

    let outcome = push_image(&device, image, size, options, &mut progress).await;

    let _ = device.disconnect().await;
    outcome
}

async fn push_image<F: FnMut(Progress)>(
    device: &Peripheral,
    image: &[u8],
    size: u32,
    options: &FlashOptions,
    progress: &mut F,
) -> Result<FlashReport, ControllerError> {
    device.discover_services().await?;
    let characteristics = device.characteristics();

    let size_char = find_characteristic(&characteristics, Attribute::TotalSize)?;
    let data_char = find_characteristic(&characteristics, Attribute::Data)?;
    let checksum_char = find_characteristic(&characteristics, Attribute::Checksum)?;
    let result_char = find_characteristic(&characteristics, Attribute::Result)?;

    // Subscribe before the attempt starts so the result notification cannot be missed
    device.subscribe(result_char).await?;
    let mut notifications = device.notifications().await?;

    device.write(size_char, &encode_u32(size), WriteType::WithResponse).await?;
    let accepted = decode_u32(&device.read(size_char).await?)?;
    if accepted != size {
        return Err(ControllerError::SizeRejected { requested: size, accepted });
    }

    let write_type = options.data_write_type();
    let mut current = Progress {
        written: 0,
        total: image.len(),
        chunks: 0,
    };
    for chunk in image.chunks(options.chunk_size) {
        device.write(data_char, chunk, write_type).await?;
        current.written += chunk.len();
        current.chunks += 1;
        progress(current);
    }

    let checksum = swup_proto::crc::checksum(image);
    device
        .write(checksum_char, &encode_u32(checksum), WriteType::WithResponse)
        .await?;

    let result_uuid = attribute_uuid(Attribute::Result);
    let notified = tokio::time::timeout(options.result_timeout, async {
        while let Some(notification) = notifications.next().await {
            if notification.uuid == result_uuid {
                return notification.value.first().copied();
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let result = match notified {
        Some(code) => code,
        None => device
            .read(result_char)
            .await?
            .first()
            .copied()
            .ok_or(ControllerError::NoResult)?,
    };

    Ok(FlashReport {
        bytes: image.len(),
        chunks: current.chunks,
        checksum,
        result,
        description: describe_result(result),
    })
}

/// Read the result of the device's current update attempt
///
/// Returns None if the current attempt has not committed yet (including right after a new
/// total-size announce, or when no attempt was made since the device started).
pub async fn read_result(
    target: Option<&str>,
    scan_secs: u64,
) -> Result<Option<u8>, ControllerError> {
    let device = find_device(target, scan_secs).await?;

    device.connect().await?;
    device.discover_services().await?;

    let characteristics = device.characteristics();
    let outcome = match find_characteristic(&characteristics, Attribute::Result) {
        Ok(result_char) => device
            .read(result_char)
            .await
            .map(|value| value.first().copied())
            .map_err(ControllerError::from),
        Err(e) => Err(e),
    };

    let _ = device.disconnect().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_protocol_strings() {
        for attribute in Attribute::ALL {
            assert_eq!(attribute_uuid(attribute).to_string(), attribute.uuid());
        }
        assert_eq!(SERVICE_UUID.to_string(), swup_proto::ble::SERVICE_UUID);
    }

    #[test]
    fn recognises_update_devices() {
        assert!(is_update_device("swup-3fa2", &[]));
        assert!(is_update_device("nimble [swup-3fa2]", &[]));
        assert!(is_update_device("", &[SERVICE_UUID]));
        assert!(!is_update_device("Kitchen-Light", &[]));
    }

    #[test]
    fn find_characteristic_in_empty_set() {
        let err = find_characteristic(&BTreeSet::new(), Attribute::Data).unwrap_err();
        assert!(matches!(err, ControllerError::MissingAttribute(Attribute::Data)));
        assert_eq!(err.to_string(), "data characteristic not found");
    }

    #[test]
    fn progress_percent() {
        let p = Progress {
            written: 512,
            total: 1024,
            chunks: 1,
        };
        assert_eq!(p.percent(), 50);
        let done = Progress {
            written: 1024,
            total: 1024,
            chunks: 2,
        };
        assert_eq!(done.percent(), 100);
    }

    #[test]
    fn default_options() {
        let options = FlashOptions::default();
        assert_eq!(options.chunk_size, 512);
        assert!(!options.with_response);
        assert!(matches!(options.data_write_type(), WriteType::WithoutResponse));
    }

    #[tokio::test]
    async fn flash_rejects_bad_input_before_scanning() {
        let options = FlashOptions::default();
        let err = flash(None, &[], &options, |_| {}).await.unwrap_err();
        assert!(matches!(err, ControllerError::EmptyImage));

        let options = FlashOptions {
            chunk_size: 0,
            ..FlashOptions::default()
        };
        let err = flash(None, b"image", &options, |_| {}).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidChunkSize));
    }

    #[test]
    fn report_success() {
        let report = FlashReport {
            bytes: 10,
            chunks: 1,
            checksum: 0,
            result: swup_proto::RESULT_CRC_MISMATCH,
            description: describe_result(swup_proto::RESULT_CRC_MISMATCH),
        };
        assert!(!report.is_success());
    }
}

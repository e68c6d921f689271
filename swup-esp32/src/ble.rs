//! BLE GATT server for the firmware update service
//!
//! Every characteristic callback goes through the one shared `UpdateSession`, so the
//! protocol logic lives in swup_mcu and this module only moves bytes.
//!
//! Uses UUIDs from swup_mcu::ble protocol.

use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::{
    uuid128, utilities::BleUuid, BLEAdvertisementData, BLECharacteristic, BLEDevice,
    DescriptorProperties, NimbleProperties,
};
use log::*;
use std::sync::{Arc, Mutex};
use swup_mcu::{Attribute, GattEvent, ResultNotifier, SessionConfig, UpdateSession};

use crate::ota::EspOtaWriter;

// BLE Service and Characteristic UUIDs
// These must match swup_mcu::ble::{SERVICE_UUID, TOTAL_SIZE_UUID, etc.}
// We use uuid128! macro for compile-time generation of BleUuid
const SERVICE_UUID: BleUuid = uuid128!("cb0b9a0b-a84c-4c0d-bdbb-442e3144ee30");
const TOTAL_SIZE_UUID: BleUuid = uuid128!("e74dd9c0-a301-4a6f-95a1-f0e1dbea8e1e");
const DATA_UUID: BleUuid = uuid128!("e272ebac-d463-4b98-bc84-5cc1a39ee517");
const CHECKSUM_UUID: BleUuid = uuid128!("4826129c-c22a-43a3-b066-ce8f0d5bacc6");
const RESULT_UUID: BleUuid = uuid128!("5e134862-7411-4424-ac4a-210937432c77");

// Characteristic User Description
const USER_DESCRIPTION_UUID: BleUuid = BleUuid::Uuid16(0x2901);

pub type Session = UpdateSession<EspOtaWriter, ResultCharacteristic>;

fn ble_uuid(attribute: Attribute) -> BleUuid {
    match attribute {
        Attribute::TotalSize => TOTAL_SIZE_UUID,
        Attribute::Data => DATA_UUID,
        Attribute::Checksum => CHECKSUM_UUID,
        Attribute::Result => RESULT_UUID,
    }
}

fn properties(attribute: Attribute) -> NimbleProperties {
    let access = attribute.access();
    let mut props = NimbleProperties::empty();
    if access.read {
        props |= NimbleProperties::READ;
    }
    if access.write {
        props |= NimbleProperties::WRITE | NimbleProperties::WRITE_NO_RSP;
    }
    if access.notify {
        props |= NimbleProperties::NOTIFY;
    }
    props
}

/// Result characteristic, updated and notified when a commit completes
pub struct ResultCharacteristic(Arc<NimbleMutex<BLECharacteristic>>);

impl ResultNotifier for ResultCharacteristic {
    fn notify(&mut self, attribute: Attribute, value: &[u8]) {
        info!("BLE: notifying {} = {:02x?}", attribute, value);
        self.0.lock().set_value(value).notify();
    }
}

/// Start the BLE GATT server for firmware updates
/// Returns the session so the main loop can watch the outcome
pub fn start_update_service(
    device_name: &str,
    writer: EspOtaWriter,
    config: SessionConfig,
) -> anyhow::Result<Arc<Mutex<Session>>> {
    let ble_device = BLEDevice::take();

    // Set the device name (this is what shows up in BLE scans)
    BLEDevice::set_device_name(device_name)
        .map_err(|e| anyhow::anyhow!("failed to set device name: {:?}", e))?;

    let server = ble_device.get_server();

    server.on_connect(|server, desc| {
        info!("BLE client connected");
        // Short connection interval, large images take thousands of writes
        if let Err(e) = server.update_conn_params(desc.conn_handle(), 6, 12, 0, 400) {
            warn!("BLE: connection parameter update failed: {:?}", e);
        }
    });

    server.on_disconnect(|_desc, _reason| {
        info!("BLE client disconnected");
    });

    let service = server.create_service(SERVICE_UUID);

    // Result characteristic first, the session notifies through it
    let result_char = service
        .lock()
        .create_characteristic(RESULT_UUID, properties(Attribute::Result));
    describe(&result_char, Attribute::Result);

    let session = Arc::new(Mutex::new(UpdateSession::new(
        writer,
        ResultCharacteristic(result_char.clone()),
        config,
    )));

    // Stored value only changes on notify; reads must see the reset after a new announce
    register_read(&result_char, &session, Attribute::Result);

    for attribute in [Attribute::TotalSize, Attribute::Data, Attribute::Checksum] {
        let characteristic = service
            .lock()
            .create_characteristic(ble_uuid(attribute), properties(attribute));
        describe(&characteristic, attribute);

        let write_session = session.clone();
        characteristic.lock().on_write(move |args| {
            let outcome = match write_session.lock() {
                Ok(mut s) => s.handle(GattEvent::Write {
                    attribute,
                    data: args.recv_data(),
                }),
                Err(_) => {
                    error!("BLE: update session lock poisoned");
                    return;
                }
            };
            if let Err(e) = outcome {
                warn!("BLE: {} write rejected: {}", attribute, e);
                args.reject_with_error_code(e.att_error_code());
            }
        });

        if attribute.access().read {
            register_read(&characteristic, &session, attribute);
        }
    }

    let advertising = ble_device.get_advertising();
    advertising
        .lock()
        .set_data(
            BLEAdvertisementData::new()
                .name(device_name)
                .add_service_uuid(SERVICE_UUID),
        )
        .map_err(|e| anyhow::anyhow!("failed to set advertising data: {:?}", e))?;

    advertising
        .lock()
        .start()
        .map_err(|e| anyhow::anyhow!("failed to start BLE advertising: {:?}", e))?;
    info!("BLE advertising started as '{}'", device_name);

    Ok(session)
}

/// Answer reads of `attribute` from the session, empty values included
fn register_read(
    characteristic: &Arc<NimbleMutex<BLECharacteristic>>,
    session: &Arc<Mutex<Session>>,
    attribute: Attribute,
) {
    let session = session.clone();
    characteristic.lock().on_read(move |value, _desc| {
        let Ok(mut s) = session.lock() else {
            error!("BLE: update session lock poisoned");
            return;
        };
        match s.handle(GattEvent::Read { attribute }) {
            Ok(Some(bytes)) => {
                value.set_value(&bytes);
            }
            Ok(None) => {}
            Err(e) => warn!("BLE: {} read failed: {}", attribute, e),
        }
    });
}

/// Attach the user description descriptor clients show next to the characteristic
fn describe(characteristic: &Arc<NimbleMutex<BLECharacteristic>>, attribute: Attribute) {
    characteristic
        .lock()
        .create_descriptor(USER_DESCRIPTION_UUID, DescriptorProperties::READ)
        .lock()
        .set_value(attribute.description().as_bytes());
}

//! BLE GATT types and traits for the firmware update service
//!
//! Protocol constants (UUIDs, result codes) are in swup_proto.
//! This module provides MCU-specific types and traits.

// Re-export protocol constants for convenience
pub use swup_proto::ble::{
    Access, Attribute, CHECKSUM_UUID, DATA_UUID, RESULT_UUID, SERVICE_UUID, TOTAL_SIZE_UUID,
};

/// ATT protocol error codes a GATT server can answer a rejected request with
pub mod att {
    pub const READ_NOT_PERMITTED: u8 = 0x02;
    pub const WRITE_NOT_PERMITTED: u8 = 0x03;
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0d;

    // Application error range 0x80..=0x9f
    pub const OUT_OF_ORDER: u8 = 0x80;
    pub const OVERFLOW: u8 = 0x81;
    pub const STORAGE_FAILURE: u8 = 0x82;
}

/// A read or write delivered by the GATT server, keyed by attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattEvent<'a> {
    Write { attribute: Attribute, data: &'a [u8] },
    Read { attribute: Attribute },
}

impl<'a> GattEvent<'a> {
    /// Build an event from a raw characteristic UUID, `None` if it is not ours
    pub fn write(uuid: &str, data: &'a [u8]) -> Option<Self> {
        Attribute::from_uuid(uuid).map(|attribute| GattEvent::Write { attribute, data })
    }

    pub fn read(uuid: &str) -> Option<Self> {
        Attribute::from_uuid(uuid).map(|attribute| GattEvent::Read { attribute })
    }

    pub fn attribute(&self) -> Attribute {
        match self {
            GattEvent::Write { attribute, .. } | GattEvent::Read { attribute } => *attribute,
        }
    }
}

/// Trait for pushing attribute value changes to subscribed clients
///
/// MCU-specific crates implement this using their BLE stack's notify call.
/// Notifications only happen at commit, so reads of the attribute must be answered
/// through `UpdateSession::handle` to see the reset done by a new size announce.
pub trait ResultNotifier {
    /// Store `value` as the attribute's current value and notify subscribers
    fn notify(&mut self, attribute: Attribute, value: &[u8]);
}

/// Notifier for hosts without subscribers
impl ResultNotifier for () {
    fn notify(&mut self, _attribute: Attribute, _value: &[u8]) {}
}

/// Notifier that records every notification, for tests and simulators
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    pub sent: Vec<(Attribute, Vec<u8>)>,
}

impl ResultNotifier for RecordingNotifier {
    fn notify(&mut self, attribute: Attribute, value: &[u8]) {
        self.sent.push((attribute, value.to_vec()));
    }
}

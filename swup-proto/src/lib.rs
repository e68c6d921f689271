//! swup wire protocol - attribute payloads and result codes
//!
//! Shared by the device (`swup-mcu`) and the host controller so both ends agree on
//! UUIDs, payload encoding and the meaning of the 1-byte result code.

use std::io;

pub mod ble;
pub mod crc;

pub use ble::Attribute;
pub use crc::Crc32;

// Result attribute values produced by the session itself. Every other value is passed
// through verbatim from the storage writer (see `storage`).
pub const RESULT_OK: u8 = 0;
pub const RESULT_CRC_MISMATCH: u8 = 0xe0;

/// Length of the total-size and checksum payloads
pub const U32_PAYLOAD_LEN: usize = 4;

/// Recommended data chunk size, clients may use anything up to the transport's payload limit
pub const RECOMMENDED_CHUNK_SIZE: usize = 512;

/// Storage writer result codes
///
/// Numbering follows the ESP32 Arduino `Update` library so existing tooling can read them.
pub mod storage {
    pub const OK: u8 = 0;
    pub const WRITE: u8 = 1;
    pub const ERASE: u8 = 2;
    pub const READ: u8 = 3;
    pub const SPACE: u8 = 4;
    pub const SIZE: u8 = 5;
    pub const STREAM: u8 = 6;
    pub const MD5: u8 = 7;
    pub const MAGIC_BYTE: u8 = 8;
    pub const ACTIVATE: u8 = 9;
    pub const NO_PARTITION: u8 = 10;
    pub const BAD_ARGUMENT: u8 = 11;
    pub const ABORT: u8 = 12;
}

/// Human readable name for a result attribute value
pub fn describe_result(code: u8) -> &'static str {
    match code {
        RESULT_OK => "success",
        RESULT_CRC_MISMATCH => "checksum mismatch",
        storage::WRITE => "flash write failed",
        storage::ERASE => "flash erase failed",
        storage::READ => "flash read failed",
        storage::SPACE => "not enough space",
        storage::SIZE => "bad size given",
        storage::STREAM => "stream read timeout",
        storage::MD5 => "MD5 check failed",
        storage::MAGIC_BYTE => "wrong magic byte",
        storage::ACTIVATE => "could not activate the firmware",
        storage::NO_PARTITION => "partition could not be found",
        storage::BAD_ARGUMENT => "bad argument",
        storage::ABORT => "aborted",
        _ => "unknown error",
    }
}

/// Encode a total-size or checksum value
pub fn encode_u32(value: u32) -> [u8; U32_PAYLOAD_LEN] {
    value.to_le_bytes()
}

/// Decode a total-size or checksum payload
///
/// Only the first four bytes are significant; anything after them is ignored.
pub fn decode_u32(data: &[u8]) -> io::Result<u32> {
    if data.len() < U32_PAYLOAD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("u32 payload too short ({} bytes)", data.len()),
        ));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_payload_is_little_endian() {
        assert_eq!(encode_u32(1024), [0x00, 0x04, 0x00, 0x00]);
        assert_eq!(decode_u32(&[0x00, 0x04, 0x00, 0x00]).unwrap(), 1024);
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        assert_eq!(decode_u32(&[0x0a, 0, 0, 0, 0xff, 0xff]).unwrap(), 10);
    }

    #[test]
    fn decode_rejects_short_payload() {
        let err = decode_u32(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(decode_u32(&[]).is_err());
    }

    #[test]
    fn describe_known_and_unknown_codes() {
        assert_eq!(describe_result(RESULT_OK), "success");
        assert_eq!(describe_result(RESULT_CRC_MISMATCH), "checksum mismatch");
        assert_eq!(describe_result(storage::MAGIC_BYTE), "wrong magic byte");
        assert_eq!(describe_result(0x42), "unknown error");
    }
}

//! Firmware Storage Abstraction Traits
//!
//! The session never touches flash itself. MCU-specific crates implement
//! `FirmwareWriter` on top of their OTA partition API (esp_ota for ESP32, etc.).

use swup_proto::storage;

/// Errors that can be reported to the client as a 1-byte result code
pub trait ResultCode {
    /// Non-zero code published on the result attribute
    fn result_code(&self) -> u8;
}

/// Trait for the storage collaborator that receives the image
pub trait FirmwareWriter {
    /// Error type for storage operations
    type Error: ResultCode + std::fmt::Debug;

    /// Reserve space for an image of `size` bytes
    fn begin(&mut self, size: u32) -> Result<(), Self::Error>;

    /// Append the next chunk of the image
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Validate the complete image and make it the next one to boot
    fn end(&mut self) -> Result<(), Self::Error>;

    /// Release a reservation that will never be finalized
    fn abort(&mut self);
}

/// Storage failure carrying one of the `swup_proto::storage` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("storage error {code}: {}", describe(.code))]
pub struct StorageError {
    pub code: u8,
}

pub(crate) fn describe(code: &u8) -> &'static str {
    swup_proto::describe_result(*code)
}

impl StorageError {
    pub fn new(code: u8) -> Self {
        Self { code }
    }
}

impl ResultCode for StorageError {
    fn result_code(&self) -> u8 {
        self.code
    }
}

/// Image writer backed by a `Vec<u8>`
///
/// Behaves like a flash OTA writer: refuses zero or oversized reservations, refuses
/// writes past the reserved size, and remembers the first error until the next `begin`.
/// Used by host tests and simulators.
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    capacity: u32,
    magic: Option<u8>,
    image: Vec<u8>,
    size: u32,
    error: Option<StorageError>,
    finalized: Option<Vec<u8>>,
    pub begin_calls: usize,
    pub end_calls: usize,
    pub abort_calls: usize,
}

impl MemoryWriter {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            magic: None,
            image: Vec::new(),
            size: 0,
            error: None,
            finalized: None,
            begin_calls: 0,
            end_calls: 0,
            abort_calls: 0,
        }
    }

    /// Require the first image byte to be `magic` at `end` (0xE9 for ESP32 app images)
    pub fn with_magic(mut self, magic: u8) -> Self {
        self.magic = Some(magic);
        self
    }

    /// Bytes received in the current reservation
    pub fn written(&self) -> &[u8] {
        &self.image
    }

    /// Last image that passed `end`
    pub fn finalized(&self) -> Option<&[u8]> {
        self.finalized.as_deref()
    }

    fn fail(&mut self, code: u8) -> StorageError {
        let error = StorageError::new(code);
        self.error = Some(error);
        error
    }
}

impl FirmwareWriter for MemoryWriter {
    type Error = StorageError;

    fn begin(&mut self, size: u32) -> Result<(), StorageError> {
        self.begin_calls += 1;
        self.image.clear();
        self.error = None;
        self.size = 0;

        if size == 0 {
            return Err(self.fail(storage::SIZE));
        }
        if size > self.capacity {
            return Err(self.fail(storage::SPACE));
        }

        self.size = size;
        self.image.reserve(size as usize);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.size == 0 {
            return Err(self.fail(storage::BAD_ARGUMENT));
        }
        if self.image.len() + data.len() > self.size as usize {
            return Err(self.fail(storage::SPACE));
        }
        self.image.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> Result<(), StorageError> {
        self.end_calls += 1;

        if let Some(error) = self.error {
            return Err(error);
        }
        if self.size == 0 {
            return Err(self.fail(storage::BAD_ARGUMENT));
        }
        if self.image.len() != self.size as usize {
            return Err(self.fail(storage::ABORT));
        }
        if let Some(magic) = self.magic {
            if self.image.first() != Some(&magic) {
                return Err(self.fail(storage::MAGIC_BYTE));
            }
        }

        self.finalized = Some(std::mem::take(&mut self.image));
        self.size = 0;
        Ok(())
    }

    fn abort(&mut self) {
        self.abort_calls += 1;
        self.image.clear();
        self.size = 0;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_rejects_zero_and_oversized() {
        let mut w = MemoryWriter::new(16);
        assert_eq!(w.begin(0), Err(StorageError::new(storage::SIZE)));
        assert_eq!(w.begin(17), Err(StorageError::new(storage::SPACE)));
        assert!(w.begin(16).is_ok());
    }

    #[test]
    fn write_past_reservation_is_refused_and_sticky() {
        let mut w = MemoryWriter::new(16);
        w.begin(4).unwrap();
        assert!(w.write(b"abc").is_ok());
        assert_eq!(w.write(b"de"), Err(StorageError::new(storage::SPACE)));
        assert_eq!(w.write(b"d"), Err(StorageError::new(storage::SPACE)));
        assert_eq!(w.end(), Err(StorageError::new(storage::SPACE)));
    }

    #[test]
    fn write_without_begin() {
        let mut w = MemoryWriter::new(16);
        assert_eq!(w.write(b"x"), Err(StorageError::new(storage::BAD_ARGUMENT)));
    }

    #[test]
    fn end_requires_complete_image() {
        let mut w = MemoryWriter::new(16);
        w.begin(8).unwrap();
        w.write(b"half").unwrap();
        assert_eq!(w.end(), Err(StorageError::new(storage::ABORT)));
        assert_eq!(w.finalized(), None);
    }

    #[test]
    fn end_checks_magic() {
        let mut w = MemoryWriter::new(16).with_magic(0xe9);
        w.begin(2).unwrap();
        w.write(&[0x00, 0x01]).unwrap();
        assert_eq!(w.end(), Err(StorageError::new(storage::MAGIC_BYTE)));

        w.begin(2).unwrap();
        w.write(&[0xe9, 0x01]).unwrap();
        assert!(w.end().is_ok());
        assert_eq!(w.finalized(), Some(&[0xe9, 0x01][..]));
    }

    #[test]
    fn abort_clears_reservation() {
        let mut w = MemoryWriter::new(16);
        w.begin(4).unwrap();
        w.write(b"ab").unwrap();
        w.abort();
        assert!(w.written().is_empty());
        assert_eq!(w.write(b"cd"), Err(StorageError::new(storage::BAD_ARGUMENT)));
    }

    #[test]
    fn error_display_names_the_code() {
        assert_eq!(
            StorageError::new(storage::SPACE).to_string(),
            "storage error 4: not enough space"
        );
    }
}

//! Firmware writer on top of the ESP-IDF OTA API
//!
//! Images go to the next OTA app partition. `end` validates the image and makes that
//! partition the boot partition; the running firmware is untouched until a restart.

use esp_idf_svc::ota::EspOta;
use esp_idf_svc::sys::{self, esp, esp_ota_handle_t, esp_partition_t, EspError};
use log::*;
use swup_mcu::{FirmwareWriter, StorageError};
use swup_proto::storage;

pub struct EspOtaWriter {
    partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
}

// The partition pointer refers to the flash-mapped partition table, valid for the
// lifetime of the program.
unsafe impl Send for EspOtaWriter {}

impl EspOtaWriter {
    /// Writer for the partition the next update should go to
    pub fn new() -> Result<Self, StorageError> {
        let partition = unsafe { sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            error!("No OTA update partition, check the partition table");
            return Err(StorageError::new(storage::NO_PARTITION));
        }
        let writer = Self { partition, handle: None };
        info!("OTA partition ready, {} bytes", writer.capacity());
        Ok(writer)
    }

    /// Size of the target partition in bytes
    pub fn capacity(&self) -> u32 {
        unsafe { (*self.partition).size as u32 }
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = esp!(unsafe { sys::esp_ota_abort(handle) }) {
                warn!("esp_ota_abort failed: {:?}", e);
            }
        }
    }
}

fn is(e: &EspError, code: u32) -> bool {
    e.code() == code as i32
}

impl FirmwareWriter for EspOtaWriter {
    type Error = StorageError;

    fn begin(&mut self, size: u32) -> Result<(), StorageError> {
        self.release();

        if size == 0 {
            return Err(StorageError::new(storage::SIZE));
        }
        if size > self.capacity() {
            warn!("Image of {} bytes does not fit in {} bytes", size, self.capacity());
            return Err(StorageError::new(storage::SPACE));
        }

        let mut handle: esp_ota_handle_t = 0;
        esp!(unsafe { sys::esp_ota_begin(self.partition, size as usize, &mut handle) }).map_err(
            |e| {
                warn!("esp_ota_begin failed: {:?}", e);
                let code = if is(&e, sys::ESP_ERR_INVALID_SIZE) {
                    storage::SIZE
                } else if is(&e, sys::ESP_ERR_OTA_PARTITION_CONFLICT)
                    || is(&e, sys::ESP_ERR_NOT_FOUND)
                {
                    storage::NO_PARTITION
                } else if is(&e, sys::ESP_ERR_INVALID_ARG) {
                    storage::BAD_ARGUMENT
                } else {
                    storage::ERASE
                };
                StorageError::new(code)
            },
        )?;

        self.handle = Some(handle);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let handle = self.handle.ok_or(StorageError::new(storage::BAD_ARGUMENT))?;

        esp!(unsafe { sys::esp_ota_write(handle, data.as_ptr().cast(), data.len()) }).map_err(
            |e| {
                warn!("esp_ota_write failed: {:?}", e);
                if is(&e, sys::ESP_ERR_OTA_VALIDATE_FAILED) {
                    StorageError::new(storage::MAGIC_BYTE)
                } else {
                    StorageError::new(storage::WRITE)
                }
            },
        )
    }

    fn end(&mut self) -> Result<(), StorageError> {
        let handle = self.handle.take().ok_or(StorageError::new(storage::BAD_ARGUMENT))?;

        // esp_ota_end frees the handle even when validation fails
        esp!(unsafe { sys::esp_ota_end(handle) }).map_err(|e| {
            error!("esp_ota_end failed: {:?}", e);
            if is(&e, sys::ESP_ERR_OTA_VALIDATE_FAILED) {
                StorageError::new(storage::ACTIVATE)
            } else {
                StorageError::new(storage::WRITE)
            }
        })?;

        esp!(unsafe { sys::esp_ota_set_boot_partition(self.partition) }).map_err(|e| {
            error!("esp_ota_set_boot_partition failed: {:?}", e);
            StorageError::new(storage::ACTIVATE)
        })?;

        info!("New image set as boot partition");
        Ok(())
    }

    fn abort(&mut self) {
        self.release();
    }
}

/// Mark the running image as good so the bootloader does not roll it back
pub fn mark_running_slot_valid() -> anyhow::Result<()> {
    let mut ota = EspOta::new()?;
    ota.mark_running_slot_valid()?;
    info!("OTA: running slot marked valid");
    Ok(())
}

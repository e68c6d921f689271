//! swup MCU Library
//!
//! Device side of the firmware update service.
//!
//! This crate provides:
//! - `UpdateSession`, the size -> data -> checksum state machine
//! - Traits for the storage writer and the BLE notify path
//! - `MemoryWriter`, an in-memory writer for hosts and tests
//!
//! # Example MCU implementations
//! - ESP32: See `swup-esp32`

pub mod ble;
pub mod session;
pub mod storage;

pub use ble::*;
pub use session::*;
pub use storage::*;

//! Update session: one firmware transfer attempt at a time
//!
//! An attempt is `announce_size` -> `write_chunk`* -> `commit`. The session keeps the
//! running CRC-32 of everything it forwarded to storage and only asks storage to
//! finalize the image when the client's checksum matches.

use log::*;
use swup_proto::{Crc32, RESULT_CRC_MISMATCH, RESULT_OK};

use crate::ble::{att, Attribute, GattEvent, ResultNotifier};
use crate::storage::{FirmwareWriter, ResultCode};

/// Where the session is in the current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No accepted size yet, or the last size was refused
    Idle,
    /// Storage is reserving space for an announced size
    Sizing,
    /// Size accepted, chunks are being streamed
    Receiving,
    /// Checksum received, image being verified
    Committing,
    /// Result published; a new size starts the next attempt
    Done,
}

/// How to treat chunks and checksums that arrive outside `Receiving`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    /// Reject them with `SessionError::OutOfOrder`
    #[default]
    Strict,
    /// Forward them anyway, like the first firmware releases did
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest size `announce_size` will pass on to storage
    pub max_image_size: u32,
    pub ordering: OrderingPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_image_size: u32::MAX,
            ordering: OrderingPolicy::Strict,
        }
    }
}

/// Operations that depend on the session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    WriteChunk,
    Commit,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operation::WriteChunk => "data chunk",
            Operation::Commit => "checksum commit",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{operation} not accepted while {phase:?}")]
    OutOfOrder { operation: Operation, phase: Phase },
    #[error("chunk of {len} bytes would exceed declared size ({written}/{expected} written)")]
    Overflow { len: usize, written: u64, expected: u32 },
    #[error("malformed {attribute} payload ({len} bytes)")]
    MalformedPayload { attribute: Attribute, len: usize },
    #[error("storage refused the write: {}", crate::storage::describe(.0))]
    Storage(u8),
    #[error("{0} is not writable")]
    NotWritable(Attribute),
    #[error("{0} is not readable")]
    NotReadable(Attribute),
}

impl SessionError {
    /// ATT error code to reject the GATT request with
    pub fn att_error_code(&self) -> u8 {
        match self {
            SessionError::OutOfOrder { .. } => att::OUT_OF_ORDER,
            SessionError::Overflow { .. } => att::OVERFLOW,
            SessionError::MalformedPayload { .. } => att::INVALID_ATTRIBUTE_VALUE_LENGTH,
            SessionError::Storage(_) => att::STORAGE_FAILURE,
            SessionError::NotWritable(_) => att::WRITE_NOT_PERMITTED,
            SessionError::NotReadable(_) => att::READ_NOT_PERMITTED,
        }
    }
}

/// State of the firmware update service
///
/// Not reentrant: hosts whose BLE callbacks run on several threads must put the
/// session behind a mutex.
pub struct UpdateSession<W, N> {
    writer: W,
    notifier: N,
    config: SessionConfig,
    phase: Phase,
    expected_total_size: u32,
    bytes_written: u64,
    checksum: Option<Crc32>,
    last_result: Option<u8>,
    // storage holds a reservation that was neither finalized nor aborted
    reserved: bool,
}

impl<W: FirmwareWriter, N: ResultNotifier> UpdateSession<W, N> {
    pub fn new(writer: W, notifier: N, config: SessionConfig) -> Self {
        Self {
            writer,
            notifier,
            config,
            phase: Phase::Idle,
            expected_total_size: 0,
            bytes_written: 0,
            checksum: None,
            last_result: None,
            reserved: false,
        }
    }

    /// Start a new attempt for an image of `size` bytes
    ///
    /// Returns whether storage accepted the size. Any attempt in progress is abandoned.
    pub fn announce_size(&mut self, size: u32) -> bool {
        self.checksum = Some(Crc32::new());
        self.bytes_written = 0;
        self.last_result = None;
        self.expected_total_size = 0;

        if self.reserved {
            info!("Abandoning {:?} attempt for a new image size", self.phase);
            self.writer.abort();
            self.reserved = false;
        }

        self.phase = Phase::Sizing;

        let accepted = if size == 0 {
            warn!("Refusing update size 0");
            false
        } else if size > self.config.max_image_size {
            warn!(
                "Refusing update size {}, limit is {}",
                size, self.config.max_image_size
            );
            false
        } else {
            match self.writer.begin(size) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Storage refused update size {}: {:?}", size, e);
                    false
                }
            }
        };

        if accepted {
            self.expected_total_size = size;
            self.reserved = true;
            self.phase = Phase::Receiving;
        } else {
            self.phase = Phase::Idle;
        }
        info!("Setting update size {}, accepted: {}", size, accepted);
        accepted
    }

    /// Feed the next chunk of the image to the checksum and to storage
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.config.ordering == OrderingPolicy::Strict {
            if self.phase != Phase::Receiving {
                warn!("Dropping {} byte chunk while {:?}", data.len(), self.phase);
                return Err(SessionError::OutOfOrder {
                    operation: Operation::WriteChunk,
                    phase: self.phase,
                });
            }
            if self.bytes_written + data.len() as u64 > self.expected_total_size as u64 {
                warn!(
                    "Dropping {} byte chunk, {} of {} bytes already written",
                    data.len(),
                    self.bytes_written,
                    self.expected_total_size
                );
                return Err(SessionError::Overflow {
                    len: data.len(),
                    written: self.bytes_written,
                    expected: self.expected_total_size,
                });
            }
        }

        self.checksum.get_or_insert_with(Crc32::new).update(data);
        self.bytes_written += data.len() as u64;
        debug!("Writing {} bytes ({} total)", data.len(), self.bytes_written);

        self.writer.write(data).map_err(|e| {
            warn!("Storage write failed: {:?}", e);
            SessionError::Storage(e.result_code())
        })
    }

    /// Finish the attempt: compare checksums, finalize the image, publish the result
    pub fn commit(&mut self, expected_checksum: u32) -> Result<u8, SessionError> {
        if self.config.ordering == OrderingPolicy::Strict && self.phase != Phase::Receiving {
            warn!("Ignoring checksum while {:?}", self.phase);
            return Err(SessionError::OutOfOrder {
                operation: Operation::Commit,
                phase: self.phase,
            });
        }

        self.phase = Phase::Committing;
        let actual = self.checksum.take().unwrap_or_default().finalize();
        info!(
            "Expected CRC 0x{:08x}, computed 0x{:08x} over {} bytes",
            expected_checksum, actual, self.bytes_written
        );

        let result = if actual != expected_checksum {
            warn!("Invalid CRC, image not committed");
            RESULT_CRC_MISMATCH
        } else {
            self.reserved = false;
            match self.writer.end() {
                Ok(()) => {
                    info!("OTA done!");
                    RESULT_OK
                }
                Err(e) => {
                    error!("Finalizing image failed: {:?}", e);
                    e.result_code()
                }
            }
        };

        self.last_result = Some(result);
        self.phase = Phase::Done;
        self.notifier.notify(Attribute::Result, &[result]);
        Ok(result)
    }

    /// Result of the last commit in this attempt
    pub fn last_result(&self) -> Option<u8> {
        self.last_result
    }

    /// Value of the total-size attribute: the accepted size, or 0
    pub fn size_value(&self) -> u32 {
        self.expected_total_size
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Dispatch a GATT request
    ///
    /// Writes answer `None`, reads answer the attribute value. A read of the result
    /// before any commit answers an empty value.
    pub fn handle(&mut self, event: GattEvent<'_>) -> Result<Option<Vec<u8>>, SessionError> {
        match event {
            GattEvent::Write { attribute: Attribute::TotalSize, data } => {
                match swup_proto::decode_u32(data) {
                    Ok(size) => {
                        self.announce_size(size);
                        Ok(None)
                    }
                    Err(_) => {
                        // treated as a size of 0 so the client reads back a refusal
                        self.announce_size(0);
                        Err(SessionError::MalformedPayload {
                            attribute: Attribute::TotalSize,
                            len: data.len(),
                        })
                    }
                }
            }
            GattEvent::Write { attribute: Attribute::Data, data } => {
                self.write_chunk(data)?;
                Ok(None)
            }
            GattEvent::Write { attribute: Attribute::Checksum, data } => {
                let expected = swup_proto::decode_u32(data).map_err(|_| {
                    SessionError::MalformedPayload {
                        attribute: Attribute::Checksum,
                        len: data.len(),
                    }
                })?;
                self.commit(expected)?;
                Ok(None)
            }
            GattEvent::Write { attribute: Attribute::Result, .. } => {
                Err(SessionError::NotWritable(Attribute::Result))
            }
            GattEvent::Read { attribute: Attribute::TotalSize } => {
                Ok(Some(swup_proto::encode_u32(self.size_value()).to_vec()))
            }
            GattEvent::Read { attribute: Attribute::Result } => {
                Ok(Some(self.last_result.into_iter().collect()))
            }
            GattEvent::Read { attribute } => Err(SessionError::NotReadable(attribute)),
        }
    }
}

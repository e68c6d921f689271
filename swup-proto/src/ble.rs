//! BLE GATT service definition for firmware updates
//!
//! Four attributes make up the protocol. Clients write total-size, then any number of
//! data chunks, then the checksum, and read (or subscribe to) the result.

/// BLE Service UUID: cb0b9a0b-a84c-4c0d-bdbb-442e3144ee30
pub const SERVICE_UUID: &str = "cb0b9a0b-a84c-4c0d-bdbb-442e3144ee30";

/// Total image size Characteristic UUID (write/read)
pub const TOTAL_SIZE_UUID: &str = "e74dd9c0-a301-4a6f-95a1-f0e1dbea8e1e";

/// Image data Characteristic UUID (write)
pub const DATA_UUID: &str = "e272ebac-d463-4b98-bc84-5cc1a39ee517";

/// CRC-32 Characteristic UUID (write)
pub const CHECKSUM_UUID: &str = "4826129c-c22a-43a3-b066-ce8f0d5bacc6";

/// Result code Characteristic UUID (read/notify)
pub const RESULT_UUID: &str = "5e134862-7411-4424-ac4a-210937432c77";

/// One of the update service's attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// 4-byte LE image size; reads back 0 if the size was refused
    TotalSize,
    /// One chunk of the image per write
    Data,
    /// 4-byte LE CRC-32 of the image; writing it completes the attempt
    Checksum,
    /// 1-byte result code, notified when the attempt completes
    Result,
}

/// GATT access rights of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::TotalSize,
        Attribute::Data,
        Attribute::Checksum,
        Attribute::Result,
    ];

    pub fn uuid(&self) -> &'static str {
        match self {
            Attribute::TotalSize => TOTAL_SIZE_UUID,
            Attribute::Data => DATA_UUID,
            Attribute::Checksum => CHECKSUM_UUID,
            Attribute::Result => RESULT_UUID,
        }
    }

    /// Look up an attribute by UUID, case-insensitively
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.uuid().eq_ignore_ascii_case(uuid))
    }

    pub fn access(&self) -> Access {
        match self {
            Attribute::TotalSize => Access {
                read: true,
                write: true,
                notify: false,
            },
            Attribute::Data | Attribute::Checksum => Access {
                read: false,
                write: true,
                notify: false,
            },
            Attribute::Result => Access {
                read: true,
                write: false,
                notify: true,
            },
        }
    }

    /// User description descriptor text
    pub fn description(&self) -> &'static str {
        match self {
            Attribute::TotalSize => "total image size",
            Attribute::Data => "data",
            Attribute::Checksum => "crc32",
            Attribute::Result => "result code",
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Attribute::TotalSize => "total-size",
            Attribute::Data => "data",
            Attribute::Checksum => "checksum",
            Attribute::Result => "result",
        })
    }
}

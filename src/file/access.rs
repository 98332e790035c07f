//! File and SDM access rights: 4-bit access conditions packed two per byte

use crate::error::{Error, Result};

/// Who may perform an operation on a file: a specific application key,
/// anyone, or no one
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessCondition {
    /// One of the card's five application keys (`0..=4`)
    Key(u8),

    /// Free access without authentication (`0xE`)
    Free,

    /// Access permanently denied (`0xF`)
    Never,
}

impl AccessCondition {
    /// Decode a 4-bit access condition
    pub fn from_u8(nibble: u8) -> Result<Self> {
        match nibble {
            n @ 0..=4 => Ok(AccessCondition::Key(n)),
            0xE => Ok(AccessCondition::Free),
            0xF => Ok(AccessCondition::Never),
            other => Err(Error::Validation(format!(
                "access condition 0x{:X} is not a key number, free, or never",
                other
            ))),
        }
    }

    /// Encode as a 4-bit value, rejecting out-of-range key numbers
    pub(crate) fn encode(self, field: &str) -> Result<u8> {
        match self {
            AccessCondition::Key(n @ 0..=4) => Ok(n),
            AccessCondition::Key(n) => Err(Error::Validation(format!(
                "{}: key number {} out of range 0..=4",
                field, n
            ))),
            AccessCondition::Free => Ok(0xE),
            AccessCondition::Never => Ok(0xF),
        }
    }

    /// Is this the `Never` condition?
    pub fn is_never(self) -> bool {
        self == AccessCondition::Never
    }

    /// Is this the `Free` condition?
    pub fn is_free(self) -> bool {
        self == AccessCondition::Free
    }

    /// The key number, if this condition names one
    pub fn key_number(self) -> Option<u8> {
        match self {
            AccessCondition::Key(n) => Some(n),
            _ => None,
        }
    }
}

/// The four access conditions attached to every file
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileAccessRights {
    /// Who may read
    pub read: AccessCondition,

    /// Who may write
    pub write: AccessCondition,

    /// Who may both read and write
    pub read_write: AccessCondition,

    /// Who may change these settings
    pub change: AccessCondition,
}

impl FileAccessRights {
    /// Pack into the two wire bytes: `(read_write << 4) | change`,
    /// `(read << 4) | write`
    pub(crate) fn to_bytes(self) -> Result<[u8; 2]> {
        Ok([
            (self.read_write.encode("read_write")? << 4) | self.change.encode("change")?,
            (self.read.encode("read")? << 4) | self.write.encode("write")?,
        ])
    }

    /// Unpack from the two wire bytes
    pub(crate) fn from_bytes(bytes: [u8; 2]) -> Result<Self> {
        Ok(Self {
            read_write: AccessCondition::from_u8(bytes[0] >> 4)?,
            change: AccessCondition::from_u8(bytes[0] & 0x0F)?,
            read: AccessCondition::from_u8(bytes[1] >> 4)?,
            write: AccessCondition::from_u8(bytes[1] & 0x0F)?,
        })
    }
}

/// Access conditions governing Secure Dynamic Messaging
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SdmAccessRights {
    /// Who may read the mirrored PICC metadata (UID, read counter).
    /// A key number selects encrypted PICC data; `Free` mirrors in
    /// plaintext; `Never` disables metadata mirroring.
    pub meta_read: AccessCondition,

    /// Key deriving the SDM file-read MAC, or `Never`. `Free` is not
    /// assignable here.
    pub file_read: AccessCondition,

    /// Who may issue `GetFileCounters`
    pub counter_retrieval: AccessCondition,
}

impl SdmAccessRights {
    /// Pack into the two wire bytes: `0xF0 | counter_retrieval`,
    /// `(meta_read << 4) | file_read`
    pub(crate) fn to_bytes(self) -> Result<[u8; 2]> {
        if self.file_read.is_free() {
            return Err(Error::Validation(
                "file_read: SDM file read cannot be free".to_owned(),
            ));
        }

        Ok([
            0xF0 | self.counter_retrieval.encode("counter_retrieval")?,
            (self.meta_read.encode("meta_read")? << 4) | self.file_read.encode("file_read")?,
        ])
    }

    /// Unpack from the two wire bytes
    pub(crate) fn from_bytes(bytes: [u8; 2]) -> Result<Self> {
        let file_read = AccessCondition::from_u8(bytes[1] & 0x0F)?;
        if file_read.is_free() {
            return Err(Error::Validation(
                "file_read: SDM file read cannot be free".to_owned(),
            ));
        }

        Ok(Self {
            counter_retrieval: AccessCondition::from_u8(bytes[0] & 0x0F)?,
            meta_read: AccessCondition::from_u8(bytes[1] >> 4)?,
            file_read,
        })
    }
}

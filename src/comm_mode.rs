//! Communication modes for NTAG 424 DNA commands

use crate::error::{Error, Result};

/// Protection applied to a command/response exchange.
///
/// The numeric value is the 2-bit encoding used in file options and access
/// rights structures; `0b10` is not assigned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommMode {
    /// No protection
    Plain,

    /// Truncated AES-CMAC over request and response
    Mac,

    /// Encrypt-then-MAC
    Full,
}

impl CommMode {
    /// Wire encoding of this mode (2 bits)
    pub fn to_u8(self) -> u8 {
        match self {
            CommMode::Plain => 0b00,
            CommMode::Mac => 0b01,
            CommMode::Full => 0b11,
        }
    }

    /// Decode a 2-bit wire value into a `CommMode` (if assigned)
    pub fn from_u8(bits: u8) -> Result<Self> {
        match bits {
            0b00 => Ok(CommMode::Plain),
            0b01 => Ok(CommMode::Mac),
            0b11 => Ok(CommMode::Full),
            other => Err(Error::UnsupportedVariant(format!(
                "CommMode encoding 0b{:02b}",
                other
            ))),
        }
    }
}

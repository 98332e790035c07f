//! AES-128 application keys

use std::fmt::{self, Debug};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Key size in bytes: the NTAG 424 DNA holds five AES-128 keys
pub const SIZE: usize = 16;

/// An AES-128 application key (one of the card's five key slots)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; SIZE]);

impl Key {
    /// Create a `Key` from a 16-byte slice, returning an error if the
    /// slice is the wrong length
    pub fn from_slice(key_slice: &[u8]) -> Result<Self> {
        if key_slice.len() != SIZE {
            return Err(Error::Validation(format!(
                "expected a {}-byte key, got {}",
                SIZE,
                key_slice.len()
            )));
        }

        let mut key_bytes = [0u8; SIZE];
        key_bytes.copy_from_slice(key_slice);

        Ok(Key(key_bytes))
    }

    /// Borrow the raw key bytes
    pub(crate) fn as_bytes(&self) -> &[u8; SIZE] {
        &self.0
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid leaking secrets in debug messages
        write!(f, "ntag424::Key(...)")
    }
}

impl From<[u8; SIZE]> for Key {
    fn from(key_bytes: [u8; SIZE]) -> Key {
        Key(key_bytes)
    }
}

//! Responses returned by the card after executing a command

use crate::error::{Error, Result};

/// A card response: the 2-byte status word and any payload preceding it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Raw status bytes (`SW1 SW2`)
    status: [u8; 2],

    /// Payload preceding the status, if any
    data: Option<Vec<u8>>,
}

impl Message {
    /// Split raw reader bytes into payload and trailing status word
    pub(crate) fn parse(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedResponse(format!(
                "response too short: {} bytes (expected at least 2)",
                bytes.len()
            )));
        }

        let sw2 = bytes.pop().expect("length checked");
        let sw1 = bytes.pop().expect("length checked");

        Ok(Self {
            status: [sw1, sw2],
            data: if bytes.is_empty() { None } else { Some(bytes) },
        })
    }

    /// Assemble a response from an already-split status and payload
    pub(crate) fn new(status: [u8; 2], data: Option<Vec<u8>>) -> Self {
        Self { status, data }
    }

    /// Raw status bytes (`SW1 SW2`)
    pub fn status(&self) -> [u8; 2] {
        self.status
    }

    /// First status byte
    pub fn sw1(&self) -> u8 {
        self.status[0]
    }

    /// Second status byte
    pub fn sw2(&self) -> u8 {
        self.status[1]
    }

    /// Response payload, if any
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Consume the response, returning its payload
    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }

    /// Was the command accepted? `SW2 = 0xAF` counts as OK: it announces an
    /// additional frame during the authentication exchange.
    pub fn is_ok(&self) -> bool {
        matches!(self.status[0], 0x90 | 0x91) && matches!(self.status[1], 0x00 | 0xAF)
    }

    /// Return the response unchanged if OK, the status word as an error
    /// otherwise
    pub(crate) fn require_ok(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Card {
                sw1: self.status[0],
                sw2: self.status[1],
            })
        }
    }
}

//! ISO 7816-4 command framing.
//!
//! Short-form frames only: the validated reader class caps responses at
//! 0x80 bytes, so extended `Lc`/`Le` and chained reads are never needed.

use super::Code;

/// Class byte for native (wrapped) NXP commands
const NATIVE_CLA: u8 = 0x90;

/// An ISO 7816-4 command APDU
#[derive(Clone, Debug)]
pub(crate) struct Message {
    /// Class byte
    pub cla: u8,

    /// Instruction byte
    pub ins: u8,

    /// First parameter byte
    pub p1: u8,

    /// Second parameter byte
    pub p2: u8,

    /// Command data field, if any
    pub data: Option<Vec<u8>>,

    /// Expected-length byte; `0x00` means "up to the reader maximum"
    pub le: Option<u8>,
}

impl Message {
    /// Create a plain ISO frame
    pub fn iso(cla: u8, ins: u8, p1: u8, p2: u8, data: Option<Vec<u8>>, le: Option<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        }
    }

    /// Create a native NXP frame: an ISO frame with `CLA = 0x90`,
    /// `P1 = P2 = 0x00`, `Le = 0x00` and the native payload as data
    pub fn native(code: Code, payload: Vec<u8>) -> Self {
        Self {
            cla: NATIVE_CLA,
            ins: code.to_u8(),
            p1: 0x00,
            p2: 0x00,
            data: if payload.is_empty() {
                None
            } else {
                Some(payload)
            },
            le: Some(0x00),
        }
    }

    /// Serialize into wire bytes: `CLA INS P1 P2 [Lc data] [Le]`
    pub fn serialize(&self) -> Vec<u8> {
        let data_len = self.data.as_ref().map_or(0, Vec::len);
        let mut frame = Vec::with_capacity(4 + data_len + 2);

        frame.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if let Some(data) = &self.data {
            frame.push((data.len() & 0xFF) as u8);
            frame.extend_from_slice(data);
        }

        if let Some(le) = self.le {
            frame.push(le);
        }

        frame
    }
}

//! Reader transport abstraction.
//!
//! The engine is transport-agnostic: anything that can carry one ISO 7816
//! T=1 APDU to the card and hand back the complete response (status word
//! included) can drive a session. PC/SC, CCID or test doubles all plug in
//! here.

use crate::error::Result;

/// Response-length hint passed to the reader on every exchange. Matches
/// the validated reader class; larger responses are not supported and no
/// chained-read attempt is made.
pub const MAX_RESPONSE_LEN: u8 = 0x80;

/// A byte-in/byte-out APDU pipe to the card
pub trait ReaderPort {
    /// Deliver `frame` as a single APDU and return the complete response,
    /// terminated by the 2-byte status word.
    ///
    /// `max_response_len` is informational. Failures map to
    /// [`Error::Transport`](crate::Error::Transport) and leave the session
    /// untouched.
    fn transmit(&mut self, frame: &[u8], max_response_len: u8) -> Result<Vec<u8>>;
}

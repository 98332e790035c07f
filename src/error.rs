//! Error types

use thiserror::Error;

/// Result type with the `ntag424` crate's [`Error`]
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the session engine and its codecs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Reader transport failure. The session state (command counter,
    /// authentication) is never mutated when this is returned.
    #[error("reader transport error: {0}")]
    Transport(String),

    /// Response was structurally invalid: shorter than the 2-byte status
    /// word, or the wrong length for a fixed-layout reply
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The card returned a status word outside the OK set
    #[error("card error: SW1=0x{sw1:02X} SW2=0x{sw2:02X}")]
    Card {
        /// First status byte
        sw1: u8,
        /// Second status byte
        sw2: u8,
    },

    /// The `RndA` round-trip failed during `AuthenticateEV2First`.
    /// Transient: the engine is left unauthenticated and the caller may
    /// retry.
    #[error("authentication failed: RndA round-trip mismatch")]
    AuthMismatch,

    /// The MAC on a card response did not verify. Security-fatal: the
    /// caller must not trust any data from this exchange.
    #[error("response MAC mismatch")]
    ResponseMacMismatch,

    /// A fully-encrypted command was attempted without an authenticated
    /// session
    #[error("not authenticated: CommMode::Full requires a session")]
    NotAuthenticated,

    /// Range or invariant violation in codec inputs (file settings,
    /// configuration, key lengths). Raised before any I/O occurs.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown CommMode encoding, file type, or SDM encoding mode
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),

    /// CBC plaintext is missing the ISO 9797-1 `0x80` padding marker
    #[error("malformed padding: no 0x80 marker in plaintext")]
    MalformedPadding,

    /// Two buffers that must be the same length were not
    #[error("length mismatch: {0} vs {1}")]
    LengthMismatch(usize, usize),
}

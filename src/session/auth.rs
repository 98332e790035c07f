//! EV2 session keys.
//!
//! `AuthenticateEV2First` ends with the card returning `E(Kx, TI || RndA'
//! || PDcap2 || PCDcap2)`. Decrypting it closes the mutual-authentication
//! loop (the card must have rotated our `RndA`) and feeds the session
//! vectors from AN12196 §6.6.2 that the session keys are derived from.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    crypto,
    error::{Error, Result},
    key::Key,
};

/// Transaction identifier size in bytes
pub(crate) const TI_SIZE: usize = 4;

/// Length of the encrypted card response closing the exchange:
/// `TI || RndA' || PDcap2 || PCDcap2`
const CARD_RESPONSE_SIZE: usize = 32;

/// Session secrets installed by a successful `AuthenticateEV2First`.
/// Immutable once installed; replaced atomically by re-authentication.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct AuthState {
    /// Transaction identifier chosen by the card
    pub ti: [u8; TI_SIZE],

    /// Session encryption key (`SesAuthEncKey`)
    pub enc_key: [u8; crypto::KEY_SIZE],

    /// Session MAC key (`SesAuthMacKey`)
    pub mac_key: [u8; crypto::KEY_SIZE],
}

/// Derive the session keys from the card's final authentication response.
///
/// Verifies the `RndA` round-trip before deriving anything: the card
/// proves knowledge of the key by returning our nonce rotated left.
pub(crate) fn derive_session_keys(
    key: &Key,
    ec_card_response: &[u8],
    rnd_a: &[u8; 16],
    rnd_b: &[u8; 16],
) -> Result<AuthState> {
    if ec_card_response.len() != CARD_RESPONSE_SIZE {
        return Err(Error::MalformedResponse(format!(
            "authentication response length {} (expected {})",
            ec_card_response.len(),
            CARD_RESPONSE_SIZE
        )));
    }

    let plain = crypto::cbc_decrypt(
        key.as_bytes(),
        &[0u8; crypto::BLOCK_SIZE],
        ec_card_response,
        false,
    )?;

    let mut ti = [0u8; TI_SIZE];
    ti.copy_from_slice(&plain[..TI_SIZE]);

    let rnd_a_rotated = &plain[TI_SIZE..TI_SIZE + 16];
    let rnd_a_echo = crypto::rotate_right(rnd_a_rotated);
    if rnd_a_echo.as_slice().ct_eq(&rnd_a[..]).unwrap_u8() != 1 {
        return Err(Error::AuthMismatch);
    }

    let xor6 = crypto::xor(&rnd_a[2..8], &rnd_b[0..6])?;

    let mut sv1 = Vec::with_capacity(32);
    sv1.extend_from_slice(&[0xA5, 0x5A, 0x00, 0x01, 0x00, 0x80]);
    sv1.extend_from_slice(&rnd_a[0..2]);
    sv1.extend_from_slice(&xor6);
    sv1.extend_from_slice(&rnd_b[6..16]);
    sv1.extend_from_slice(&rnd_a[8..16]);

    let mut sv2 = sv1.clone();
    sv2[0] = 0x5A;
    sv2[1] = 0xA5;

    Ok(AuthState {
        ti,
        enc_key: crypto::cmac(key.as_bytes(), &sv1),
        mac_key: crypto::cmac(key.as_bytes(), &sv2),
    })
}

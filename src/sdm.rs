//! Offline validation of Secure Dynamic Messaging data.
//!
//! An SDM-enabled tag mirrors encrypted PICC data and a truncated CMAC
//! into the URL it serves. Both can be checked offline, without a reader:
//! decrypt the PICC data with the meta-read key, then recompute the MAC
//! with the file-read key over the recovered UID and read counter.

use subtle::ConstantTimeEq;

use crate::{
    crypto,
    error::{Error, Result},
    key::Key,
};

/// PICC data tag bit: UID present
const TAG_UID: u8 = 0x80;

/// PICC data tag bit: read counter present
const TAG_READ_COUNTER: u8 = 0x40;

/// UID and read counter recovered from a tag's mirrored PICC data
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PiccData {
    /// 7-byte card UID, if mirrored
    pub uid: Option<[u8; 7]>,

    /// SDM read counter, if mirrored
    pub read_counter: Option<u32>,
}

/// Decrypt a 16-byte encrypted PICC data block.
///
/// The first plaintext byte tags which fields follow: bit 7 the UID,
/// bit 6 the read counter. Its low bits carry variant information and are
/// not interpreted.
pub fn decrypt_picc_data(decryption_key: &Key, encrypted_picc: &[u8; 16]) -> Result<PiccData> {
    let plain = crypto::cbc_decrypt(
        decryption_key.as_bytes(),
        &[0u8; crypto::BLOCK_SIZE],
        encrypted_picc,
        false,
    )?;

    let tag = plain[0];
    let mut rest = &plain[1..];

    let uid = if tag & TAG_UID != 0 {
        let mut uid = [0u8; 7];
        uid.copy_from_slice(&rest[..7]);
        rest = &rest[7..];
        Some(uid)
    } else {
        None
    };

    let read_counter = if tag & TAG_READ_COUNTER != 0 {
        Some(u32::from_le_bytes([rest[0], rest[1], rest[2], 0]))
    } else {
        None
    };

    Ok(PiccData { uid, read_counter })
}

/// Check a truncated SDM MAC against the UID and read counter it signs.
///
/// The file-read session key is derived per AN12196: CMAC over the
/// `3C C3 00 01 00 80` session vector carrying the UID and counter, then
/// a CMAC over the empty message, truncated. The comparison is
/// constant-time.
pub fn verify_mac(mac_key: &Key, picc: &PiccData, signature_mac: &[u8; 8]) -> Result<bool> {
    let mut sv = Vec::with_capacity(crypto::BLOCK_SIZE);
    sv.extend_from_slice(&[0x3C, 0xC3, 0x00, 0x01, 0x00, 0x80]);

    if let Some(uid) = &picc.uid {
        sv.extend_from_slice(uid);
    }

    if let Some(counter) = picc.read_counter {
        if counter > 0x00FF_FFFF {
            return Err(Error::Validation(format!(
                "read counter {} does not fit in 3 bytes",
                counter
            )));
        }
        sv.extend_from_slice(&counter.to_le_bytes()[..3]);
    }

    if sv.len() > crypto::BLOCK_SIZE {
        return Err(Error::Validation(format!(
            "SDM session vector length {} exceeds one block",
            sv.len()
        )));
    }
    sv.resize(crypto::BLOCK_SIZE, 0x00);

    let file_read_mac_key = crypto::cmac(mac_key.as_bytes(), &sv);
    let expected = crypto::reduce_mac(&crypto::cmac(&file_read_mac_key, &[]));

    Ok(expected.ct_eq(signature_mac).into())
}

/// Decrypt mirrored PICC data and verify its MAC in one step.
///
/// Returns the recovered fields on a valid signature, `None` on any
/// mismatch.
pub fn decrypt_and_verify(
    decryption_key: &Key,
    mac_key: &Key,
    encrypted_picc: &[u8; 16],
    signature_mac: &[u8; 8],
) -> Result<Option<PiccData>> {
    let picc = decrypt_picc_data(decryption_key, encrypted_picc)?;

    if verify_mac(mac_key, &picc, signature_mac)? {
        Ok(Some(picc))
    } else {
        Ok(None)
    }
}

//! AES primitives shared by the dispatcher, the authentication exchange
//! and the offline SDM validator.
//!
//! The NTAG 424 DNA pads with ISO 9797-1 method 2 (append `0x80`, zero-fill
//! to the block boundary) rather than PKCS#7, so padding is applied and
//! stripped here and the cipher layer always runs with `NoPadding`.

use aes::{
    cipher::{
        block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncrypt,
        BlockEncryptMut, KeyInit, KeyIvInit,
    },
    Aes128,
};
use cmac::{Cmac, Mac};
use crc::{Crc, CRC_32_JAMCRC};

use crate::error::{Error, Result};

/// AES-128 key size in bytes
pub(crate) const KEY_SIZE: usize = 16;

/// AES block size in bytes
pub(crate) const BLOCK_SIZE: usize = 16;

/// Size of a truncated CMAC as it appears on the wire
pub(crate) const MAC_SIZE: usize = 8;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// CRC-32/JAMCRC, the bitwise complement of CRC-32/ISO-HDLC
const CRC_JAM: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// Encrypt with AES-128-ECB. The input must already be block-aligned;
/// nothing here adds padding.
pub(crate) fn ecb_encrypt(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Validation(format!(
            "ECB input length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let cipher = Aes128::new(key.into());
    let mut out = data.to_vec();

    for block in out.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    Ok(out)
}

/// Encrypt with AES-128-CBC.
///
/// With `pad` set, ISO 9797-1 M/2 padding is appended first; block-aligned
/// input gains a full `80 00 … 00` block. Without it, unaligned input is
/// rejected.
pub(crate) fn cbc_encrypt(
    key: &[u8; KEY_SIZE],
    iv: &[u8; BLOCK_SIZE],
    data: &[u8],
    pad: bool,
) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();

    if pad {
        buf.push(0x80);
        while buf.len() % BLOCK_SIZE != 0 {
            buf.push(0x00);
        }
    } else if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::Validation(format!(
            "CBC input length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let msg_len = buf.len();
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, msg_len)
        .map_err(|_| Error::Validation("CBC encrypt buffer undersized".to_owned()))?;

    Ok(buf)
}

/// Decrypt with AES-128-CBC.
///
/// With `strip_padding` set, the plaintext is truncated at the last `0x80`
/// byte; a plaintext with no marker fails.
pub(crate) fn cbc_decrypt(
    key: &[u8; KEY_SIZE],
    iv: &[u8; BLOCK_SIZE],
    data: &[u8],
    strip_padding: bool,
) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Validation(format!(
            "CBC input length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let mut buf = data.to_vec();
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::MalformedPadding)?;

    if strip_padding {
        match buf.iter().rposition(|&b| b == 0x80) {
            Some(marker) => buf.truncate(marker),
            None => return Err(Error::MalformedPadding),
        }
    }

    Ok(buf)
}

/// AES-CMAC (NIST SP 800-38B) over `msg`
pub(crate) fn cmac(key: &[u8; KEY_SIZE], msg: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(key.into());
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Truncate a full CMAC to the 8 bytes at odd indices (the
/// "even-numbered bytes, 1-indexed" rule from AN12196)
pub(crate) fn reduce_mac(mac: &[u8; 16]) -> [u8; MAC_SIZE] {
    let mut out = [0u8; MAC_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = mac[2 * i + 1];
    }
    out
}

/// CRC-32/JAMCRC checksum, as appended (little-endian) to `ChangeKey`
/// payloads
pub(crate) fn crcjam(data: &[u8]) -> u32 {
    CRC_JAM.checksum(data)
}

/// Rotate a buffer left by one byte, wrapping
pub(crate) fn rotate_left(buf: &[u8]) -> Vec<u8> {
    let mut out = buf.to_vec();
    if !out.is_empty() {
        out.rotate_left(1);
    }
    out
}

/// Rotate a buffer right by one byte, wrapping
pub(crate) fn rotate_right(buf: &[u8]) -> Vec<u8> {
    let mut out = buf.to_vec();
    if !out.is_empty() {
        out.rotate_right(1);
    }
    out
}

/// Byte-wise XOR of two equal-length buffers
pub(crate) fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    if a.len() != b.len() {
        return Err(Error::LengthMismatch(a.len(), b.len()));
    }

    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}

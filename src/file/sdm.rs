//! Secure Dynamic Messaging options within a file's settings.
//!
//! The SDM section of a settings buffer is length-varying: which 3-byte
//! offsets follow the flag and access bytes depends on both the flag bits
//! and the SDM access rights, and several fields constrain each other.
//! Serializing validates everything against [`TagParams`] before a single
//! byte of I/O happens.

use super::{put_u24, Cursor, SdmAccessRights, TagParams};
use crate::error::{Error, Result};

/// Flag bit: UID mirroring enabled
const OPT_UID: u8 = 0x80;

/// Flag bit: read-counter mirroring enabled
const OPT_READ_COUNTER: u8 = 0x40;

/// Flag bit: read-counter limit present
const OPT_READ_COUNTER_LIMIT: u8 = 0x20;

/// Flag bit: encrypted file data slice present
const OPT_ENCRYPTED_FILE_DATA: u8 = 0x10;

/// Flag bit: ASCII encoding of mirrored data
const OPT_ASCII: u8 = 0x01;

/// How mirrored data is encoded into the file. ASCII is the only mode the
/// card assigns.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SdmEncoding {
    /// Hex-ASCII mirroring
    #[default]
    Ascii,
}

/// A slice of the file body that SDM re-encrypts on every read
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EncryptedFileData {
    /// Offset of the slice within the file
    pub offset: u32,

    /// Length of the slice; a multiple of 32
    pub length: u32,
}

/// Secure Dynamic Messaging configuration for a standard data file
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SdmOptions {
    /// SDM access rights
    pub access: SdmAccessRights,

    /// Offset of the plaintext UID mirror; meaningful only while
    /// `meta_read` is free
    pub uid_offset: Option<u32>,

    /// Offset of the plaintext read-counter mirror; meaningful only while
    /// `meta_read` is free
    pub read_counter_offset: Option<u32>,

    /// Offset of the encrypted PICC data; required while `meta_read` is a
    /// key, forbidden while it is never
    pub picc_data_offset: Option<u32>,

    /// Start of the region covered by the SDM MAC; required while
    /// `file_read` is enabled
    pub mac_input_offset: Option<u32>,

    /// Offset of the mirrored MAC itself; required while `file_read` is
    /// enabled
    pub mac_offset: Option<u32>,

    /// Optional encrypted file data slice
    pub encrypted_file_data: Option<EncryptedFileData>,

    /// Stop mirroring once the read counter reaches this value
    pub read_counter_limit: Option<u32>,

    /// Mirror encoding
    pub encoding: SdmEncoding,
}

impl SdmOptions {
    pub(super) fn serialize_into(&self, out: &mut Vec<u8>, params: &TagParams) -> Result<()> {
        let mut flags = OPT_ASCII;
        if self.uid_offset.is_some() {
            flags |= OPT_UID;
        }
        if self.read_counter_offset.is_some() {
            flags |= OPT_READ_COUNTER;
        }
        if self.read_counter_limit.is_some() {
            flags |= OPT_READ_COUNTER_LIMIT;
        }
        if self.encrypted_file_data.is_some() {
            flags |= OPT_ENCRYPTED_FILE_DATA;
        }

        out.push(flags);
        out.extend_from_slice(&self.access.to_bytes()?);

        if self.access.meta_read.is_free() {
            if let Some(offset) = self.uid_offset {
                check_mirror_range(offset, params.encoded_uid_length, params, "uid_offset")?;
                put_u24(out, offset, "uid_offset")?;
            }
            if let Some(offset) = self.read_counter_offset {
                check_mirror_range(
                    offset,
                    params.encoded_read_counter_length,
                    params,
                    "read_counter_offset",
                )?;
                put_u24(out, offset, "read_counter_offset")?;
            }
        } else if self.access.meta_read.is_never() {
            if self.picc_data_offset.is_some() {
                return Err(Error::Validation(
                    "picc_data_offset is forbidden while SDM meta read is disabled".to_owned(),
                ));
            }
        } else {
            let offset = self.picc_data_offset.ok_or_else(|| {
                Error::Validation(
                    "picc_data_offset is required while SDM meta read uses a key".to_owned(),
                )
            })?;
            check_mirror_range(offset, params.picc_data_length, params, "picc_data_offset")?;
            put_u24(out, offset, "picc_data_offset")?;
        }

        if !self.access.file_read.is_never() {
            self.serialize_mac_fields(out, params)?;
        }

        if let Some(limit) = self.read_counter_limit {
            put_u24(out, limit, "read_counter_limit")?;
        }

        Ok(())
    }

    fn serialize_mac_fields(&self, out: &mut Vec<u8>, params: &TagParams) -> Result<()> {
        let mac_input_offset = self.mac_input_offset.ok_or_else(|| {
            Error::Validation(
                "mac_input_offset is required while SDM file read is enabled".to_owned(),
            )
        })?;
        let mac_offset = self.mac_offset.ok_or_else(|| {
            Error::Validation("mac_offset is required while SDM file read is enabled".to_owned())
        })?;

        if mac_input_offset > mac_offset {
            return Err(Error::Validation(format!(
                "mac_input_offset {} exceeds mac_offset {}",
                mac_input_offset, mac_offset
            )));
        }

        put_u24(out, mac_input_offset, "mac_input_offset")?;

        if let Some(enc) = &self.encrypted_file_data {
            if enc.offset < mac_input_offset || u64::from(enc.offset) + 32 >= u64::from(mac_offset)
            {
                return Err(Error::Validation(format!(
                    "encrypted_file_data.offset {} outside [{}, {})",
                    enc.offset,
                    mac_input_offset,
                    i64::from(mac_offset) - 32
                )));
            }
            if enc.length < 32 || enc.length % 32 != 0 {
                return Err(Error::Validation(format!(
                    "encrypted_file_data.length {} must be a non-zero multiple of 32",
                    enc.length
                )));
            }
            if u64::from(enc.offset) + u64::from(enc.length) >= u64::from(mac_offset) {
                return Err(Error::Validation(format!(
                    "encrypted_file_data.length {} leaves no room for the MAC before offset {}",
                    enc.length, mac_offset
                )));
            }

            put_u24(out, enc.offset, "encrypted_file_data.offset")?;
            put_u24(out, enc.length, "encrypted_file_data.length")?;
        }

        if u64::from(mac_offset) + 16 >= u64::from(params.file_size) {
            return Err(Error::Validation(format!(
                "mac_offset {} leaves no room for the 16-byte mirror before file end {}",
                mac_offset, params.file_size
            )));
        }

        put_u24(out, mac_offset, "mac_offset")?;
        Ok(())
    }

    pub(super) fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let flags = cur.take_u8("SDM options")?;
        if flags & OPT_ASCII == 0 {
            return Err(Error::UnsupportedVariant(
                "non-ASCII SDM encoding mode".to_owned(),
            ));
        }

        let access = SdmAccessRights::from_bytes([
            cur.take_u8("SDM access rights")?,
            cur.take_u8("SDM access rights")?,
        ])?;

        let mut options = Self {
            access,
            uid_offset: None,
            read_counter_offset: None,
            picc_data_offset: None,
            mac_input_offset: None,
            mac_offset: None,
            encrypted_file_data: None,
            read_counter_limit: None,
            encoding: SdmEncoding::Ascii,
        };

        if access.meta_read.is_free() {
            if flags & OPT_UID != 0 {
                options.uid_offset = Some(cur.take_u24("uid_offset")?);
            }
            if flags & OPT_READ_COUNTER != 0 {
                options.read_counter_offset = Some(cur.take_u24("read_counter_offset")?);
            }
        } else if !access.meta_read.is_never() {
            options.picc_data_offset = Some(cur.take_u24("picc_data_offset")?);
        }

        if !access.file_read.is_never() {
            options.mac_input_offset = Some(cur.take_u24("mac_input_offset")?);
            if flags & OPT_ENCRYPTED_FILE_DATA != 0 {
                options.encrypted_file_data = Some(EncryptedFileData {
                    offset: cur.take_u24("encrypted_file_data.offset")?,
                    length: cur.take_u24("encrypted_file_data.length")?,
                });
            }
            options.mac_offset = Some(cur.take_u24("mac_offset")?);
        }

        if flags & OPT_READ_COUNTER_LIMIT != 0 {
            options.read_counter_limit = Some(cur.take_u24("read_counter_limit")?);
        }

        Ok(options)
    }
}

/// A plaintext mirror must fit between its offset and the end of the file
fn check_mirror_range(offset: u32, encoded_len: u32, params: &TagParams, field: &str) -> Result<()> {
    if u64::from(offset) + u64::from(encoded_len) >= u64::from(params.file_size) {
        return Err(Error::Validation(format!(
            "{} {} out of range for a {}-byte file (mirror length {})",
            field, offset, params.file_size, encoded_len
        )));
    }

    Ok(())
}

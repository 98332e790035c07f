//! Settings of a standard data file: the `GetFileSettings` /
//! `ChangeFileSettings` wire codec

use super::{Cursor, FileAccessRights, SdmOptions};
use crate::{
    comm_mode::CommMode,
    error::{Error, Result},
};

/// File option bit: Secure Dynamic Messaging enabled
const OPTION_SDM: u8 = 0x40;

/// File option bits reserved for future use (bits 2..6)
const OPTION_RFU_MASK: u8 = 0x3C;

/// Physical properties of the standard data file, needed to validate the
/// mirror offsets in [`SdmOptions`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TagParams {
    /// Size of the file body in bytes
    pub file_size: u32,

    /// Length of the hex-ASCII UID mirror
    pub encoded_uid_length: u32,

    /// Length of the hex-ASCII read-counter mirror
    pub encoded_read_counter_length: u32,

    /// Length of the hex-ASCII encrypted PICC data mirror
    pub picc_data_length: u32,
}

/// Settings of a standard data file
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSettings {
    /// Secure Dynamic Messaging configuration, if enabled
    pub sdm_options: Option<SdmOptions>,

    /// Communication mode required for file operations
    pub comm_mode: CommMode,

    /// The file's access conditions
    pub access: FileAccessRights,
}

impl FileSettings {
    /// Serialize as a `ChangeFileSettings` payload, validating every
    /// cross-field rule and mirror range against `params` first
    pub fn serialize(&self, params: &TagParams) -> Result<Vec<u8>> {
        let mut file_option = self.comm_mode.to_u8();
        if self.sdm_options.is_some() {
            file_option |= OPTION_SDM;
        }

        let mut out = vec![file_option];
        out.extend_from_slice(&self.access.to_bytes()?);

        if let Some(sdm) = &self.sdm_options {
            sdm.serialize_into(&mut out, params)?;
        }

        Ok(out)
    }

    /// Decode the settings body shared by `GetFileSettings` responses
    /// (after the file type byte and size have been consumed)
    fn parse_body(cur: &mut Cursor<'_>, file_option: u8) -> Result<Self> {
        if file_option & OPTION_RFU_MASK != 0 {
            return Err(Error::Validation(format!(
                "reserved file option bits set: 0x{:02X}",
                file_option
            )));
        }

        let comm_mode = CommMode::from_u8(file_option & 0b11)?;
        let access = FileAccessRights::from_bytes([
            cur.take_u8("access rights")?,
            cur.take_u8("access rights")?,
        ])?;

        Ok(Self {
            sdm_options: None,
            comm_mode,
            access,
        })
    }
}

/// A file's settings as reported by `GetFileSettings`, together with the
/// fixed header fields the card prepends
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    /// File type byte; always 0 (standard data file)
    pub file_type: u8,

    /// Size of the file body in bytes
    pub file_size: u32,

    /// The decoded settings
    pub settings: FileSettings,
}

impl FileInfo {
    /// Parse a complete `GetFileSettings` response payload. The entire
    /// buffer must be consumed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);

        let file_type = cur.take_u8("file type")?;
        if file_type != 0 {
            return Err(Error::UnsupportedVariant(format!(
                "file type 0x{:02X} (only standard data files are supported)",
                file_type
            )));
        }

        let file_option = cur.take_u8("file option")?;
        let mut settings = FileSettings::parse_body(&mut cur, file_option)?;
        let file_size = cur.take_u24("file size")?;

        if file_option & OPTION_SDM != 0 {
            settings.sdm_options = Some(SdmOptions::parse(&mut cur)?);
        }

        cur.finish()?;

        Ok(Self {
            file_type,
            file_size,
            settings,
        })
    }
}

//! Tag sessions: the command dispatcher and the card operations built
//! on top of it.
//!
//! Every operation funnels into [`TagSession::send`], which frames the
//! command for one of the three communication modes, advances the command
//! counter, and verifies/decrypts whatever comes back. Authentication is
//! the only path that replaces the installed session, and it does so
//! atomically: a failed re-authentication leaves the previous session
//! keys in place.

mod auth;

use log::debug;
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use self::auth::AuthState;
use crate::{
    command::{self, Code},
    comm_mode::CommMode,
    config::ConfigurationUpdate,
    crypto,
    error::{Error, Result},
    file::{FileInfo, FileSettings, TagParams, NDEF_FILE_ID},
    key::Key,
    reader::{ReaderPort, MAX_RESPONSE_LEN},
    response,
};

/// ISO instruction: SelectFile
const INS_SELECT_FILE: u8 = 0xA4;

/// ISO instruction: ReadBinary
const INS_READ_BINARY: u8 = 0xB0;

/// ISO instruction: UpdateBinary
const INS_UPDATE_BINARY: u8 = 0xD6;

/// PC/SC pseudo-instruction: GetData, answered by the reader itself
const INS_GET_DATA: u8 = 0xCA;

/// Class byte of PC/SC pseudo-APDUs
const CLA_PCSC: u8 = 0xFF;

/// The card's key slots are numbered 0 through 4
const MAX_KEY_NUMBER: u8 = 4;

/// ISO `SelectFile` selection modes (the `P1` byte)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SelectMode {
    /// Select MF, DF or EF by file identifier
    MfDfEf = 0b000,

    /// Select a child DF
    ChildDf = 0b001,

    /// Select an EF under the current DF
    EfUnderCurrentDf = 0b010,

    /// Select the parent DF
    ParentDf = 0b011,

    /// Select by DF name
    ByDfName = 0b100,

    /// Select by path from the MF
    FromMf = 0b1000,

    /// Select by path from the current DF
    FromCurrentDf = 0b1001,
}

impl SelectMode {
    /// The `P1` encoding of this mode
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A session with one NTAG 424 DNA over a borrowed reader port.
///
/// Single-owner, single-threaded: commands go out one at a time and the
/// session waits for each reply. Callers wanting parallelism must open
/// independent sessions on independent transports.
pub struct TagSession<R: ReaderPort> {
    /// APDU pipe to the card
    reader: R,

    /// Command counter: little-endian 16-bit, wraps, reset by a
    /// successful authentication
    cmd_counter: u16,

    /// Session secrets; `None` until the first successful
    /// `AuthenticateEV2First`
    auth: Option<AuthState>,
}

impl<R: ReaderPort> TagSession<R> {
    /// Begin an unauthenticated session on the given reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cmd_counter: 0,
            auth: None,
        }
    }

    /// Has `AuthenticateEV2First` completed successfully?
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Current command counter value
    pub fn command_counter(&self) -> u16 {
        self.cmd_counter
    }

    /// Consume the session, returning the reader
    pub fn into_reader(self) -> R {
        self.reader
    }

    // === Dispatcher ===

    /// Send a native command under the given communication mode.
    ///
    /// Card error statuses are returned as a response, not an error, so
    /// multi-step exchanges can look at the status word; use
    /// [`response::Message::is_ok`] or the typed operations below.
    pub fn send(
        &mut self,
        comm_mode: CommMode,
        code: Code,
        header: &[u8],
        data: Option<&[u8]>,
    ) -> Result<response::Message> {
        debug!(
            "cmd={:?} mode={:?} ctr={} hdr={} data={}",
            code,
            comm_mode,
            self.cmd_counter,
            header.len(),
            data.map_or(0, <[u8]>::len),
        );

        match comm_mode {
            CommMode::Plain => self.send_plain(code, header, data),
            CommMode::Mac => self.send_mac(code, header, data),
            CommMode::Full => self.send_full(code, header, data),
        }
    }

    /// Transmit one frame and split the response. Does not touch the
    /// command counter.
    fn transceive(&mut self, msg: &command::Message) -> Result<response::Message> {
        let bytes = self.reader.transmit(&msg.serialize(), MAX_RESPONSE_LEN)?;
        response::Message::parse(bytes)
    }

    /// Issue a plain ISO frame (standard-file and reader-level commands)
    fn send_iso(&mut self, msg: command::Message) -> Result<response::Message> {
        debug!("iso ins=0x{:02X}", msg.ins);
        self.transceive(&msg)
    }

    /// Issue a native frame. The command counter advances iff the card
    /// answered, whatever the status; transport and framing errors leave
    /// it untouched so a retry reproduces identical wire bytes.
    fn send_native(
        &mut self,
        code: Code,
        header: &[u8],
        data: Option<&[u8]>,
        mac: Option<[u8; crypto::MAC_SIZE]>,
    ) -> Result<response::Message> {
        let mut payload =
            Vec::with_capacity(header.len() + data.map_or(0, <[u8]>::len) + crypto::MAC_SIZE);
        payload.extend_from_slice(header);
        if let Some(data) = data {
            payload.extend_from_slice(data);
        }
        if let Some(mac) = mac {
            payload.extend_from_slice(&mac);
        }

        let response = self.transceive(&command::Message::native(code, payload))?;
        self.cmd_counter = self.cmd_counter.wrapping_add(1);
        Ok(response)
    }

    fn send_plain(
        &mut self,
        code: Code,
        header: &[u8],
        data: Option<&[u8]>,
    ) -> Result<response::Message> {
        self.send_native(code, header, data, None)
    }

    fn send_mac(
        &mut self,
        code: Code,
        header: &[u8],
        data: Option<&[u8]>,
    ) -> Result<response::Message> {
        let (ti, mac_key) = match &self.auth {
            Some(auth) => (auth.ti, Zeroizing::new(auth.mac_key)),
            None => return self.send_plain(code, header, data),
        };

        let mut mac_input =
            Vec::with_capacity(7 + header.len() + data.map_or(0, <[u8]>::len));
        mac_input.push(code.to_u8());
        mac_input.extend_from_slice(&self.cmd_counter.to_le_bytes());
        mac_input.extend_from_slice(&ti);
        mac_input.extend_from_slice(header);
        if let Some(data) = data {
            mac_input.extend_from_slice(data);
        }
        let request_mac = crypto::reduce_mac(&crypto::cmac(&mac_key, &mac_input));

        let response = self.send_native(code, header, data, Some(request_mac))?;

        // Error statuses carry no response MAC; hand them back untouched.
        if !response.is_ok() {
            return Ok(response);
        }

        let Some(payload) = response.data() else {
            return Ok(response);
        };

        if payload.len() < crypto::MAC_SIZE {
            return Err(Error::MalformedResponse(format!(
                "response payload of {} bytes cannot hold its MAC",
                payload.len()
            )));
        }

        let (body, response_mac) = payload.split_at(payload.len() - crypto::MAC_SIZE);

        let mut mac_input = Vec::with_capacity(7 + body.len());
        mac_input.push(response.sw2());
        mac_input.extend_from_slice(&self.cmd_counter.to_le_bytes());
        mac_input.extend_from_slice(&ti);
        mac_input.extend_from_slice(body);
        let expected = crypto::reduce_mac(&crypto::cmac(&mac_key, &mac_input));

        if expected[..].ct_eq(response_mac).unwrap_u8() != 1 {
            return Err(Error::ResponseMacMismatch);
        }

        let body = (!body.is_empty()).then(|| body.to_vec());
        Ok(response::Message::new(response.status(), body))
    }

    fn send_full(
        &mut self,
        code: Code,
        header: &[u8],
        data: Option<&[u8]>,
    ) -> Result<response::Message> {
        let (ti, enc_key) = match &self.auth {
            Some(auth) => (auth.ti, Zeroizing::new(auth.enc_key)),
            None => return Err(Error::NotAuthenticated),
        };

        // Empty data is sent as a bare MACed command; there is nothing
        // to encrypt.
        let ciphertext = match data {
            Some(data) if !data.is_empty() => {
                let iv = session_iv(&enc_key, &ti, self.cmd_counter, [0xA5, 0x5A])?;
                Some(crypto::cbc_encrypt(&enc_key, &iv, data, true)?)
            }
            _ => None,
        };

        let response = self.send_mac(code, header, ciphertext.as_deref())?;

        if !response.is_ok() {
            return Ok(response);
        }
        let Some(body) = response.data() else {
            return Ok(response);
        };

        // The counter advanced when the command went out; the response IV
        // is built over the new value.
        let iv = session_iv(&enc_key, &ti, self.cmd_counter, [0x5A, 0xA5])?;
        let plaintext = crypto::cbc_decrypt(&enc_key, &iv, body, true)?;

        let plaintext = (!plaintext.is_empty()).then_some(plaintext);
        Ok(response::Message::new(response.status(), plaintext))
    }

    // === Authentication (C5) ===

    /// Perform `AuthenticateEV2First` with the given key slot and install
    /// a fresh session.
    ///
    /// On success the command counter is reset to 0. On any failure the
    /// engine keeps whatever session existed before; the replacement is
    /// atomic.
    pub fn authenticate(&mut self, key_number: u8, key: &Key) -> Result<()> {
        check_key_number(key_number)?;
        debug!("authenticate key={}", key_number);

        // Step 1: request the card's encrypted nonce. The empty PCDcap2
        // field keeps the exchange at its two-frame minimum.
        let step1 = self
            .send(
                CommMode::Plain,
                Code::AuthenticateEv2First,
                &[key_number, 0x00],
                None,
            )?
            .require_ok()?;

        if step1.sw2() != 0xAF {
            return Err(Error::MalformedResponse(format!(
                "expected an additional authentication frame, got SW2=0x{:02X}",
                step1.sw2()
            )));
        }

        let ec_rnd_b: [u8; 16] = step1
            .data()
            .and_then(|data| data.try_into().ok())
            .ok_or_else(|| {
                Error::MalformedResponse("encrypted RndB is not 16 bytes".to_owned())
            })?;

        // Step 2: prove knowledge of the key by returning RndB rotated,
        // alongside our own nonce.
        let rnd_b: [u8; 16] = crypto::cbc_decrypt(
            key.as_bytes(),
            &[0u8; crypto::BLOCK_SIZE],
            &ec_rnd_b,
            false,
        )?
        .try_into()
        .expect("one decrypted block");

        let mut rnd_a = [0u8; 16];
        OsRng.fill_bytes(&mut rnd_a);

        let mut challenge = Vec::with_capacity(32);
        challenge.extend_from_slice(&rnd_a);
        challenge.extend_from_slice(&crypto::rotate_left(&rnd_b));
        let ec_challenge = crypto::cbc_encrypt(
            key.as_bytes(),
            &[0u8; crypto::BLOCK_SIZE],
            &challenge,
            false,
        )?;

        let step2 = self
            .send(CommMode::Plain, Code::AdditionalFrame, &ec_challenge, None)?
            .require_ok()?;

        if step2.sw2() != 0x00 {
            return Err(Error::MalformedResponse(format!(
                "unexpected continuation status SW2=0x{:02X} closing authentication",
                step2.sw2()
            )));
        }

        let ec_card_response = step2.data().ok_or_else(|| {
            Error::MalformedResponse("authentication response carried no payload".to_owned())
        })?;

        let state = auth::derive_session_keys(key, ec_card_response, &rnd_a, &rnd_b)?;
        debug!("auth=OK key={} ti={:02x?}", key_number, state.ti);

        self.auth = Some(state);
        self.cmd_counter = 0;
        Ok(())
    }

    // === Card operations (§6) ===

    /// Ask the reader for the card UID via the PC/SC `GetData`
    /// pseudo-APDU `FF CA 00 00 00`.
    ///
    /// This is answered by the reader, not the card, and is therefore
    /// reader-dependent; it bypasses the native dispatcher and the
    /// command counter. For an authenticated, card-attested UID use
    /// [`TagSession::get_card_uid`].
    pub fn get_uid(&mut self) -> Result<Vec<u8>> {
        let response = self
            .send_iso(command::Message::iso(
                CLA_PCSC,
                INS_GET_DATA,
                0x00,
                0x00,
                None,
                Some(0x00),
            ))?
            .require_ok()?;

        response
            .into_data()
            .ok_or_else(|| Error::MalformedResponse("reader returned no UID".to_owned()))
    }

    /// ISO `SelectFile` with `P2 = 0x0C` (no response data requested)
    pub fn select_file(&mut self, file_id: &[u8], mode: SelectMode) -> Result<()> {
        if file_id.len() > 16 {
            return Err(Error::Validation(format!(
                "file identifier of {} bytes exceeds the 16-byte maximum",
                file_id.len()
            )));
        }

        self.send_iso(command::Message::iso(
            0x00,
            INS_SELECT_FILE,
            mode.to_u8(),
            0x0C,
            Some(file_id.to_vec()),
            None,
        ))?
        .require_ok()?;

        Ok(())
    }

    /// Select the NDEF file and read its contents with ISO `ReadBinary`
    pub fn read_standard_file(&mut self) -> Result<Vec<u8>> {
        self.select_file(&NDEF_FILE_ID, SelectMode::MfDfEf)?;

        let response = self
            .send_iso(command::Message::iso(
                0x00,
                INS_READ_BINARY,
                0x00,
                0x00,
                None,
                Some(0x00),
            ))?
            .require_ok()?;

        Ok(response.into_data().unwrap_or_default())
    }

    /// Select the NDEF file and overwrite its contents with ISO
    /// `UpdateBinary`. Empty contents send a bare frame with no data
    /// field.
    pub fn write_standard_file(&mut self, contents: &[u8]) -> Result<()> {
        if contents.len() > 255 {
            return Err(Error::Validation(format!(
                "{} bytes exceed the single-frame write maximum of 255",
                contents.len()
            )));
        }

        self.select_file(&NDEF_FILE_ID, SelectMode::MfDfEf)?;

        let data = (!contents.is_empty()).then(|| contents.to_vec());
        self.send_iso(command::Message::iso(
            0x00,
            INS_UPDATE_BINARY,
            0x00,
            0x00,
            data,
            None,
        ))?
        .require_ok()?;

        Ok(())
    }

    /// Read and decode a file's settings
    pub fn get_file_settings(&mut self, file_number: u8) -> Result<FileInfo> {
        FileInfo::parse(&self.get_file_settings_raw(file_number)?)
    }

    /// Read a file's settings as raw bytes
    pub fn get_file_settings_raw(&mut self, file_number: u8) -> Result<Vec<u8>> {
        check_file_number(file_number, 15)?;

        let response = self
            .send(CommMode::Mac, Code::GetFileSettings, &[file_number], None)?
            .require_ok()?;

        response.into_data().ok_or_else(|| {
            Error::MalformedResponse("file settings response carried no payload".to_owned())
        })
    }

    /// Validate and write a file's settings. Sent fully encrypted when a
    /// session is installed, plain otherwise.
    pub fn set_file_settings(
        &mut self,
        file_number: u8,
        settings: &FileSettings,
        params: &TagParams,
    ) -> Result<()> {
        let payload = settings.serialize(params)?;
        self.set_file_settings_raw(file_number, &payload)
    }

    /// Write a pre-serialized `ChangeFileSettings` payload
    pub fn set_file_settings_raw(&mut self, file_number: u8, payload: &[u8]) -> Result<()> {
        check_file_number(file_number, 15)?;

        let comm_mode = if self.is_authenticated() {
            CommMode::Full
        } else {
            CommMode::Plain
        };

        self.send(
            comm_mode,
            Code::ChangeFileSettings,
            &[file_number],
            Some(payload),
        )?
        .require_ok()?;

        Ok(())
    }

    /// Read the 7-byte card UID with the native `GetCardUID` command.
    /// The card only answers this after authentication.
    pub fn get_card_uid(&mut self, comm_mode: CommMode) -> Result<[u8; 7]> {
        let response = self
            .send(comm_mode, Code::GetCardUid, &[], None)?
            .require_ok()?;

        response
            .data()
            .and_then(|data| <[u8; 7]>::try_from(data).ok())
            .ok_or_else(|| Error::MalformedResponse("card UID is not 7 bytes".to_owned()))
    }

    /// Apply a configuration update; always fully encrypted
    pub fn set_configuration(&mut self, update: &ConfigurationUpdate) -> Result<()> {
        let (option, data) = update.serialize()?;

        self.send(
            CommMode::Full,
            Code::SetConfiguration,
            &[option],
            Some(&data),
        )?
        .require_ok()?;

        Ok(())
    }

    /// Read the version byte of a key slot
    pub fn get_key_version(&mut self, key_number: u8) -> Result<u8> {
        check_key_number(key_number)?;

        let response = self
            .send(CommMode::Mac, Code::GetKeyVersion, &[key_number], None)?
            .require_ok()?;

        match response.data() {
            Some(&[version]) => Ok(version),
            other => Err(Error::MalformedResponse(format!(
                "key version payload of {} bytes (expected 1)",
                other.map_or(0, <[u8]>::len)
            ))),
        }
    }

    /// Read a file's SDM read counter
    pub fn get_file_counters(&mut self, file_number: u8) -> Result<u32> {
        check_file_number(file_number, 31)?;

        let response = self
            .send(CommMode::Full, Code::GetFileCounters, &[file_number], None)?
            .require_ok()?;

        let data = response.data().unwrap_or_default();
        if data.len() != 5 {
            return Err(Error::MalformedResponse(format!(
                "file counters payload of {} bytes (expected 5)",
                data.len()
            )));
        }
        if data[3..5] != [0x00, 0x00] {
            return Err(Error::MalformedResponse(
                "reserved file counter bytes are non-zero".to_owned(),
            ));
        }

        Ok(u32::from_le_bytes([data[0], data[1], data[2], 0]))
    }

    /// Read from a data file at an offset
    pub fn read_data(
        &mut self,
        comm_mode: CommMode,
        file_number: u8,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>> {
        let header = data_file_header(file_number, offset, length)?;

        let response = self
            .send(comm_mode, Code::ReadData, &header, None)?
            .require_ok()?;

        Ok(response.into_data().unwrap_or_default())
    }

    /// Write to a data file at an offset
    pub fn write_data(
        &mut self,
        comm_mode: CommMode,
        file_number: u8,
        data: &[u8],
        offset: u32,
    ) -> Result<()> {
        let header = data_file_header(file_number, offset, data.len() as u32)?;

        self.send(comm_mode, Code::WriteData, &header, Some(data))?
            .require_ok()?;

        Ok(())
    }

    /// Replace an application key; always fully encrypted.
    ///
    /// Changing key 0 (the one this session authenticated with) sends the
    /// new key directly; other slots send the XOR of old and new plus a
    /// CRC so the card can confirm the caller knew the old key.
    pub fn change_key(
        &mut self,
        key_number: u8,
        old_key: &Key,
        new_key: &Key,
        new_key_version: u8,
    ) -> Result<()> {
        check_key_number(key_number)?;

        let mut payload = Zeroizing::new(Vec::with_capacity(21));
        if key_number == 0 {
            payload.extend_from_slice(new_key.as_bytes());
            payload.push(new_key_version);
        } else {
            let xored = Zeroizing::new(crypto::xor(old_key.as_bytes(), new_key.as_bytes())?);
            payload.extend_from_slice(&xored);
            payload.push(new_key_version);
            payload.extend_from_slice(&crypto::crcjam(new_key.as_bytes()).to_le_bytes());
        }

        self.send(
            CommMode::Full,
            Code::ChangeKey,
            &[key_number],
            Some(&payload),
        )?
        .require_ok()?;

        Ok(())
    }
}

/// Encrypt the per-command IV block: label, TI and counter under the
/// session encryption key
fn session_iv(
    enc_key: &[u8; crypto::KEY_SIZE],
    ti: &[u8; auth::TI_SIZE],
    counter: u16,
    label: [u8; 2],
) -> Result<[u8; crypto::BLOCK_SIZE]> {
    let mut input = [0u8; crypto::BLOCK_SIZE];
    input[..2].copy_from_slice(&label);
    input[2..6].copy_from_slice(ti);
    input[6..8].copy_from_slice(&counter.to_le_bytes());

    let encrypted = crypto::ecb_encrypt(enc_key, &input)?;
    let mut iv = [0u8; crypto::BLOCK_SIZE];
    iv.copy_from_slice(&encrypted);
    Ok(iv)
}

fn check_key_number(key_number: u8) -> Result<()> {
    if key_number > MAX_KEY_NUMBER {
        return Err(Error::Validation(format!(
            "key number {} out of range 0..={}",
            key_number, MAX_KEY_NUMBER
        )));
    }
    Ok(())
}

fn check_file_number(file_number: u8, max: u8) -> Result<()> {
    if file_number > max {
        return Err(Error::Validation(format!(
            "file number {} out of range 0..={}",
            file_number, max
        )));
    }
    Ok(())
}

fn data_file_header(file_number: u8, offset: u32, length: u32) -> Result<[u8; 7]> {
    if offset > 0x00FF_FFFF || length > 0x00FF_FFFF {
        return Err(Error::Validation(format!(
            "offset {} / length {} do not fit in 3 bytes",
            offset, length
        )));
    }

    let mut header = [0u8; 7];
    header[0] = file_number;
    header[1..4].copy_from_slice(&offset.to_le_bytes()[..3]);
    header[4..7].copy_from_slice(&length.to_le_bytes()[..3]);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::collections::VecDeque;

    const TI: [u8; 4] = hex!("11223344");
    const ENC_KEY: [u8; 16] = hex!("7a93d6571e4b180fca6ac90c9a7488d4");
    const MAC_KEY: [u8; 16] = hex!("fc4af159b62e549b5812394cab1918cc");

    /// Scripted reader: hands back canned responses, records every frame
    struct MockReader {
        script: VecDeque<Vec<u8>>,
        frames: Vec<Vec<u8>>,
        fail_next: bool,
    }

    impl MockReader {
        fn new(script: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                frames: Vec::new(),
                fail_next: false,
            }
        }
    }

    impl ReaderPort for MockReader {
        fn transmit(&mut self, frame: &[u8], _max_response_len: u8) -> Result<Vec<u8>> {
            if self.fail_next {
                self.fail_next = false;
                return Err(Error::Transport("injected failure".to_owned()));
            }

            self.frames.push(frame.to_vec());
            self.script
                .pop_front()
                .ok_or_else(|| Error::Transport("script exhausted".to_owned()))
        }
    }

    /// An in-process card: answers the authentication exchange with real
    /// crypto, everything else with a bare OK
    struct MockCard {
        key: Key,
        rnd_b: [u8; 16],
        ti: [u8; 4],
        issued_rnd_b: Option<[u8; 16]>,
        fail_step2: bool,
    }

    impl MockCard {
        fn new(key: Key) -> Self {
            Self {
                key,
                rnd_b: hex!("91517975190dcea6104948efa3085c1b"),
                ti: TI,
                issued_rnd_b: None,
                fail_step2: false,
            }
        }
    }

    impl ReaderPort for MockCard {
        fn transmit(&mut self, frame: &[u8], _max_response_len: u8) -> Result<Vec<u8>> {
            let ins = frame[1];
            let data = if frame.len() > 5 {
                let lc = frame[4] as usize;
                frame[5..5 + lc].to_vec()
            } else {
                Vec::new()
            };

            match ins {
                0x71 => {
                    self.issued_rnd_b = Some(self.rnd_b);
                    let mut response = crypto::cbc_encrypt(
                        self.key.as_bytes(),
                        &[0u8; 16],
                        &self.rnd_b,
                        false,
                    )
                    .unwrap();
                    response.extend_from_slice(&[0x91, 0xAF]);
                    Ok(response)
                }
                0xAF => {
                    if self.fail_step2 {
                        return Ok(vec![0x91, 0xAE]);
                    }

                    let rnd_b = self.issued_rnd_b.take().expect("step 1 first");
                    let plain =
                        crypto::cbc_decrypt(self.key.as_bytes(), &[0u8; 16], &data, false)
                            .unwrap();
                    let rnd_a: [u8; 16] = plain[..16].try_into().unwrap();
                    assert_eq!(crypto::rotate_right(&plain[16..32]), rnd_b);

                    let mut body = Vec::with_capacity(32);
                    body.extend_from_slice(&self.ti);
                    body.extend_from_slice(&crypto::rotate_left(&rnd_a));
                    body.extend_from_slice(&[0u8; 12]);

                    let mut response =
                        crypto::cbc_encrypt(self.key.as_bytes(), &[0u8; 16], &body, false)
                            .unwrap();
                    response.extend_from_slice(&[0x91, 0x00]);
                    Ok(response)
                }
                _ => Ok(vec![0x91, 0x00]),
            }
        }
    }

    fn plain_session(script: impl IntoIterator<Item = Vec<u8>>) -> TagSession<MockReader> {
        TagSession::new(MockReader::new(script))
    }

    fn keyed_session(script: impl IntoIterator<Item = Vec<u8>>) -> TagSession<MockReader> {
        let mut session = TagSession::new(MockReader::new(script));
        session.auth = Some(AuthState {
            ti: TI,
            enc_key: ENC_KEY,
            mac_key: MAC_KEY,
        });
        session
    }

    fn ok_response(mut body: Vec<u8>) -> Vec<u8> {
        body.extend_from_slice(&[0x91, 0x00]);
        body
    }

    fn request_mac(counter: u16, code: Code, header: &[u8], data: &[u8]) -> [u8; 8] {
        let mut input = vec![code.to_u8()];
        input.extend_from_slice(&counter.to_le_bytes());
        input.extend_from_slice(&TI);
        input.extend_from_slice(header);
        input.extend_from_slice(data);
        crypto::reduce_mac(&crypto::cmac(&MAC_KEY, &input))
    }

    fn response_mac(counter: u16, sw2: u8, body: &[u8]) -> [u8; 8] {
        let mut input = vec![sw2];
        input.extend_from_slice(&counter.to_le_bytes());
        input.extend_from_slice(&TI);
        input.extend_from_slice(body);
        crypto::reduce_mac(&crypto::cmac(&MAC_KEY, &input))
    }

    #[test]
    fn plain_sends_count_issued_commands() {
        let mut session = plain_session(vec![
            ok_response(vec![]),
            ok_response(vec![]),
            ok_response(vec![]),
        ]);

        for expected in 1..=3 {
            session
                .send(CommMode::Plain, Code::GetFileSettings, &[2], None)
                .unwrap();
            assert_eq!(session.command_counter(), expected);
        }
    }

    #[test]
    fn counter_wraps_modulo_u16() {
        let mut session = plain_session(vec![ok_response(vec![])]);
        session.cmd_counter = u16::MAX;
        session
            .send(CommMode::Plain, Code::GetFileSettings, &[2], None)
            .unwrap();
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn transport_error_leaves_counter_untouched() {
        let mut session = plain_session(vec![]);
        session.reader.fail_next = true;

        let result = session.send(CommMode::Plain, Code::GetFileSettings, &[2], None);
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn malformed_response_leaves_counter_untouched() {
        let mut session = plain_session(vec![vec![0x91]]);

        let result = session.send(CommMode::Plain, Code::GetFileSettings, &[2], None);
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn card_error_still_advances_counter() {
        let mut session = plain_session(vec![vec![0x91, 0x7E]]);

        let response = session
            .send(CommMode::Plain, Code::GetFileSettings, &[2], None)
            .unwrap();
        assert!(!response.is_ok());
        assert_eq!(session.command_counter(), 1);
    }

    #[test]
    fn mac_mode_falls_through_to_plain_without_session() {
        let mut session = plain_session(vec![ok_response(vec![])]);
        session
            .send(CommMode::Mac, Code::GetFileSettings, &[2], None)
            .unwrap();

        assert_eq!(
            session.reader.frames[0],
            [0x90, 0xF5, 0x00, 0x00, 0x01, 0x02, 0x00]
        );
    }

    #[test]
    fn mac_mode_appends_request_mac_and_verifies_response() {
        let body = hex!("0000e0ee000100").to_vec();
        let mut scripted = body.clone();
        scripted.extend_from_slice(&response_mac(1, 0x00, &body));

        let mut session = keyed_session(vec![ok_response(scripted)]);
        let response = session
            .send(CommMode::Mac, Code::GetFileSettings, &[2], None)
            .unwrap();

        assert_eq!(response.data(), Some(body.as_slice()));

        let mut expected_frame = vec![0x90, 0xF5, 0x00, 0x00, 0x09, 0x02];
        expected_frame.extend_from_slice(&request_mac(0, Code::GetFileSettings, &[2], &[]));
        expected_frame.push(0x00);
        assert_eq!(session.reader.frames[0], expected_frame);
    }

    #[test]
    fn tampered_response_mac_is_rejected() {
        for flip in 0..9 {
            let body = hex!("0000e0ee000100").to_vec();
            let mut scripted = body.clone();
            scripted.extend_from_slice(&response_mac(1, 0x00, &body));
            // Flip one bit somewhere in the body or its MAC
            scripted[flip] ^= 0x01;

            let mut session = keyed_session(vec![ok_response(scripted)]);
            let result = session.send(CommMode::Mac, Code::GetFileSettings, &[2], None);
            assert!(matches!(result, Err(Error::ResponseMacMismatch)));
        }
    }

    #[test]
    fn error_status_skips_mac_verification() {
        let garbage = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x91, 0xAE];
        let mut session = keyed_session(vec![garbage]);

        let response = session
            .send(CommMode::Mac, Code::GetFileSettings, &[2], None)
            .unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.data(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
    }

    #[test]
    fn full_mode_requires_a_session() {
        let mut session = plain_session(vec![]);
        let result = session.send(CommMode::Full, Code::GetCardUid, &[], None);
        assert!(matches!(result, Err(Error::NotAuthenticated)));
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn full_mode_with_empty_data_matches_mac_mode() {
        let mut session = keyed_session(vec![ok_response(vec![])]);
        session
            .send(CommMode::Full, Code::GetCardUid, &[], None)
            .unwrap();

        let mut expected_frame = vec![0x90, 0x51, 0x00, 0x00, 0x08];
        expected_frame.extend_from_slice(&request_mac(0, Code::GetCardUid, &[], &[]));
        expected_frame.push(0x00);
        assert_eq!(session.reader.frames[0], expected_frame);
    }

    #[test]
    fn full_mode_encrypts_request_and_decrypts_response() {
        let header = [0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00];
        let plaintext = [0x0A, 0x0B, 0x0C];

        let request_iv = session_iv(&ENC_KEY, &TI, 0, [0xA5, 0x5A]).unwrap();
        let ciphertext = crypto::cbc_encrypt(&ENC_KEY, &request_iv, &plaintext, true).unwrap();

        let response_plaintext = hex!("0102030405");
        let response_iv = session_iv(&ENC_KEY, &TI, 1, [0x5A, 0xA5]).unwrap();
        let mut body =
            crypto::cbc_encrypt(&ENC_KEY, &response_iv, &response_plaintext, true).unwrap();
        let mac = response_mac(1, 0x00, &body);
        body.extend_from_slice(&mac);

        let mut session = keyed_session(vec![ok_response(body)]);
        let response = session
            .send(CommMode::Full, Code::WriteData, &header, Some(&plaintext))
            .unwrap();

        assert_eq!(response.data(), Some(&response_plaintext[..]));
        assert_eq!(session.command_counter(), 1);

        let mut expected_payload = header.to_vec();
        expected_payload.extend_from_slice(&ciphertext);
        expected_payload.extend_from_slice(&request_mac(
            0,
            Code::WriteData,
            &header,
            &ciphertext,
        ));

        let mut expected_frame = vec![0x90, 0x8D, 0x00, 0x00, expected_payload.len() as u8];
        expected_frame.extend_from_slice(&expected_payload);
        expected_frame.push(0x00);
        assert_eq!(session.reader.frames[0], expected_frame);
    }

    #[test]
    fn authentication_installs_session_and_resets_counter() {
        let key = Key::from([0u8; 16]);
        let mut session = TagSession::new(MockCard::new(key.clone()));

        session.authenticate(0, &key).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.command_counter(), 0);

        session
            .send(CommMode::Plain, Code::GetFileSettings, &[2], None)
            .unwrap();
        assert_eq!(session.command_counter(), 1);

        session.authenticate(0, &key).unwrap();
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn failed_reauthentication_keeps_previous_session() {
        let key = Key::from([0u8; 16]);
        let mut session = TagSession::new(MockCard::new(key.clone()));

        session.authenticate(0, &key).unwrap();
        session.reader.fail_step2 = true;

        let result = session.authenticate(0, &key);
        assert!(matches!(result, Err(Error::Card { .. })));
        assert!(session.is_authenticated());
        assert_eq!(session.command_counter(), 2);
    }

    #[test]
    fn authenticate_rejects_bad_key_number() {
        let mut session = plain_session(vec![]);
        let result = session.authenticate(5, &Key::from([0u8; 16]));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(session.reader.frames.is_empty());
    }

    #[test]
    fn get_uid_issues_the_pcsc_pseudo_apdu() {
        let mut session = plain_session(vec![ok_response(hex!("049d98f20b1090").to_vec())]);
        let uid = session.get_uid().unwrap();

        assert_eq!(uid, hex!("049d98f20b1090"));
        assert_eq!(session.reader.frames[0], hex!("ffca000000"));
        assert_eq!(session.command_counter(), 0);
    }

    #[test]
    fn select_file_rejects_long_identifiers() {
        let mut session = plain_session(vec![]);
        let result = session.select_file(&[0u8; 17], SelectMode::MfDfEf);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn read_standard_file_selects_ndef_first() {
        let mut session = plain_session(vec![
            ok_response(vec![]),
            ok_response(vec![0x01, 0x02, 0x03]),
        ]);

        let contents = session.read_standard_file().unwrap();
        assert_eq!(contents, [0x01, 0x02, 0x03]);
        assert_eq!(
            session.reader.frames[0],
            [0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x04]
        );
        assert_eq!(session.reader.frames[1], [0x00, 0xB0, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn write_standard_file_elides_empty_contents() {
        let mut session = plain_session(vec![ok_response(vec![]), ok_response(vec![])]);
        session.write_standard_file(&[]).unwrap();
        assert_eq!(session.reader.frames[1], [0x00, 0xD6, 0x00, 0x00]);

        let mut session = plain_session(vec![]);
        assert!(matches!(
            session.write_standard_file(&[0u8; 256]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn get_key_version_enforces_payload_length() {
        let mut session = plain_session(vec![ok_response(vec![0x07])]);
        assert_eq!(session.get_key_version(0).unwrap(), 7);

        let mut session = plain_session(vec![ok_response(vec![0x07, 0x08])]);
        assert!(matches!(
            session.get_key_version(0),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn get_file_counters_decodes_the_sdm_counter() {
        let counters = [0x12, 0x34, 0x00, 0x00, 0x00];
        let response_iv = session_iv(&ENC_KEY, &TI, 1, [0x5A, 0xA5]).unwrap();
        let mut body = crypto::cbc_encrypt(&ENC_KEY, &response_iv, &counters, true).unwrap();
        let mac = response_mac(1, 0x00, &body);
        body.extend_from_slice(&mac);

        let mut session = keyed_session(vec![ok_response(body)]);
        assert_eq!(session.get_file_counters(2).unwrap(), 0x3412);
    }

    #[test]
    fn get_file_counters_rejects_reserved_bytes() {
        let counters = [0x12, 0x34, 0x00, 0x01, 0x00];
        let response_iv = session_iv(&ENC_KEY, &TI, 1, [0x5A, 0xA5]).unwrap();
        let mut body = crypto::cbc_encrypt(&ENC_KEY, &response_iv, &counters, true).unwrap();
        let mac = response_mac(1, 0x00, &body);
        body.extend_from_slice(&mac);

        let mut session = keyed_session(vec![ok_response(body)]);
        assert!(matches!(
            session.get_file_counters(2),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn change_key_builds_the_crc_payload_for_other_slots() {
        let old_key = Key::from([0x11; 16]);
        let new_key = Key::from([0x22; 16]);

        let request_iv = session_iv(&ENC_KEY, &TI, 0, [0xA5, 0x5A]).unwrap();
        let mut expected_plain = vec![0x33u8; 16];
        expected_plain.push(0x01);
        expected_plain.extend_from_slice(&crypto::crcjam(&[0x22; 16]).to_le_bytes());
        let expected_ciphertext =
            crypto::cbc_encrypt(&ENC_KEY, &request_iv, &expected_plain, true).unwrap();

        let mut session = keyed_session(vec![ok_response(vec![])]);
        session.change_key(1, &old_key, &new_key, 0x01).unwrap();

        let frame = &session.reader.frames[0];
        let payload = &frame[5..frame.len() - 1];
        assert_eq!(payload[0], 0x01);
        assert_eq!(&payload[1..1 + expected_ciphertext.len()], &expected_ciphertext[..]);
    }
}

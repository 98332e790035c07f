//! `SetConfiguration` option groups.
//!
//! Each update addresses one option group on the card; the serializer
//! produces the option byte and the fixed-layout data for that group.
//! `SetConfiguration` is always sent fully encrypted.

use crate::error::{Error, Result};

/// Load-modulation strength of the card's RF response
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackModulation {
    /// Factory default modulation
    Standard,

    /// Strong back modulation
    Strong,
}

/// Failed-authentication rate limiting
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthFailCounter {
    /// Count failed authentications, locking the card once `limit` is
    /// reached; a successful authentication credits `decrement`. Both
    /// values must be non-zero.
    Enabled {
        /// Total failed attempts before the card locks
        limit: u16,

        /// Credit per successful authentication
        decrement: u16,
    },

    /// Counter disabled
    Disabled,
}

/// One `SetConfiguration` update
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigurationUpdate {
    /// PICC-level configuration. Enabling the random UID is the only
    /// supported change, and it is irreversible on the card.
    Picc {
        /// Respond to anticollision with a random ID
        use_random_id: bool,
    },

    /// Secure Dynamic Messaging defaults
    Sdm {
        /// Disable chained `WriteData` to SDM-enabled files
        disable_chained_write: bool,
    },

    /// PD capability bytes sent during authentication
    Capability {
        /// Advertise LRP secure messaging
        enable_lrp: bool,

        /// `PDCap2.5`, returned verbatim in `AuthenticateEV2First`
        pd_cap2_5: u8,

        /// `PDCap2.6`, returned verbatim in `AuthenticateEV2First`
        pd_cap2_6: u8,
    },

    /// Failed-authentication rate limiting
    AuthFailCounter(AuthFailCounter),

    /// RF hardware tuning
    Hardware {
        /// Load-modulation strength
        back_modulation: BackModulation,
    },
}

impl ConfigurationUpdate {
    /// Serialize into the option byte and data field of a
    /// `SetConfiguration` command
    pub(crate) fn serialize(&self) -> Result<(u8, Vec<u8>)> {
        match *self {
            ConfigurationUpdate::Picc { use_random_id } => {
                if !use_random_id {
                    return Err(Error::Validation(
                        "the random UID can be enabled but never disabled".to_owned(),
                    ));
                }
                Ok((0x00, vec![0x02]))
            }

            ConfigurationUpdate::Sdm {
                disable_chained_write,
            } => Ok((
                0x04,
                vec![0x00, if disable_chained_write { 0x04 } else { 0x00 }],
            )),

            ConfigurationUpdate::Capability {
                enable_lrp,
                pd_cap2_5,
                pd_cap2_6,
            } => {
                let mut data = vec![0u8; 10];
                data[4] = if enable_lrp { 0x02 } else { 0x00 };
                data[8] = pd_cap2_5;
                data[9] = pd_cap2_6;
                Ok((0x05, data))
            }

            ConfigurationUpdate::AuthFailCounter(counter) => {
                let mut data = vec![0u8; 5];
                if let AuthFailCounter::Enabled { limit, decrement } = counter {
                    if limit == 0 || decrement == 0 {
                        return Err(Error::Validation(
                            "auth fail counter limit and decrement must be non-zero".to_owned(),
                        ));
                    }
                    data[0] = 0x01;
                    data[1..3].copy_from_slice(&limit.to_le_bytes());
                    data[3..5].copy_from_slice(&decrement.to_le_bytes());
                }
                Ok((0x0A, data))
            }

            ConfigurationUpdate::Hardware { back_modulation } => Ok((
                0x0B,
                vec![match back_modulation {
                    BackModulation::Strong => 0x01,
                    BackModulation::Standard => 0x00,
                }],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picc_random_id() {
        let (option, data) = ConfigurationUpdate::Picc {
            use_random_id: true,
        }
        .serialize()
        .unwrap();
        assert_eq!(option, 0x00);
        assert_eq!(data, [0x02]);
    }

    #[test]
    fn picc_random_id_cannot_be_disabled() {
        assert!(matches!(
            ConfigurationUpdate::Picc {
                use_random_id: false,
            }
            .serialize(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn sdm_chained_write() {
        let (option, data) = ConfigurationUpdate::Sdm {
            disable_chained_write: true,
        }
        .serialize()
        .unwrap();
        assert_eq!(option, 0x04);
        assert_eq!(data, [0x00, 0x04]);

        let (_, data) = ConfigurationUpdate::Sdm {
            disable_chained_write: false,
        }
        .serialize()
        .unwrap();
        assert_eq!(data, [0x00, 0x00]);
    }

    #[test]
    fn capability_bytes() {
        let (option, data) = ConfigurationUpdate::Capability {
            enable_lrp: true,
            pd_cap2_5: 0xAA,
            pd_cap2_6: 0xBB,
        }
        .serialize()
        .unwrap();
        assert_eq!(option, 0x05);
        assert_eq!(data, [0, 0, 0, 0, 0x02, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn auth_fail_counter_layout() {
        let (option, data) =
            ConfigurationUpdate::AuthFailCounter(AuthFailCounter::Enabled {
                limit: 1000,
                decrement: 10,
            })
            .serialize()
            .unwrap();
        assert_eq!(option, 0x0A);
        assert_eq!(data, [0x01, 0xE8, 0x03, 0x0A, 0x00]);

        let (_, data) = ConfigurationUpdate::AuthFailCounter(AuthFailCounter::Disabled)
            .serialize()
            .unwrap();
        assert_eq!(data, [0; 5]);
    }

    #[test]
    fn auth_fail_counter_rejects_zero_bounds() {
        for (limit, decrement) in [(0u16, 1u16), (1, 0)] {
            assert!(matches!(
                ConfigurationUpdate::AuthFailCounter(AuthFailCounter::Enabled {
                    limit,
                    decrement,
                })
                .serialize(),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn hardware_back_modulation() {
        let (option, data) = ConfigurationUpdate::Hardware {
            back_modulation: BackModulation::Strong,
        }
        .serialize()
        .unwrap();
        assert_eq!(option, 0x0B);
        assert_eq!(data, [0x01]);
    }
}

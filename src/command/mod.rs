//! NTAG 424 DNA commands: native command codes and APDU framing

mod code;
mod message;

pub use self::code::Code;
pub(crate) use self::message::Message;

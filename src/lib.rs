#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod command;
pub mod config;
pub mod error;
pub mod file;
pub mod reader;
pub mod response;
pub mod sdm;
pub mod session;

mod comm_mode;
mod crypto;
mod key;

pub use crate::{
    comm_mode::CommMode,
    config::{AuthFailCounter, BackModulation, ConfigurationUpdate},
    error::{Error, Result},
    key::Key,
    reader::ReaderPort,
    session::{SelectMode, TagSession},
};

//! Core ROM patching primitives: address translation, the cartridge image,
//! and byte-level patch verification.
//!
//! The address model keeps physical ROM offsets and console (SNES) addresses
//! as two distinct types. Converting between them is always an explicit
//! operation, and the console-to-physical direction is fallible because not
//! every console address is ROM-backed under LoROM.

pub mod addr;
pub mod header;
pub mod image;
pub mod verify;

pub use addr::{RomOffset, SnesAddr};
pub use image::RomImage;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("offset ${offset:06X}+{len} out of range (image body is {body_len} bytes)")]
    OutOfRange {
        offset: u32,
        len: usize,
        body_len: usize,
    },
    #[error("no valid internal header found at $7FC0 or $FFC0 (checksum pair check failed)")]
    HeaderNotFound,
    #[error("{0} is not ROM-backed under LoROM mapping")]
    AddressOutOfRange(SnesAddr),
    #[error("byte ranges differ in length ({before} vs {after} bytes)")]
    LengthMismatch { before: usize, after: usize },
    #[error("image was created in memory and no save path was given")]
    NoSavePath,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Physical ROM offsets, SNES console addresses, and LoROM translation.
//!
//! A `RomOffset` indexes the image *body* (the file minus any 512-byte
//! copier header). A `SnesAddr` is the 24-bit bank:offset form the console
//! CPU uses once the cartridge is mapped in. Under LoROM each bank exposes
//! a 32KB ROM chunk in its upper half ($8000-$FFFF); addresses below $8000
//! have no physical ROM backing and translation fails for them.

use crate::CoreError;
use std::fmt;

/// LoROM maps ROM in 32KB chunks.
pub const BANK_SIZE: u32 = 0x8000;

/// Bank-local offsets at or above this map to ROM under LoROM.
pub const ROM_WINDOW_BASE: u16 = 0x8000;

/// Size of the copier (SMC) prefix some image files carry.
pub const SMC_HEADER_LEN: usize = 0x200;

/// Internal-header candidate locations, body-relative: LoROM then HiROM.
pub const HEADER_CANDIDATES: [usize; 2] = [0x7FC0, 0xFFC0];

/// Length of the 32-byte internal header.
pub const HEADER_LEN: usize = 0x20;

/// Byte position within the raw image body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RomOffset(u32);

impl RomOffset {
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// LoROM physical-to-console translation. Total for valid offsets: every
    /// body byte lands in the upper half of some ROM-mapped bank.
    pub fn to_snes(self) -> SnesAddr {
        let chunk = (self.0 / BANK_SIZE) & 0x7F;
        // Low banks $7E/$7F are WRAM; the ROM chunks that would land there
        // are only visible through the high mirrors $FE/$FF
        let bank = if chunk >= 0x7E {
            (chunk | 0x80) as u8
        } else {
            chunk as u8
        };
        let addr = (self.0 % BANK_SIZE) as u16 | ROM_WINDOW_BASE;
        SnesAddr { bank, addr }
    }
}

impl fmt::Display for RomOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:06X}", self.0)
    }
}

/// 24-bit console address (bank:offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnesAddr {
    bank: u8,
    addr: u16,
}

impl SnesAddr {
    pub const fn new(bank: u8, addr: u16) -> Self {
        Self { bank, addr }
    }

    /// Build from a packed 24-bit value like `0x7EF360`.
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            bank: ((packed >> 16) & 0xFF) as u8,
            addr: (packed & 0xFFFF) as u16,
        }
    }

    pub const fn packed(self) -> u32 {
        ((self.bank as u32) << 16) | self.addr as u32
    }

    pub const fn bank(self) -> u8 {
        self.bank
    }

    pub const fn addr(self) -> u16 {
        self.addr
    }

    /// LoROM console-to-physical translation.
    ///
    /// Fails for bank-local offsets below $8000 (system area / SRAM, not
    /// ROM) and for the WRAM banks $7E-$7F. Mirror banks $80-$FF resolve to
    /// their low counterparts.
    pub fn to_rom_offset(self) -> Result<RomOffset, CoreError> {
        if self.addr < ROM_WINDOW_BASE {
            return Err(CoreError::AddressOutOfRange(self));
        }
        if self.bank == 0x7E || self.bank == 0x7F {
            return Err(CoreError::AddressOutOfRange(self));
        }
        let bank = (self.bank & 0x7F) as u32;
        Ok(RomOffset(
            bank * BANK_SIZE + (self.addr - ROM_WINDOW_BASE) as u32,
        ))
    }
}

impl fmt::Display for SnesAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:02X}:{:04X}", self.bank, self.addr)
    }
}

/// True iff the file length betrays a 512-byte copier prefix.
pub fn has_copier_header(file_len: usize) -> bool {
    file_len % 0x400 == SMC_HEADER_LEN
}

/// Locate the internal header within the image body.
///
/// Tries the LoROM ($7FC0) then HiROM ($FFC0) candidate and accepts the
/// first whose 16-bit checksum and complement (both little-endian) XOR to
/// $FFFF. Neither matching means the image cannot be trusted for patching.
pub fn detect_header(body: &[u8]) -> Result<usize, CoreError> {
    for candidate in HEADER_CANDIDATES {
        if candidate + HEADER_LEN > body.len() {
            continue;
        }
        let complement = u16::from_le_bytes([body[candidate + 0x1C], body[candidate + 0x1D]]);
        let checksum = u16::from_le_bytes([body[candidate + 0x1E], body[candidate + 0x1F]]);
        if checksum ^ complement == 0xFFFF {
            log::debug!(
                "internal header at ${:04X} (checksum ${:04X})",
                candidate,
                checksum
            );
            return Ok(candidate);
        }
    }
    Err(CoreError::HeaderNotFound)
}

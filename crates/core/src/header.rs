//! Parsed view of the 32-byte internal cartridge header.

use crate::addr::HEADER_LEN;
use crate::CoreError;

/// ROM mapping mode from the map-mode byte (low nibble of $xFD5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    LoRom,
    HiRom,
    Other(u8),
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mapping::LoRom => write!(f, "LoROM"),
            Mapping::HiRom => write!(f, "HiROM"),
            Mapping::Other(m) => write!(f, "mode ${:02X}", m),
        }
    }
}

/// Field layout: 21-byte title, then map mode ($15), cartridge type ($16),
/// ROM size exponent ($17), SRAM size exponent ($18), region ($19),
/// complement ($1C, LE) and checksum ($1E, LE).
#[derive(Debug, Clone)]
pub struct RomHeader {
    pub title: String,
    pub map_mode: u8,
    pub cart_type: u8,
    pub rom_size_exp: u8,
    pub sram_size_exp: u8,
    pub region: u8,
    pub complement: u16,
    pub checksum: u16,
}

impl RomHeader {
    pub fn parse(body: &[u8], offset: usize) -> Result<Self, CoreError> {
        if offset + HEADER_LEN > body.len() {
            return Err(CoreError::OutOfRange {
                offset: offset as u32,
                len: HEADER_LEN,
                body_len: body.len(),
            });
        }
        let raw = &body[offset..offset + HEADER_LEN];
        let title = String::from_utf8_lossy(&raw[..21]).trim_end().to_string();
        Ok(Self {
            title,
            map_mode: raw[0x15],
            cart_type: raw[0x16],
            rom_size_exp: raw[0x17],
            sram_size_exp: raw[0x18],
            region: raw[0x19],
            complement: u16::from_le_bytes([raw[0x1C], raw[0x1D]]),
            checksum: u16::from_le_bytes([raw[0x1E], raw[0x1F]]),
        })
    }

    pub fn mapping(&self) -> Mapping {
        match self.map_mode & 0x0F {
            0x00 => Mapping::LoRom,
            0x01 => Mapping::HiRom,
            other => Mapping::Other(other),
        }
    }

    /// Declared ROM size in KiB (2^n). Header detection only checks the
    /// checksum pair, so the exponent byte is untrusted; a junk value reads
    /// as zero rather than overflowing the shift.
    pub fn rom_size_kib(&self) -> u32 {
        1u32.checked_shl(self.rom_size_exp as u32).unwrap_or(0)
    }

    /// Declared SRAM size in KiB; zero exponent means no SRAM.
    pub fn sram_size_kib(&self) -> u32 {
        if self.sram_size_exp == 0 {
            0
        } else {
            1u32.checked_shl(self.sram_size_exp as u32).unwrap_or(0)
        }
    }

    pub fn checksum_pair_valid(&self) -> bool {
        self.checksum ^ self.complement == 0xFFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_body() -> Vec<u8> {
        let mut body = vec![0u8; 0x8000];
        let h = 0x7FC0;
        body[h..h + 14].copy_from_slice(b"THE LEGEND OF ");
        body[h + 14..h + 21].copy_from_slice(b"ZELDA  ");
        body[h + 0x15] = 0x20; // LoROM, slow
        body[h + 0x16] = 0x02; // ROM + SRAM + battery
        body[h + 0x17] = 0x0A; // 1MB
        body[h + 0x18] = 0x03; // 8KB SRAM
        body[h + 0x19] = 0x01; // USA
        body[h + 0x1C] = 0x32;
        body[h + 0x1D] = 0x98;
        body[h + 0x1E] = 0xCD;
        body[h + 0x1F] = 0x67;
        body
    }

    #[test]
    fn test_parse_fields() {
        let body = sample_header_body();
        let header = RomHeader::parse(&body, 0x7FC0).unwrap();
        assert_eq!(header.title, "THE LEGEND OF ZELDA");
        assert_eq!(header.mapping(), Mapping::LoRom);
        assert_eq!(header.rom_size_kib(), 1024);
        assert_eq!(header.sram_size_kib(), 8);
        assert_eq!(header.checksum, 0x67CD);
        assert_eq!(header.complement, 0x9832);
        assert!(header.checksum_pair_valid());
    }

    #[test]
    fn test_parse_out_of_range() {
        let body = vec![0u8; 0x100];
        assert!(RomHeader::parse(&body, 0x7FC0).is_err());
    }

    #[test]
    fn test_junk_size_exponents_do_not_panic() {
        // A valid checksum pair says nothing about the size bytes
        let mut body = sample_header_body();
        body[0x7FC0 + 0x17] = 0xFF;
        body[0x7FC0 + 0x18] = 0x20;
        let header = RomHeader::parse(&body, 0x7FC0).unwrap();
        assert_eq!(header.rom_size_kib(), 0);
        assert_eq!(header.sram_size_kib(), 0);
    }

    #[test]
    fn test_no_sram() {
        let mut body = sample_header_body();
        body[0x7FC0 + 0x18] = 0x00;
        let header = RomHeader::parse(&body, 0x7FC0).unwrap();
        assert_eq!(header.sram_size_kib(), 0);
    }
}

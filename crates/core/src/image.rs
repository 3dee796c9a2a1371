//! The cartridge image: exclusive owner of the ROM bytes, with
//! bounds-checked access, checksum maintenance and backup-safe saves.
//!
//! All public offsets are body-relative: a copier (SMC) prefix, when
//! present, is split off at load and re-emitted verbatim at save, so fixed
//! offsets from research notes apply unchanged either way.

use crate::addr::{self, RomOffset, HEADER_CANDIDATES};
use crate::header::RomHeader;
use crate::CoreError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct RomImage {
    /// Copier prefix carried through load/save untouched; empty if absent.
    smc_prefix: Vec<u8>,
    body: Vec<u8>,
    path: Option<PathBuf>,
    header_offset: usize,
    load_digest: String,
}

impl RomImage {
    /// Load an image file, detecting the copier prefix from the file length
    /// and the internal header from the checksum pair.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let mut image = Self::from_bytes(data)?;
        image.path = Some(path.to_path_buf());
        log::info!(
            "loaded {} ({} KB body, SMC header: {}, internal header at ${:04X})",
            path.display(),
            image.body.len() / 1024,
            if image.has_copier_header() { "yes" } else { "no" },
            image.header_offset
        );
        Ok(image)
    }

    /// Build an image from raw file contents (no associated path).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, CoreError> {
        let (smc_prefix, body) = if addr::has_copier_header(data.len()) {
            let mut body = data;
            let prefix = body.drain(..addr::SMC_HEADER_LEN).collect();
            (prefix, body)
        } else {
            (Vec::new(), data)
        };
        let header_offset = addr::detect_header(&body)?;
        let load_digest = content_digest(&body);
        Ok(Self {
            smc_prefix,
            body,
            path: None,
            header_offset,
            load_digest,
        })
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn has_copier_header(&self) -> bool {
        !self.smc_prefix.is_empty()
    }

    /// Body-relative offset of the 32-byte internal header.
    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn load_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn header(&self) -> Result<RomHeader, CoreError> {
        RomHeader::parse(&self.body, self.header_offset)
    }

    fn check_range(&self, offset: RomOffset, len: usize) -> Result<usize, CoreError> {
        let start = offset.value() as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.body.len() => Ok(start),
            _ => Err(CoreError::OutOfRange {
                offset: offset.value(),
                len,
                body_len: self.body.len(),
            }),
        }
    }

    pub fn read_byte(&self, offset: RomOffset) -> Result<u8, CoreError> {
        let start = self.check_range(offset, 1)?;
        Ok(self.body[start])
    }

    pub fn read_range(&self, offset: RomOffset, len: usize) -> Result<&[u8], CoreError> {
        let start = self.check_range(offset, len)?;
        Ok(&self.body[start..start + len])
    }

    /// Little-endian 16-bit read; both bytes must be in range.
    pub fn read_word(&self, offset: RomOffset) -> Result<u16, CoreError> {
        let start = self.check_range(offset, 2)?;
        Ok(u16::from_le_bytes([self.body[start], self.body[start + 1]]))
    }

    /// Little-endian 24-bit read; all three bytes must be in range.
    pub fn read_long(&self, offset: RomOffset) -> Result<u32, CoreError> {
        let start = self.check_range(offset, 3)?;
        Ok(u32::from_le_bytes([
            self.body[start],
            self.body[start + 1],
            self.body[start + 2],
            0,
        ]))
    }

    pub fn write_byte(&mut self, offset: RomOffset, value: u8) -> Result<(), CoreError> {
        let start = self.check_range(offset, 1)?;
        log::debug!("write {} = ${:02X}", offset, value);
        self.body[start] = value;
        Ok(())
    }

    /// Whole-range write: the span is validated before any byte changes, so
    /// a failed call leaves the image untouched.
    pub fn write_range(&mut self, offset: RomOffset, bytes: &[u8]) -> Result<(), CoreError> {
        let start = self.check_range(offset, bytes.len())?;
        log::debug!("write {}..+{}", offset, bytes.len());
        self.body[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Snapshot of the whole body, for pre-patch diffs.
    pub fn snapshot(&self) -> Vec<u8> {
        self.body.clone()
    }

    /// Sum every body byte mod $10000 and store the result and its
    /// complement in the header. Callers decide when consistency matters;
    /// nothing recomputes automatically on write.
    pub fn recompute_checksum(&mut self) -> u16 {
        let sum = self
            .body
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
        let checksum = (sum & 0xFFFF) as u16;
        let complement = checksum ^ 0xFFFF;
        let h = self.header_offset;
        self.body[h + 0x1C..h + 0x1E].copy_from_slice(&complement.to_le_bytes());
        self.body[h + 0x1E..h + 0x20].copy_from_slice(&checksum.to_le_bytes());
        log::info!(
            "checksum recomputed: ${:04X} (complement ${:04X})",
            checksum,
            complement
        );
        checksum
    }

    /// Whether the stored checksum pair is self-consistent right now.
    pub fn checksum_pair_valid(&self) -> bool {
        let h = self.header_offset;
        let complement = u16::from_le_bytes([self.body[h + 0x1C], self.body[h + 0x1D]]);
        let checksum = u16::from_le_bytes([self.body[h + 0x1E], self.body[h + 0x1F]]);
        checksum ^ complement == 0xFFFF
    }

    /// True iff the body content differs from what was loaded.
    pub fn is_dirty(&self) -> bool {
        content_digest(&self.body) != self.load_digest
    }

    /// Persist the image. Overwriting the original load path always copies
    /// the existing file to `<path>.backup` first; the backup must land
    /// before the overwrite may proceed. Saving elsewhere writes directly.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, CoreError> {
        let target = match path.or(self.path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => return Err(CoreError::NoSavePath),
        };

        let overwriting_original = self
            .path
            .as_deref()
            .map_or(false, |orig| same_file(orig, &target));
        if overwriting_original && target.exists() {
            let backup = PathBuf::from(format!("{}.backup", target.display()));
            fs::copy(&target, &backup)?;
            log::info!("backed up {} to {}", target.display(), backup.display());
        }

        if self.smc_prefix.is_empty() {
            fs::write(&target, &self.body)?;
        } else {
            let mut out = Vec::with_capacity(self.smc_prefix.len() + self.body.len());
            out.extend_from_slice(&self.smc_prefix);
            out.extend_from_slice(&self.body);
            fs::write(&target, out)?;
        }
        log::info!("saved {} ({} bytes)", target.display(), self.file_len());
        Ok(target)
    }

    fn file_len(&self) -> usize {
        self.smc_prefix.len() + self.body.len()
    }
}

/// Path equality after resolving `.`/`..` and symlinks, so differently
/// spelled paths to one file still count as an overwrite. Falls back to
/// literal comparison when either path does not resolve (e.g. not created
/// yet).
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1MB LoROM body with a self-consistent checksum pair at $7FC0.
    pub(crate) fn test_body() -> Vec<u8> {
        let mut body = vec![0u8; 0x100000];
        body[0x7FC0..0x7FC0 + 5].copy_from_slice(b"TEST ");
        // Arbitrary valid pair; recompute_checksum replaces it
        body[0x7FC0 + 0x1C] = 0xFF;
        body[0x7FC0 + 0x1D] = 0xFF;
        body[0x7FC0 + 0x1E] = 0x00;
        body[0x7FC0 + 0x1F] = 0x00;
        body
    }

    #[test]
    fn test_load_detects_header() {
        let image = RomImage::from_bytes(test_body()).unwrap();
        assert_eq!(image.header_offset(), 0x7FC0);
        assert!(!image.has_copier_header());
        assert_eq!(image.body_len(), 0x100000);
    }

    #[test]
    fn test_copier_prefix_is_split_off() {
        let mut data = vec![0xAA; 0x200];
        data.extend(test_body());
        assert_eq!(data.len(), 0x100200);
        let image = RomImage::from_bytes(data).unwrap();
        assert!(image.has_copier_header());
        assert_eq!(image.body_len(), 0x100000);
        // Body offsets index past the prefix: byte 0 of the body is the
        // byte at file offset 0x200
        assert_eq!(image.read_byte(RomOffset::new(0)).unwrap(), 0x00);
        assert_eq!(image.header_offset(), 0x7FC0);
    }

    #[test]
    fn test_rejects_headerless_image() {
        let data = vec![0u8; 0x100000];
        assert!(matches!(
            RomImage::from_bytes(data),
            Err(CoreError::HeaderNotFound)
        ));
    }

    #[test]
    fn test_reads_little_endian() {
        let mut body = test_body();
        body[0x100] = 0x34;
        body[0x101] = 0x12;
        body[0x102] = 0x7E;
        let image = RomImage::from_bytes(body).unwrap();
        assert_eq!(image.read_word(RomOffset::new(0x100)).unwrap(), 0x1234);
        assert_eq!(image.read_long(RomOffset::new(0x100)).unwrap(), 0x7E1234);
    }

    #[test]
    fn test_reads_refuse_to_straddle_end() {
        let image = RomImage::from_bytes(test_body()).unwrap();
        let last = RomOffset::new(0xFFFFF);
        assert!(image.read_byte(last).is_ok());
        assert!(image.read_word(last).is_err());
        assert!(image.read_long(RomOffset::new(0xFFFFE)).is_err());
        assert!(image.read_range(RomOffset::new(0xFFF00), 0x101).is_err());
    }

    #[test]
    fn test_write_range_is_all_or_nothing() {
        let mut image = RomImage::from_bytes(test_body()).unwrap();
        let before = image.snapshot();
        let result = image.write_range(RomOffset::new(0xFFFFF), &[1, 2, 3]);
        assert!(result.is_err());
        assert_eq!(image.snapshot(), before, "failed write must not land partially");
    }

    #[test]
    fn test_dirty_tracking() {
        let mut image = RomImage::from_bytes(test_body()).unwrap();
        assert!(!image.is_dirty());
        image.write_byte(RomOffset::new(0x07B0AB), 0x38).unwrap();
        assert!(image.is_dirty());
    }

    #[test]
    fn test_checksum_invariant() {
        let mut image = RomImage::from_bytes(test_body()).unwrap();
        let old = image.header().unwrap().checksum;
        image.write_byte(RomOffset::new(0x07B0AB), 0x38).unwrap();
        image.write_byte(RomOffset::new(0x07B0AC), 0x6B).unwrap();
        let new = image.recompute_checksum();
        assert_ne!(old, new, "patching changed bytes, checksum must move");
        assert!(image.checksum_pair_valid());
        let header = image.header().unwrap();
        assert_eq!(header.checksum ^ header.complement, 0xFFFF);
    }

    #[test]
    fn test_recompute_is_stable() {
        let mut image = RomImage::from_bytes(test_body()).unwrap();
        let first = image.recompute_checksum();
        let second = image.recompute_checksum();
        // Any valid pair contributes a constant 0x1FE to the body sum
        // (each complement byte is the inverse of its checksum byte), so
        // recomputing over an already-consistent image is a fixed point
        assert_eq!(first, second);
        assert!(image.checksum_pair_valid());
    }

    #[test]
    fn test_save_backs_up_original() {
        let dir = std::env::temp_dir().join(format!("smod-image-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let rom_path = dir.join("game.sfc");
        fs::write(&rom_path, test_body()).unwrap();

        let mut image = RomImage::load(&rom_path).unwrap();
        image.write_byte(RomOffset::new(0x1000), 0x42).unwrap();
        image.save(None).unwrap();

        let backup_path = PathBuf::from(format!("{}.backup", rom_path.display()));
        let backup = fs::read(&backup_path).expect("backup must exist after in-place save");
        assert_eq!(backup, test_body(), "backup holds the pre-save content");
        let saved = fs::read(&rom_path).unwrap();
        assert_eq!(saved[0x1000], 0x42);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_backs_up_through_respelled_path() {
        let dir = std::env::temp_dir().join(format!("smod-image-test4-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let rom_path = dir.join("game.sfc");
        fs::write(&rom_path, test_body()).unwrap();

        let mut image = RomImage::load(&rom_path).unwrap();
        image.write_byte(RomOffset::new(0x1000), 0x42).unwrap();

        // Same file, different spelling: still an overwrite of the original.
        // Path equality normalizes `.` components, so spell the detour with
        // `..` to get a PathBuf that is unequal yet resolves to the same file.
        let respelled = dir.join("..").join(dir.file_name().unwrap()).join("game.sfc");
        assert_ne!(respelled, rom_path);
        image.save(Some(&respelled)).unwrap();

        let backup = fs::read(dir.join("game.sfc.backup"))
            .expect("respelled in-place save must still back up");
        assert_eq!(backup, test_body());
        assert_eq!(fs::read(&rom_path).unwrap()[0x1000], 0x42);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_elsewhere_skips_backup() {
        let dir = std::env::temp_dir().join(format!("smod-image-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let rom_path = dir.join("game.sfc");
        fs::write(&rom_path, test_body()).unwrap();

        let image = RomImage::load(&rom_path).unwrap();
        let copy_path = dir.join("copy.sfc");
        image.save(Some(&copy_path)).unwrap();

        assert!(copy_path.exists());
        assert!(!PathBuf::from(format!("{}.backup", copy_path.display())).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_round_trips_copier_prefix() {
        let dir = std::env::temp_dir().join(format!("smod-image-test3-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut data = vec![0xAA; 0x200];
        data.extend(test_body());
        let rom_path = dir.join("headered.smc");
        fs::write(&rom_path, &data).unwrap();

        let image = RomImage::load(&rom_path).unwrap();
        let out_path = dir.join("out.smc");
        image.save(Some(&out_path)).unwrap();
        assert_eq!(fs::read(&out_path).unwrap(), data);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_in_memory_image_needs_a_path() {
        let image = RomImage::from_bytes(test_body()).unwrap();
        assert!(matches!(image.save(None), Err(CoreError::NoSavePath)));
    }
}

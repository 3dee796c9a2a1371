//! Seed discoveries for The Legend of Zelda: A Link to the Past (US),
//! carried over from the project's research notes.

use crate::catalog::Catalog;
use crate::discovery::{Category, Confidence, DiscoveryDraft};
use crate::store::CatalogStore;
use crate::CatalogError;
use smod_core::RomOffset;

/// Populate a catalog with the known Zelda 3 targets. Returns the assigned
/// ids in insertion order.
pub fn seed_builtin<S: CatalogStore>(catalog: &mut Catalog<S>) -> Result<Vec<u64>, CatalogError> {
    let mut ids = Vec::new();

    let magic_meter = catalog.add(
        DiscoveryDraft::new("magic-meter", Category::Memory, 1)
            .snes_addr(0x7EF36E)
            .meaning("current magic points; drained by rod/lamp/medallion use")
            .confidence(Confidence::Medium),
    )?;
    ids.push(magic_meter);

    let magic_offset = 0x07B0AB;
    ids.push(catalog.add(
        DiscoveryDraft::new("infinite-magic", Category::Routine, 2)
            .rom_offset(magic_offset)
            .snes_addr(RomOffset::new(magic_offset).to_snes().packed())
            .expected(vec![0x38, 0x6B]) // SEC : RTL, returns before the meter drains
            .meaning("magic depletion routine; patched to bail out early")
            .confidence(Confidence::High)
            .related(magic_meter, "patches consumer of"),
    )?);

    ids.push(catalog.add(
        DiscoveryDraft::new("rupee-counter", Category::Memory, 2)
            .snes_addr(0x7EF360)
            .meaning("current rupee count, little-endian")
            .confidence(Confidence::High),
    )?);

    ids.push(catalog.add(
        DiscoveryDraft::new("health-current", Category::Memory, 1)
            .snes_addr(0x7EF36D)
            .meaning("current hearts, 8 units per heart")
            .confidence(Confidence::High),
    )?);

    ids.push(catalog.add(
        DiscoveryDraft::new("max-hearts", Category::Memory, 1)
            .snes_addr(0x7EF36C)
            .meaning("heart containers, 8 units per container")
            .confidence(Confidence::Medium),
    )?);

    ids.push(catalog.add(
        DiscoveryDraft::new("room-id", Category::Memory, 2)
            .snes_addr(0x7E00A0)
            .meaning("current dungeon room index")
            .confidence(Confidence::Medium),
    )?);

    log::info!("seeded {} built-in discoveries", ids.len());
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::DiscoveryFilter;

    #[test]
    fn test_seed_builtin() {
        let mut catalog = Catalog::open(MemoryStore::default()).unwrap();
        let ids = seed_builtin(&mut catalog).unwrap();
        assert_eq!(ids.len(), 6);

        let magic = catalog.resolve("infinite-magic").unwrap();
        assert_eq!(magic.rom_offset, Some(0x07B0AB));
        assert_eq!(magic.expected.as_deref(), Some(&[0x38, 0x6B][..]));
        assert_eq!(magic.snes_addr, Some(0x0FB0AB));
        assert_eq!(magic.related.len(), 1);

        let memory = catalog.query(&DiscoveryFilter {
            category: Some(Category::Memory),
            ..Default::default()
        });
        assert_eq!(memory.len(), 5);
    }

    #[test]
    fn test_seeding_twice_is_rejected() {
        let mut catalog = Catalog::open(MemoryStore::default()).unwrap();
        seed_builtin(&mut catalog).unwrap();
        assert!(seed_builtin(&mut catalog).is_err());
    }
}

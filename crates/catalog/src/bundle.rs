//! Versioned export/import bundle: moves a catalog between storage
//! backends without losing the validation history.

use crate::catalog::Catalog;
use crate::discovery::Discovery;
use crate::store::CatalogStore;
use crate::CatalogError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

/// Aggregate counts computed from the records at export time. Nothing in
/// here is hand-entered; re-exporting always recomputes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStats {
    pub total: usize,
    pub validated: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_confidence: BTreeMap<String, usize>,
}

impl BundleStats {
    pub fn compute(records: &[Discovery]) -> Self {
        let mut by_category = BTreeMap::new();
        let mut by_confidence = BTreeMap::new();
        let mut validated = 0;
        for record in records {
            *by_category.entry(record.category.to_string()).or_insert(0) += 1;
            *by_confidence
                .entry(record.confidence.to_string())
                .or_insert(0) += 1;
            if record.validated {
                validated += 1;
            }
        }
        Self {
            total: records.len(),
            validated,
            by_category,
            by_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<Discovery>,
    pub stats: BundleStats,
}

impl ExportBundle {
    pub fn from_catalog<S: CatalogStore>(catalog: &Catalog<S>) -> Self {
        let records = catalog.records().to_vec();
        let stats = BundleStats::compute(&records);
        Self {
            schema_version: SCHEMA_VERSION,
            exported_at: Utc::now(),
            records,
            stats,
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), CatalogError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path)?;
        let bundle: ExportBundle = serde_json::from_str(&contents)?;
        if bundle.schema_version != SCHEMA_VERSION {
            return Err(CatalogError::SchemaVersion(bundle.schema_version));
        }
        Ok(bundle)
    }

    /// Replay the bundled records into a fresh store, ids and version
    /// chains intact.
    pub fn into_catalog<S: CatalogStore>(self, mut store: S) -> Result<Catalog<S>, CatalogError> {
        for record in &self.records {
            store.append(record)?;
        }
        Catalog::open(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Category, Confidence, DiscoveryDraft};
    use crate::store::MemoryStore;

    fn populated() -> Catalog<MemoryStore> {
        let mut c = Catalog::open(MemoryStore::default()).unwrap();
        let id = c
            .add(
                DiscoveryDraft::new("infinite-magic", Category::Routine, 2)
                    .rom_offset(0x07B0AB)
                    .expected(vec![0x38, 0x6B])
                    .confidence(Confidence::High),
            )
            .unwrap();
        c.record_verification(id, true).unwrap();
        c.add(
            DiscoveryDraft::new("rupee-counter", Category::Memory, 2).snes_addr(0x7EF360),
        )
        .unwrap();
        c
    }

    #[test]
    fn test_stats_reflect_records() {
        let c = populated();
        let bundle = ExportBundle::from_catalog(&c);
        assert_eq!(bundle.stats.total, 3); // v1 + verified v2 + rupee
        assert_eq!(bundle.stats.validated, 1);
        assert_eq!(bundle.stats.by_category["routine"], 2);
        assert_eq!(bundle.stats.by_category["memory"], 1);
        assert_eq!(bundle.stats.by_confidence["verified"], 1);
    }

    #[test]
    fn test_bundle_file_round_trip() {
        let path = std::env::temp_dir().join(format!("smod-bundle-{}.json", std::process::id()));
        let c = populated();
        ExportBundle::from_catalog(&c).write(&path).unwrap();

        let bundle = ExportBundle::read(&path).unwrap();
        assert_eq!(bundle.schema_version, SCHEMA_VERSION);
        assert_eq!(bundle.records.len(), 3);

        // Moving to a new backend preserves the validation history
        let restored = bundle.into_catalog(MemoryStore::default()).unwrap();
        let latest = restored.resolve("infinite-magic").unwrap();
        assert_eq!(latest.version, 2);
        assert!(latest.validated);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let path = std::env::temp_dir().join(format!("smod-bundle-bad-{}.json", std::process::id()));
        let c = populated();
        let mut bundle = ExportBundle::from_catalog(&c);
        bundle.schema_version = 99;
        let contents = serde_json::to_string(&bundle).unwrap();
        fs::write(&path, contents).unwrap();

        assert!(matches!(
            ExportBundle::read(&path),
            Err(CatalogError::SchemaVersion(99))
        ));

        fs::remove_file(&path).unwrap();
    }
}

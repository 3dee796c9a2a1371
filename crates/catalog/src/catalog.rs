//! The catalog proper: an in-memory index over the append-only record log.

use crate::discovery::{Category, Confidence, Discovery, DiscoveryDraft, Relation};
use crate::store::CatalogStore;
use crate::CatalogError;
use std::collections::{HashMap, HashSet};

/// A validation step: pure, ordered, and deterministic. Replaces the ad hoc
/// pre-add hook registration the research tooling sketched.
type Validator = fn(&DiscoveryDraft) -> Result<(), String>;

const VALIDATORS: &[(&str, Validator)] = &[
    ("name", validate_name),
    ("target", validate_target),
    ("size", validate_size),
    ("pattern", validate_pattern),
];

fn validate_name(draft: &DiscoveryDraft) -> Result<(), String> {
    if draft.name.trim().len() < 3 {
        return Err(format!("name {:?} is shorter than 3 characters", draft.name));
    }
    Ok(())
}

fn validate_target(draft: &DiscoveryDraft) -> Result<(), String> {
    match draft.category {
        Category::Memory => {
            if draft.snes_addr.is_none() {
                return Err("memory discoveries need a console address".into());
            }
        }
        _ => {
            if draft.rom_offset.is_none() {
                return Err(format!(
                    "{} discoveries need a physical ROM offset",
                    draft.category
                ));
            }
        }
    }
    Ok(())
}

fn validate_size(draft: &DiscoveryDraft) -> Result<(), String> {
    if draft.size == 0 {
        return Err("size must be at least 1 byte".into());
    }
    Ok(())
}

fn validate_pattern(draft: &DiscoveryDraft) -> Result<(), String> {
    if let Some(pattern) = &draft.expected {
        if pattern.is_empty() {
            return Err("expected pattern given but empty".into());
        }
        if pattern.len() != draft.size as usize {
            return Err(format!(
                "expected pattern is {} bytes but size says {}",
                pattern.len(),
                draft.size
            ));
        }
    }
    Ok(())
}

/// Partial update applied on top of an existing record.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryChanges {
    pub rom_offset: Option<u32>,
    pub snes_addr: Option<u32>,
    pub size: Option<u32>,
    pub expected: Option<Vec<u8>>,
    pub meaning: Option<String>,
    pub confidence: Option<Confidence>,
    pub related: Option<Vec<Relation>>,
}

/// Query filter; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub category: Option<Category>,
    pub min_confidence: Option<Confidence>,
    pub validated: Option<bool>,
    pub name_contains: Option<String>,
    /// Include records that a newer version has replaced.
    pub include_superseded: bool,
}

impl DiscoveryFilter {
    fn matches(&self, record: &Discovery) -> bool {
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if record.confidence < min {
                return false;
            }
        }
        if let Some(validated) = self.validated {
            if record.validated != validated {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !record.name.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

pub struct Catalog<S: CatalogStore> {
    store: S,
    records: Vec<Discovery>,
    by_id: HashMap<u64, usize>,
    /// Latest version id per (name, category).
    latest: HashMap<(String, Category), u64>,
    superseded: HashSet<u64>,
    allow_duplicates: bool,
    next_id: u64,
}

impl<S: CatalogStore> Catalog<S> {
    /// Replay the store's log and build the index.
    pub fn open(mut store: S) -> Result<Self, CatalogError> {
        let records = store.load()?;
        let mut catalog = Self {
            store,
            records: Vec::new(),
            by_id: HashMap::new(),
            latest: HashMap::new(),
            superseded: HashSet::new(),
            allow_duplicates: false,
            next_id: 1,
        };
        for record in records {
            catalog.index(record);
        }
        Ok(catalog)
    }

    /// Allow several same-named discoveries within one category.
    pub fn allow_duplicates(&mut self, allow: bool) {
        self.allow_duplicates = allow;
    }

    fn index(&mut self, record: Discovery) {
        self.next_id = self.next_id.max(record.id + 1);
        if let Some(old) = record.supersedes {
            self.superseded.insert(old);
        }
        self.latest
            .insert((record.name.clone(), record.category), record.id);
        self.by_id.insert(record.id, self.records.len());
        self.records.push(record);
    }

    /// Append-then-index: the record only enters the in-memory state once
    /// the store has accepted it, so a storage failure changes nothing.
    fn persist(&mut self, record: Discovery) -> Result<u64, CatalogError> {
        self.store.append(&record)?;
        let id = record.id;
        self.index(record);
        Ok(id)
    }

    /// Validate a draft and store it as a fresh version-1 record.
    pub fn add(&mut self, draft: DiscoveryDraft) -> Result<u64, CatalogError> {
        for (step, validate) in VALIDATORS {
            validate(&draft).map_err(|reason| CatalogError::Validation { step, reason })?;
        }
        let key = (draft.name.clone(), draft.category);
        if !self.allow_duplicates && self.latest.contains_key(&key) {
            return Err(CatalogError::Duplicate {
                name: draft.name,
                category: draft.category,
            });
        }

        let record = Discovery {
            id: self.next_id,
            name: draft.name,
            category: draft.category,
            rom_offset: draft.rom_offset,
            snes_addr: draft.snes_addr,
            size: draft.size,
            expected: draft.expected,
            meaning: draft.meaning,
            confidence: draft.confidence,
            validated: false,
            version: 1,
            supersedes: None,
            related: draft.related,
        };
        log::info!("catalog add: {} ({})", record.name, record.category);
        self.persist(record)
    }

    /// Produce a revised version of a record. The original stays in the log
    /// untouched; lookups by name resolve to the revision from now on.
    pub fn update(&mut self, id: u64, changes: DiscoveryChanges) -> Result<u64, CatalogError> {
        let base = self.get(id).ok_or(CatalogError::NotFound(id))?.clone();
        let mut revised = base;
        revised.id = self.next_id;
        revised.version += 1;
        revised.supersedes = Some(id);
        if let Some(offset) = changes.rom_offset {
            revised.rom_offset = Some(offset);
        }
        if let Some(addr) = changes.snes_addr {
            revised.snes_addr = Some(addr);
        }
        if let Some(size) = changes.size {
            revised.size = size;
        }
        if let Some(expected) = changes.expected {
            revised.expected = Some(expected);
        }
        if let Some(meaning) = changes.meaning {
            revised.meaning = meaning;
        }
        if let Some(confidence) = changes.confidence {
            revised.confidence = confidence;
        }
        if let Some(related) = changes.related {
            revised.related = related;
        }
        // A revised target has not been re-verified yet
        revised.validated = false;
        log::info!(
            "catalog update: {} v{} supersedes #{}",
            revised.name,
            revised.version,
            id
        );
        self.persist(revised)
    }

    /// The only path by which `validated` becomes true. Driven by real
    /// verifier outcomes; a pass raises confidence, a failure floors it.
    pub fn record_verification(&mut self, id: u64, passed: bool) -> Result<u64, CatalogError> {
        let base = self.get(id).ok_or(CatalogError::NotFound(id))?.clone();
        let mut revised = base;
        revised.id = self.next_id;
        revised.version += 1;
        revised.supersedes = Some(id);
        revised.validated = passed;
        revised.confidence = if passed {
            revised.confidence.raised()
        } else {
            revised.confidence.lowered()
        };
        log::info!(
            "verification {} for {}: confidence now {}",
            if passed { "passed" } else { "FAILED" },
            revised.name,
            revised.confidence
        );
        self.persist(revised)
    }

    pub fn get(&self, id: u64) -> Option<&Discovery> {
        self.by_id.get(&id).map(|&i| &self.records[i])
    }

    /// Latest version of a name within one category.
    pub fn latest(&self, name: &str, category: Category) -> Option<&Discovery> {
        self.latest
            .get(&(name.to_string(), category))
            .and_then(|id| self.get(*id))
    }

    /// Latest version of a name, searching categories in a fixed order.
    pub fn resolve(&self, name: &str) -> Option<&Discovery> {
        Category::ALL
            .iter()
            .find_map(|&category| self.latest(name, category))
    }

    /// Matching records in insertion order within this catalog instance;
    /// callers wanting a global order must sort explicitly.
    pub fn query(&self, filter: &DiscoveryFilter) -> Vec<&Discovery> {
        self.records
            .iter()
            .filter(|r| filter.include_superseded || !self.superseded.contains(&r.id))
            .filter(|r| filter.matches(r))
            .collect()
    }

    pub fn records(&self) -> &[Discovery] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

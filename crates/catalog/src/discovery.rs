//! Discovery record types.

use serde::{Deserialize, Serialize};
use smod_core::SnesAddr;
use std::fmt;

/// What kind of thing a discovery describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Inventory/equipment data in ROM.
    Item,
    /// Sprite or OAM-related data.
    Sprite,
    /// A runtime WRAM location worth observing.
    Memory,
    /// A code routine (patch target).
    Routine,
    /// An indexed data table.
    Table,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Item,
        Category::Sprite,
        Category::Memory,
        Category::Routine,
        Category::Table,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "item" => Some(Category::Item),
            "sprite" => Some(Category::Sprite),
            "memory" => Some(Category::Memory),
            "routine" => Some(Category::Routine),
            "table" => Some(Category::Table),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Item => "item",
            Category::Sprite => "sprite",
            Category::Memory => "memory",
            Category::Routine => "routine",
            Category::Table => "table",
        };
        f.write_str(s)
    }
}

/// Ordered confidence ladder; derives `Ord` so filters can use a minimum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Experimental,
    Low,
    Medium,
    High,
    Verified,
}

impl Confidence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "experimental" => Some(Confidence::Experimental),
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            "verified" => Some(Confidence::Verified),
            _ => None,
        }
    }

    /// One step up the ladder (saturating).
    pub fn raised(self) -> Self {
        match self {
            Confidence::Experimental => Confidence::Low,
            Confidence::Low => Confidence::Medium,
            Confidence::Medium => Confidence::High,
            Confidence::High | Confidence::Verified => Confidence::Verified,
        }
    }

    /// Back to the floor; a failed verification invalidates prior trust.
    pub fn lowered(self) -> Self {
        Confidence::Experimental
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Experimental => "experimental",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::Verified => "verified",
        };
        f.write_str(s)
    }
}

/// Typed link between discoveries ("this table is indexed by that routine").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub target_id: u64,
    pub kind: String,
}

/// A stored, immutable discovery record.
///
/// `rom_offset` and `snes_addr` are serialized as plain integers to keep
/// the on-disk schema simple; accessors rebuild the typed forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: u64,
    pub name: String,
    pub category: Category,
    /// Body-relative physical offset; required unless this is a pure
    /// runtime (`Memory`) observation point.
    pub rom_offset: Option<u32>,
    /// Packed 24-bit console address, when known.
    pub snes_addr: Option<u32>,
    pub size: u32,
    /// Byte pattern this target should hold once the mod is applied.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected: Option<Vec<u8>>,
    pub meaning: String,
    pub confidence: Confidence,
    pub validated: bool,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub supersedes: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related: Vec<Relation>,
}

impl Discovery {
    pub fn rom_offset(&self) -> Option<smod_core::RomOffset> {
        self.rom_offset.map(smod_core::RomOffset::new)
    }

    pub fn snes_addr(&self) -> Option<SnesAddr> {
        self.snes_addr.map(SnesAddr::from_packed)
    }
}

/// Input to `Catalog::add`; the catalog assigns the id, version and flags.
#[derive(Debug, Clone)]
pub struct DiscoveryDraft {
    pub name: String,
    pub category: Category,
    pub rom_offset: Option<u32>,
    pub snes_addr: Option<u32>,
    pub size: u32,
    pub expected: Option<Vec<u8>>,
    pub meaning: String,
    pub confidence: Confidence,
    pub related: Vec<Relation>,
}

impl DiscoveryDraft {
    pub fn new(name: impl Into<String>, category: Category, size: u32) -> Self {
        Self {
            name: name.into(),
            category,
            rom_offset: None,
            snes_addr: None,
            size,
            expected: None,
            meaning: String::new(),
            confidence: Confidence::Experimental,
            related: Vec::new(),
        }
    }

    pub fn rom_offset(mut self, offset: u32) -> Self {
        self.rom_offset = Some(offset);
        self
    }

    pub fn snes_addr(mut self, packed: u32) -> Self {
        self.snes_addr = Some(packed);
        self
    }

    pub fn expected(mut self, bytes: Vec<u8>) -> Self {
        self.expected = Some(bytes);
        self
    }

    pub fn meaning(mut self, text: impl Into<String>) -> Self {
        self.meaning = text.into();
        self
    }

    pub fn confidence(mut self, level: Confidence) -> Self {
        self.confidence = level;
        self
    }

    pub fn related(mut self, target_id: u64, kind: impl Into<String>) -> Self {
        self.related.push(Relation {
            target_id,
            kind: kind.into(),
        });
        self
    }
}

//! Backing stores for the append-only discovery log.

use crate::{CatalogError, Discovery};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A store appends records and replays them; it never rewrites history.
pub trait CatalogStore {
    fn append(&mut self, record: &Discovery) -> Result<(), CatalogError>;
    fn load(&mut self) -> Result<Vec<Discovery>, CatalogError>;
}

impl<T: CatalogStore + ?Sized> CatalogStore for Box<T> {
    fn append(&mut self, record: &Discovery) -> Result<(), CatalogError> {
        (**self).append(record)
    }

    fn load(&mut self) -> Result<Vec<Discovery>, CatalogError> {
        (**self).load()
    }
}

/// Ephemeral store for tests and one-shot pipelines.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<Discovery>,
}

impl CatalogStore for MemoryStore {
    fn append(&mut self, record: &Discovery) -> Result<(), CatalogError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<Discovery>, CatalogError> {
        Ok(self.records.clone())
    }
}

/// One JSON record per line, append-only. A failed append reports the
/// error and leaves every previously persisted line intact; nothing ever
/// rewrites earlier records in place.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for JsonlStore {
    fn append(&mut self, record: &Discovery) -> Result<(), CatalogError> {
        let line = serde_json::to_string(record)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<Discovery>, CatalogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Discovery = serde_json::from_str(line).map_err(|e| {
                CatalogError::Store(format!(
                    "{}:{}: malformed record: {}",
                    self.path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            records.push(record);
        }
        log::debug!(
            "loaded {} records from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Confidence};

    fn record(id: u64, name: &str) -> Discovery {
        Discovery {
            id,
            name: name.into(),
            category: Category::Routine,
            rom_offset: Some(0x1000),
            snes_addr: None,
            size: 1,
            expected: None,
            meaning: String::new(),
            confidence: Confidence::Low,
            validated: false,
            version: 1,
            supersedes: None,
            related: Vec::new(),
        }
    }

    #[test]
    fn test_jsonl_round_trip() {
        let path = std::env::temp_dir().join(format!("smod-store-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut store = JsonlStore::new(&path);
        store.append(&record(1, "first")).unwrap();
        store.append(&record(2, "second")).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "first");
        assert_eq!(loaded[1].name, "second");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_jsonl_missing_file_is_empty() {
        let path = std::env::temp_dir().join("smod-store-does-not-exist.jsonl");
        let mut store = JsonlStore::new(&path);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_jsonl_reports_corruption() {
        let path =
            std::env::temp_dir().join(format!("smod-store-bad-{}.jsonl", std::process::id()));
        fs::write(&path, "{not json}\n").unwrap();

        let mut store = JsonlStore::new(&path);
        let err = store.load().unwrap_err();
        assert!(matches!(err, CatalogError::Store(_)));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_preserves_existing_lines() {
        let path =
            std::env::temp_dir().join(format!("smod-store-app-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut store = JsonlStore::new(&path);
        store.append(&record(1, "keep-me")).unwrap();
        let before = fs::read_to_string(&path).unwrap();
        store.append(&record(2, "new")).unwrap();
        let after = fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before), "append must not rewrite history");

        fs::remove_file(&path).unwrap();
    }
}

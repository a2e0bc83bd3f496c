//! Persisted symbol tables, keyed by artifact digest.
//!
//! A table is stored as one JSON file per digest. Entries are written once
//! and referenced by index from the address map, so aliased addresses come
//! back sharing a single `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SymbolTable, TimestampFormats};
use crate::error::{Result, TraceError};
use crate::types::SymbolEntry;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTable
{
    version: u32,
    digest: String,
    formats: TimestampFormats,
    entries: Vec<SymbolEntry>,
    addresses: BTreeMap<u32, usize>,
}

impl PersistedTable
{
    fn from_table(digest: &str, table: &SymbolTable) -> Self
    {
        let mut entries = Vec::new();
        let mut seen: HashMap<*const SymbolEntry, usize> = HashMap::new();
        let mut addresses = BTreeMap::new();

        for (address, entry) in table.sorted() {
            let index = *seen.entry(Arc::as_ptr(&entry)).or_insert_with(|| {
                entries.push((*entry).clone());
                entries.len() - 1
            });
            addresses.insert(address, index);
        }

        Self {
            version: CACHE_VERSION,
            digest: digest.to_string(),
            formats: table.formats(),
            entries,
            addresses,
        }
    }

    fn into_table(self) -> Option<SymbolTable>
    {
        let shared: Vec<Arc<SymbolEntry>> = self.entries.into_iter().map(Arc::new).collect();
        let mut table = SymbolTable::new();
        for (address, index) in self.addresses {
            table.entries.insert(address, shared.get(index)?.clone());
        }
        table.set_timestamp_formats(self.formats);
        Some(table)
    }
}

/// On-disk store of symbol tables.
#[derive(Debug, Clone)]
pub struct TableCache
{
    dir: PathBuf,
}

impl TableCache
{
    pub fn new(dir: impl Into<PathBuf>) -> Self
    {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path
    {
        &self.dir
    }

    fn path_for(&self, digest: &str) -> PathBuf
    {
        self.dir.join(format!("{digest}.json"))
    }

    /// Load the table persisted for `digest`.
    ///
    /// Missing, unreadable or stale files all yield `None`; the caller then
    /// rebuilds from the artifacts.
    #[must_use]
    pub fn load(&self, digest: &str) -> Option<SymbolTable>
    {
        let path = self.path_for(digest);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cached symbol table");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read cached symbol table");
                return None;
            }
        };

        let persisted: PersistedTable = match serde_json::from_slice(&raw) {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding corrupt symbol cache");
                return None;
            }
        };
        if persisted.version != CACHE_VERSION || persisted.digest != digest {
            warn!(
                path = %path.display(),
                version = persisted.version,
                "discarding symbol cache from another version or digest"
            );
            return None;
        }

        let table = persisted.into_table();
        if table.is_none() {
            warn!(path = %path.display(), "symbol cache references a missing entry");
        }
        table
    }

    /// Persist `table` under `digest`, replacing any previous file.
    pub fn store(&self, digest: &str, table: &SymbolTable) -> Result<()>
    {
        fs::create_dir_all(&self.dir)?;
        let persisted = PersistedTable::from_table(digest, table);
        let raw = serde_json::to_vec(&persisted).map_err(|err| TraceError::Cache(err.to_string()))?;

        let path = self.path_for(digest);
        let tmp = self.dir.join(format!("{digest}.json.tmp"));
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), entries = table.len(), "stored symbol table");
        Ok(())
    }
}

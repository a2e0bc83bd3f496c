//! Cached, self-refreshing symbol table.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use super::cache::TableCache;
use super::image::{artifact_digest, scan_artifacts, LoadedArtifact};
use super::{SymbolLookup, SymbolTable, TimestampFormats};
use crate::config::ResolverConfig;
use crate::error::{Result, TraceError};
use crate::types::SymbolEntry;

/// Symbol table built from debug artifacts, persisted per artifact digest.
///
/// The table is swapped wholesale on rebuild; readers holding an older
/// `Arc<SymbolTable>` keep a consistent view until they drop it.
///
/// ## Refresh
///
/// When watching is enabled, any create/modify/remove event on an artifact
/// marks the resolver dirty. The next [`SymbolResolver::table`] call rebuilds
/// (consulting the cache first) and replaces the table. A failed rebuild keeps
/// the previous table and is logged.
pub struct SymbolResolver
{
    artifacts: Vec<PathBuf>,
    cache: Option<TableCache>,
    table: RwLock<Arc<SymbolTable>>,
    dirty: Arc<AtomicBool>,
    rebuilds: AtomicUsize,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl SymbolResolver
{
    /// Build the initial table and start watching the artifacts.
    ///
    /// ## Errors
    ///
    /// Fails when an artifact cannot be read or parsed, or when the watcher
    /// cannot be installed.
    pub fn new(config: ResolverConfig) -> Result<Self>
    {
        let cache = config.cache_dir.map(TableCache::new);
        let rebuilds = AtomicUsize::new(0);
        let table = build_table(&config.artifacts, cache.as_ref(), &rebuilds)?;
        let dirty = Arc::new(AtomicBool::new(false));

        let watcher = if config.watch {
            Some(watch_artifacts(&config.artifacts, dirty.clone())?)
        } else {
            None
        };

        Ok(Self {
            artifacts: config.artifacts,
            cache,
            table: RwLock::new(Arc::new(table)),
            dirty,
            rebuilds,
            watcher: Mutex::new(watcher),
        })
    }

    /// Current table, rebuilding first if an artifact changed.
    pub fn table(&self) -> Arc<SymbolTable>
    {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.rebuild();
        }
        self.table.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Force a rebuild on the next table access.
    pub fn mark_dirty(&self)
    {
        self.dirty.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool
    {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of full artifact scans performed; cache hits are not counted.
    #[must_use]
    pub fn rebuild_count(&self) -> usize
    {
        self.rebuilds.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn artifacts(&self) -> &[PathBuf]
    {
        &self.artifacts
    }

    #[must_use]
    pub fn is_watching(&self) -> bool
    {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn rebuild(&self)
    {
        match build_table(&self.artifacts, self.cache.as_ref(), &self.rebuilds) {
            Ok(table) => {
                info!(entries = table.len(), "symbol table reloaded after artifact change");
                *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
            }
            Err(err) => error!(%err, "symbol table rebuild failed, keeping the previous table"),
        }
    }
}

impl SymbolLookup for SymbolResolver
{
    fn lookup(&self, address: u32) -> Option<Arc<SymbolEntry>>
    {
        self.table().get(address)
    }

    fn timestamp_formats(&self) -> TimestampFormats
    {
        self.table().formats()
    }
}

fn build_table(artifacts: &[PathBuf], cache: Option<&TableCache>, rebuilds: &AtomicUsize) -> Result<SymbolTable>
{
    let loaded = artifacts
        .iter()
        .map(|path| LoadedArtifact::read(path))
        .collect::<Result<Vec<_>>>()?;
    let digest = artifact_digest(&loaded);

    if let Some(table) = cache.and_then(|cache| cache.load(&digest)) {
        debug!(%digest, entries = table.len(), "symbol table loaded from cache");
        return Ok(table);
    }

    let table = scan_artifacts(&loaded)?;
    rebuilds.fetch_add(1, Ordering::Relaxed);
    info!(%digest, entries = table.len(), artifacts = loaded.len(), "built symbol table");

    if let Some(cache) = cache {
        if let Err(err) = cache.store(&digest, &table) {
            warn!(%err, dir = %cache.dir().display(), "failed to persist symbol table");
        }
    }
    Ok(table)
}

/// Split an artifact path into its canonical directory and full path.
fn watch_target(path: &Path) -> Result<(PathBuf, PathBuf)>
{
    let name = path
        .file_name()
        .ok_or_else(|| TraceError::InvalidConfig(format!("{} does not name a file", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.canonicalize()?,
        _ => PathBuf::from(".").canonicalize()?,
    };
    let full = dir.join(name);
    Ok((dir, full))
}

fn watch_artifacts(artifacts: &[PathBuf], dirty: Arc<AtomicBool>) -> Result<RecommendedWatcher>
{
    let mut dirs = Vec::new();
    let mut watched = HashSet::new();
    for path in artifacts {
        let (dir, full) = watch_target(path)?;
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
        watched.insert(full);
    }

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_));
            if relevant && event.paths.iter().any(|path| watched.contains(path)) {
                debug!(paths = ?event.paths, "debug artifact changed");
                dirty.store(true, Ordering::Release);
            }
        }
        Err(err) => warn!(%err, "artifact watcher error"),
    })?;

    for dir in &dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }
    debug!(directories = dirs.len(), "watching debug artifacts");
    Ok(watcher)
}

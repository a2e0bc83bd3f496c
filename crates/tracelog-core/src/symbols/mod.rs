//! # Symbols
//!
//! Address-to-call-site resolution built from debug artifacts.
//!
//! The firmware only ever transmits the address of a metadata string. This
//! module turns the artifacts' `.log_data` / `.log_ptr` contents into a
//! [`SymbolTable`], persists it per artifact digest ([`TableCache`]), and
//! keeps it current while artifacts change on disk ([`SymbolResolver`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tracelog_core::config::ResolverConfig;
//! use tracelog_core::symbols::{SymbolLookup, SymbolResolver};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let resolver = SymbolResolver::new(ResolverConfig::new(vec!["app.out".into()]))?;
//!     if let Some(entry) = resolver.lookup(0x9000_0010) {
//!         println!("{}:{} {}", entry.file, entry.line, entry.format);
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod image;
mod metadata;
mod resolver;

use std::collections::HashMap;
use std::sync::Arc;

pub use cache::TableCache;
pub use image::{artifact_digest, scan_artifacts, LoadedArtifact};
pub use metadata::{parse_metadata, MetadataError, RECORD_SEPARATOR};
pub use resolver::SymbolResolver;
use serde::{Deserialize, Serialize};

use crate::timestamp::TimestampFormat;
use crate::types::SymbolEntry;

/// Native timestamp descriptors found in the artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFormats
{
    /// `TimestampP_nativeFormat32`
    pub native32: Option<TimestampFormat>,
    /// `TimestampP_nativeFormat64`
    pub native64: Option<TimestampFormat>,
}

impl TimestampFormats
{
    /// Widest available format; time-sync records use this one.
    #[must_use]
    pub fn preferred(&self) -> Option<TimestampFormat>
    {
        self.native64.or(self.native32)
    }
}

/// Read-only view used by decoders and reassemblers.
///
/// A miss is `None`, never an error.
pub trait SymbolLookup: Send + Sync
{
    fn lookup(&self, address: u32) -> Option<Arc<SymbolEntry>>;

    fn timestamp_formats(&self) -> TimestampFormats;
}

/// Immutable address-to-entry map.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    entries: HashMap<u32, Arc<SymbolEntry>>,
    formats: TimestampFormats,
}

impl SymbolTable
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Add an entry at `address`, returning the shared handle.
    pub fn insert(&mut self, address: u32, entry: SymbolEntry) -> Arc<SymbolEntry>
    {
        let entry = Arc::new(entry);
        self.entries.insert(address, entry.clone());
        entry
    }

    /// Make `alias` resolve to the same entry as `target`.
    ///
    /// Returns `false` when `target` is unknown.
    pub fn alias(&mut self, alias: u32, target: u32) -> bool
    {
        let Some(entry) = self.entries.get(&target).cloned() else {
            return false;
        };
        self.entries.insert(alias, entry);
        true
    }

    pub fn set_timestamp_formats(&mut self, formats: TimestampFormats)
    {
        self.formats = formats;
    }

    #[must_use]
    pub fn get(&self, address: u32) -> Option<Arc<SymbolEntry>>
    {
        self.entries.get(&address).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn formats(&self) -> TimestampFormats
    {
        self.formats
    }

    /// Entries ordered by address.
    #[must_use]
    pub fn sorted(&self) -> Vec<(u32, Arc<SymbolEntry>)>
    {
        let mut entries: Vec<_> = self.entries.iter().map(|(addr, entry)| (*addr, entry.clone())).collect();
        entries.sort_by_key(|(addr, _)| *addr);
        entries
    }
}

impl SymbolLookup for SymbolTable
{
    fn lookup(&self, address: u32) -> Option<Arc<SymbolEntry>>
    {
        self.get(address)
    }

    fn timestamp_formats(&self) -> TimestampFormats
    {
        self.formats
    }
}

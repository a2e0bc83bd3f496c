//! Debug artifact loading and log-symbol extraction.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::{Object, ObjectSection, ObjectSymbol, SectionIndex};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::metadata::parse_metadata;
use super::{SymbolTable, TimestampFormats};
use crate::error::{Result, TraceError};
use crate::timestamp::TimestampFormat;
use crate::types::{Opcode, SymbolEntry};

const LOG_DATA_SECTION: &str = ".log_data";
const LOG_PTR_SECTION_PREFIX: &str = ".log_ptr";
const LOG_SYMBOL_PREFIX: &str = "LogSymbol_";
const POINTER_SYMBOL_PREFIX: &str = "Ptr_LogSymbol";
const FORMAT32_SYMBOL: &str = "TimestampP_nativeFormat32";
const FORMAT64_SYMBOL: &str = "TimestampP_nativeFormat64";

/// A debug artifact read fully into memory.
#[derive(Debug, Clone)]
pub struct LoadedArtifact
{
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
}

impl LoadedArtifact
{
    pub fn read(path: &Path) -> Result<Self>
    {
        let bytes = fs::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes: Arc::from(bytes),
        })
    }
}

/// Content digest over every artifact, in configuration order.
#[must_use]
pub fn artifact_digest(artifacts: &[LoadedArtifact]) -> String
{
    let mut hasher = Sha256::new();
    for artifact in artifacts {
        hasher.update((artifact.bytes.len() as u64).to_le_bytes());
        hasher.update(&artifact.bytes);
    }
    hex::encode(hasher.finalize())
}

/// Build a symbol table from the given artifacts.
///
/// Pointer entries are resolved only after every artifact has been scanned,
/// so a pointer may reference a log symbol from another image.
pub fn scan_artifacts(artifacts: &[LoadedArtifact]) -> Result<SymbolTable>
{
    let mut state = ScanState::default();
    for artifact in artifacts {
        scan_one(&artifact.path, &artifact.bytes, &mut state)?;
    }
    Ok(state.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolClass
{
    LogSymbol,
    Pointer,
    Format32,
    Format64,
}

fn classify(name: &str, section: &str) -> Option<SymbolClass>
{
    match name {
        FORMAT32_SYMBOL => return Some(SymbolClass::Format32),
        FORMAT64_SYMBOL => return Some(SymbolClass::Format64),
        _ => {}
    }
    if name.starts_with(POINTER_SYMBOL_PREFIX) || section.starts_with(LOG_PTR_SECTION_PREFIX) {
        return Some(SymbolClass::Pointer);
    }
    if name.starts_with(LOG_SYMBOL_PREFIX) || section == LOG_DATA_SECTION {
        return Some(SymbolClass::LogSymbol);
    }
    None
}

struct SectionBlob<'data>
{
    name: &'data str,
    address: u64,
    data: Cow<'data, [u8]>,
}

impl<'data> SectionBlob<'data>
{
    fn load(section: &object::Section<'data, '_>) -> Result<Self>
    {
        let name = section.name().unwrap_or("");
        let data = section
            .uncompressed_data()
            .map_err(|err| TraceError::InvalidArtifact(format!("failed to read {name}: {err}")))?;
        Ok(Self {
            name,
            address: section.address(),
            data,
        })
    }

    fn bytes_at(&self, address: u64) -> Option<&[u8]>
    {
        let offset = usize::try_from(address.checked_sub(self.address)?).ok()?;
        self.data.get(offset..)
    }
}

#[derive(Default)]
struct ScanState
{
    log_symbols: Vec<(u32, SymbolEntry)>,
    by_name: HashMap<String, SymbolEntry>,
    pointers: Vec<(u32, u32, String)>,
    formats: TimestampFormats,
}

impl ScanState
{
    fn finish(self) -> SymbolTable
    {
        let mut table = SymbolTable::new();

        for (address, mut entry) in self.log_symbols {
            if entry.opcode == Opcode::Event {
                match self.by_name.get(&format!("{LOG_SYMBOL_PREFIX}{}", entry.format)) {
                    Some(event) => entry.format = event.format.clone(),
                    None => debug!(event = %entry.format, "event definition not found"),
                }
            }
            table.insert(address, entry);
        }

        for (alias, target, name) in self.pointers {
            if !table.alias(alias, target) {
                warn!(
                    symbol = %name,
                    target = %format_args!("0x{target:08x}"),
                    "log pointer does not resolve to a log symbol"
                );
            }
        }

        table.set_timestamp_formats(self.formats);
        table
    }
}

fn scan_one(path: &Path, data: &[u8], state: &mut ScanState) -> Result<()>
{
    let file = object::File::parse(data)
        .map_err(|err| TraceError::InvalidArtifact(format!("failed to parse {}: {err}", path.display())))?;
    let little_endian = file.is_little_endian();
    let mut sections: HashMap<SectionIndex, SectionBlob<'_>> = HashMap::new();

    for symbol in file.symbols() {
        let Ok(name) = symbol.name() else {
            continue;
        };
        // skip section, file and ARM mapping symbols
        if name.is_empty() || name.starts_with('$') {
            continue;
        }
        let Some(index) = symbol.section_index() else {
            continue;
        };

        if !sections.contains_key(&index) {
            let section = file
                .section_by_index(index)
                .map_err(|err| TraceError::InvalidArtifact(format!("{}: {err}", path.display())))?;
            sections.insert(index, SectionBlob::load(&section)?);
        }
        let blob = &sections[&index];

        let Some(class) = classify(name, blob.name) else {
            continue;
        };
        let Ok(address) = u32::try_from(symbol.address()) else {
            warn!(symbol = name, address = symbol.address(), "log symbol outside the 32-bit address space");
            continue;
        };
        let Some(bytes) = blob.bytes_at(symbol.address()) else {
            warn!(symbol = name, section = blob.name, "symbol lies outside its section data");
            continue;
        };

        match class {
            SymbolClass::LogSymbol => {
                let raw = c_string(bytes);
                match parse_metadata(&raw) {
                    Ok(entry) => {
                        state.by_name.insert(name.to_string(), entry.clone());
                        state.log_symbols.push((address, entry));
                    }
                    Err(err) => debug!(symbol = name, %err, "skipping malformed log metadata"),
                }
            }
            SymbolClass::Pointer => {
                if let Some(target) = read_word(bytes, little_endian) {
                    state.pointers.push((address, target, name.to_string()));
                }
            }
            SymbolClass::Format32 => {
                state.formats.native32 = read_word(bytes, little_endian).map(TimestampFormat::from_descriptor);
            }
            SymbolClass::Format64 => {
                state.formats.native64 = read_word(bytes, little_endian).map(TimestampFormat::from_descriptor);
            }
        }
    }

    debug!(
        artifact = %path.display(),
        log_symbols = state.log_symbols.len(),
        pointers = state.pointers.len(),
        "scanned debug artifact"
    );
    Ok(())
}

fn c_string(bytes: &[u8]) -> String
{
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_word(bytes: &[u8], little_endian: bool) -> Option<u32>
{
    let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(word)
    } else {
        u32::from_be_bytes(word)
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_classify()
    {
        assert_eq!(classify("LogSymbol_80", ".log_data"), Some(SymbolClass::LogSymbol));
        assert_eq!(classify("Ptr_LogSymbol_80", ".log_ptr_80_LogMod_App"), Some(SymbolClass::Pointer));
        assert_eq!(classify("anything", ".log_ptr"), Some(SymbolClass::Pointer));
        assert_eq!(classify("TimestampP_nativeFormat32", ".rodata"), Some(SymbolClass::Format32));
        assert_eq!(classify("main", ".text"), None);
    }

    #[test]
    fn test_c_string_stops_at_nul()
    {
        assert_eq!(c_string(b"abc\0def"), "abc");
        assert_eq!(c_string(b"abc"), "abc");
    }

    #[test]
    fn test_read_word_endianness()
    {
        assert_eq!(read_word(&[1, 0, 0, 0], true), Some(1));
        assert_eq!(read_word(&[0, 0, 0, 1], false), Some(1));
        assert_eq!(read_word(&[1, 2], true), None);
    }

    #[test]
    fn test_digest_depends_on_content()
    {
        let a = LoadedArtifact {
            path: "a.out".into(),
            bytes: Arc::from(&b"one"[..]),
        };
        let b = LoadedArtifact {
            path: "b.out".into(),
            bytes: Arc::from(&b"one"[..]),
        };
        let c = LoadedArtifact {
            path: "a.out".into(),
            bytes: Arc::from(&b"two"[..]),
        };
        assert_eq!(artifact_digest(&[a.clone()]), artifact_digest(&[b]));
        assert_ne!(artifact_digest(&[a]), artifact_digest(&[c]));
    }
}

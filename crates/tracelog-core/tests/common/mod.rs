#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use tracelog_core::dispatcher::Sink;
use tracelog_core::symbols::{SymbolTable, TimestampFormats};
use tracelog_core::timestamp::TimestampFormat;
use tracelog_core::types::{LogRecord, Opcode, Severity, SymbolEntry, SymbolKind as EntryKind};

/// Offset of the first metadata string in `.log_data`, keeping log symbol
/// addresses clear of the pointer addresses in `.log_ptr`.
const LOG_DATA_START: usize = 0x100;

/// 32 integer bits counting microseconds.
pub const MICROSECOND_DESCRIPTOR: u32 = 0x0001_0640;

/// Metadata string in the firmware's seven-field layout.
pub fn meta(opcode: &str, file: &str, line: u32, level: &str, module: &str, format: &str, nargs: u32) -> String
{
    [
        opcode.to_string(),
        format!("\"{file}\""),
        line.to_string(),
        level.to_string(),
        module.to_string(),
        format!("\"{format}\""),
        nargs.to_string(),
    ]
    .join("\u{1e}")
}

/// Minimal relocatable ELF carrying log metadata.
pub struct ElfBuilder
{
    log_data: Vec<u8>,
    log_symbols: Vec<(String, u64)>,
    pointers: Vec<(String, u32)>,
    formats: Vec<(&'static str, u32)>,
}

impl ElfBuilder
{
    pub fn new() -> Self
    {
        Self {
            log_data: vec![0; LOG_DATA_START],
            log_symbols: Vec::new(),
            pointers: Vec::new(),
            formats: Vec::new(),
        }
    }

    /// Add a `LogSymbol_*` string; returns its address.
    pub fn log_symbol(&mut self, name: &str, metadata: &str) -> u32
    {
        let offset = self.log_data.len();
        self.log_data.extend_from_slice(metadata.as_bytes());
        self.log_data.push(0);
        while self.log_data.len() % 4 != 0 {
            self.log_data.push(0);
        }
        self.log_symbols.push((name.to_string(), offset as u64));
        offset as u32
    }

    /// Add a `Ptr_LogSymbol_*` word pointing at `target`; returns its address.
    pub fn pointer(&mut self, name: &str, target: u32) -> u32
    {
        let address = (self.pointers.len() * 4) as u32;
        self.pointers.push((name.to_string(), target));
        address
    }

    pub fn timestamp32(&mut self, descriptor: u32)
    {
        self.formats.push(("TimestampP_nativeFormat32", descriptor));
    }

    pub fn timestamp64(&mut self, descriptor: u32)
    {
        self.formats.push(("TimestampP_nativeFormat64", descriptor));
    }

    pub fn build(&self) -> Vec<u8>
    {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::Arm, Endianness::Little);

        let log_data = obj.add_section(Vec::new(), b".log_data".to_vec(), SectionKind::ReadOnlyData);
        obj.append_section_data(log_data, &self.log_data, 4);
        for (name, offset) in &self.log_symbols {
            add_data_symbol(&mut obj, name, *offset, log_data);
        }

        if !self.pointers.is_empty() {
            let words: Vec<u8> = self.pointers.iter().flat_map(|(_, target)| target.to_le_bytes()).collect();
            let log_ptr = obj.add_section(Vec::new(), b".log_ptr".to_vec(), SectionKind::ReadOnlyData);
            obj.append_section_data(log_ptr, &words, 4);
            for (index, (name, _)) in self.pointers.iter().enumerate() {
                add_data_symbol(&mut obj, name, (index * 4) as u64, log_ptr);
            }
        }

        if !self.formats.is_empty() {
            let words: Vec<u8> = self.formats.iter().flat_map(|(_, word)| word.to_le_bytes()).collect();
            let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
            obj.append_section_data(rodata, &words, 4);
            for (index, (name, _)) in self.formats.iter().enumerate() {
                add_data_symbol(&mut obj, name, (index * 4) as u64, rodata);
            }
        }

        obj.write().unwrap()
    }
}

fn add_data_symbol(obj: &mut Object<'_>, name: &str, value: u64, section: object::write::SectionId)
{
    obj.add_symbol(Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size: 4,
        kind: SymbolKind::Data,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::None,
    });
}

// ---- symbol tables built in memory ----

pub const TEXT_ADDR: u32 = 0x9000_0010;
pub const PAIR_ADDR: u32 = 0x9000_0020;
pub const BUFFER_ADDR: u32 = 0x9000_0030;
pub const RADIO_ADDR: u32 = 0x9000_0040;
pub const CUSTOM_ADDR: u32 = 0x9000_0050;

pub fn entry(kind: EntryKind, opcode: Opcode, module: &str, format: &str, nargs: u32) -> SymbolEntry
{
    SymbolEntry {
        kind,
        opcode,
        file: "app/main.c".to_string(),
        line: 42,
        level: Severity::Info,
        module: module.to_string(),
        format: format.to_string(),
        nargs,
    }
}

/// Table with one call site per interesting shape.
pub fn sample_table(with_format: bool) -> SymbolTable
{
    let mut table = SymbolTable::new();
    table.insert(
        TEXT_ADDR,
        entry(EntryKind::FormattedText, Opcode::FormattedText, "LogMod_App", "count %d", 1),
    );
    table.insert(
        PAIR_ADDR,
        entry(EntryKind::FormattedText, Opcode::FormattedText, "LogMod_App", "%d of %d", 2),
    );
    table.insert(BUFFER_ADDR, entry(EntryKind::Buffer, Opcode::Buffer, "LogMod_Net", "rx", 0));
    table.insert(
        RADIO_ADDR,
        entry(EntryKind::FormattedText, Opcode::FormattedText, "LogMod_Radio", "rssi %d", 1),
    );
    table.insert(
        CUSTOM_ADDR,
        entry(
            EntryKind::FormattedText,
            Opcode::Custom("LOG_OPCODE_PACKET".to_string()),
            "LogMod_Radio",
            "packet",
            1,
        ),
    );
    if with_format {
        table.set_timestamp_formats(TimestampFormats {
            native32: Some(TimestampFormat::from_descriptor(MICROSECOND_DESCRIPTOR)),
            native64: None,
        });
    }
    table
}

// ---- bit-packed wire encoding ----

/// Software stimulus write of 1, 2 or 4 bytes.
pub fn stimulus(port: u8, bytes: &[u8]) -> Vec<u8>
{
    let class = match bytes.len() {
        1 => 1,
        2 => 2,
        4 => 3,
        other => panic!("stimulus writes are 1, 2 or 4 bytes, not {other}"),
    };
    let mut out = vec![(port << 3) | class];
    out.extend_from_slice(bytes);
    out
}

pub fn itm_header(address: u32) -> Vec<u8>
{
    stimulus(0, &address.to_le_bytes())
}

pub fn itm_word(word: u32) -> Vec<u8>
{
    stimulus(1, &word.to_le_bytes())
}

// ---- header-framed wire encoding ----

pub fn uart_text(address: u32, timestamp: u32, args: &[u32]) -> Vec<u8>
{
    let mut out = address.to_le_bytes().to_vec();
    out.extend_from_slice(&timestamp.to_le_bytes());
    for arg in args {
        out.extend_from_slice(&arg.to_le_bytes());
    }
    out
}

pub fn uart_buffer(address: u32, timestamp: u32, data: &[u8]) -> Vec<u8>
{
    let mut out = address.to_le_bytes().to_vec();
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

// ---- sinks ----

/// Sink remembering `(transport, rendered)` pairs.
#[derive(Default)]
pub struct Collect
{
    seen: Mutex<Vec<(String, String)>>,
}

impl Collect
{
    pub fn new() -> Arc<Self>
    {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<(String, String)>
    {
        self.seen.lock().unwrap().clone()
    }

    pub fn rendered(&self) -> Vec<String>
    {
        self.lines().into_iter().map(|(_, rendered)| rendered).collect()
    }
}

impl Sink for Collect
{
    fn notify(&self, record: &LogRecord, rendered: &str)
    {
        self.seen.lock().unwrap().push((record.alias.clone(), rendered.to_string()));
    }
}

/// `Write` target that can be inspected after it was handed away.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer
{
    pub fn text(&self) -> String
    {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for SharedBuffer
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>
    {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()>
    {
        Ok(())
    }
}

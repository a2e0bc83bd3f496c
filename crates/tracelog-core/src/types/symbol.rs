//! Log call-site metadata recovered from debug artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opcodes below this value get built-in rendering.
pub const RESERVED_OPCODE_LIMIT: u8 = 0x10;

/// How a record's payload is sized and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind
{
    /// Format string with `nargs` 32-bit arguments
    FormattedText,
    /// Raw byte buffer whose length travels in-band
    Buffer,
}

/// Record opcode tag from the metadata string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode
{
    Event,
    FormattedText,
    Buffer,
    Version,
    EventConstruct,
    /// Anything outside the built-in set, kept verbatim
    Custom(String),
}

impl Opcode
{
    /// Parse the opcode token as written by the firmware's log macros.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self
    {
        match tag.trim() {
            "LOG_OPCODE_EVENT" => Self::Event,
            "LOG_OPCODE_FORMATED_TEXT" | "LOG_OPCODE_FORMATTED_TEXT" => Self::FormattedText,
            "LOG_OPCODE_BUFFER" => Self::Buffer,
            "LOG_OPCODE_VERSION" => Self::Version,
            "LOG_EVENT_CONSTRUCT" => Self::EventConstruct,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Numeric opcode, for the built-in opcodes only.
    #[must_use]
    pub fn code(&self) -> Option<u8>
    {
        match self {
            Self::Event => Some(1),
            Self::FormattedText => Some(2),
            Self::Buffer => Some(3),
            Self::Version => Some(4),
            Self::EventConstruct => Some(5),
            Self::Custom(_) => None,
        }
    }

    /// Whether the dispatcher renders this opcode itself.
    #[must_use]
    pub fn is_builtin(&self) -> bool
    {
        self.code().is_some_and(|code| code < RESERVED_OPCODE_LIMIT)
    }
}

impl fmt::Display for Opcode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        // pad, so width and alignment flags apply
        match self {
            Self::Event => f.pad("EVENT"),
            Self::FormattedText => f.pad("FORMATTED_TEXT"),
            Self::Buffer => f.pad("BUFFER"),
            Self::Version => f.pad("VERSION"),
            Self::EventConstruct => f.pad("EVENT_CONSTRUCT"),
            Self::Custom(tag) => f.pad(tag),
        }
    }
}

/// Severity level of a log call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity
{
    Debug,
    Verbose,
    Info,
    Warning,
    Error,
    /// Level mask outside the standard set
    Other(u32),
}

impl Severity
{
    /// Parse a level token (`Log_DEBUG`) or its numeric mask (`1`).
    #[must_use]
    pub fn from_tag(tag: &str) -> Self
    {
        let tag = tag.trim();
        match tag {
            "Log_DEBUG" => return Self::Debug,
            "Log_VERBOSE" => return Self::Verbose,
            "Log_INFO" => return Self::Info,
            "Log_WARNING" => return Self::Warning,
            "Log_ERROR" => return Self::Error,
            _ => {}
        }
        match tag.parse::<u32>() {
            Ok(mask) => Self::from_mask(mask),
            Err(_) => Self::Other(0),
        }
    }

    #[must_use]
    pub fn from_mask(mask: u32) -> Self
    {
        match mask {
            1 => Self::Debug,
            4 => Self::Verbose,
            16 => Self::Info,
            64 => Self::Warning,
            256 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Severity
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Debug => f.pad("DEBUG"),
            Self::Verbose => f.pad("VERBOSE"),
            Self::Info => f.pad("INFO"),
            Self::Warning => f.pad("WARNING"),
            Self::Error => f.pad("ERROR"),
            Self::Other(mask) => f.pad(&format!("LEVEL({mask})")),
        }
    }
}

/// Correlation data for a single log call site.
///
/// Entries are immutable once the symbol table is built and are shared by
/// `Arc`; aliased addresses point at the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolEntry
{
    pub kind: SymbolKind,
    pub opcode: Opcode,
    pub file: String,
    pub line: u32,
    pub level: Severity,
    pub module: String,
    pub format: String,
    pub nargs: u32,
}

impl SymbolEntry
{
    /// Payload bytes a record of this call site needs, when known up front.
    ///
    /// Buffers announce their length in-band, so they return `None`.
    #[must_use]
    pub fn payload_len(&self) -> Option<usize>
    {
        match self.kind {
            SymbolKind::FormattedText => Some(self.nargs as usize * 4),
            SymbolKind::Buffer => None,
        }
    }
}

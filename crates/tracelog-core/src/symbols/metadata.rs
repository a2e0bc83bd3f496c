//! Parsing of the metadata strings stored in `.log_data`.
//!
//! Each string is seven fields joined by the ASCII record separator:
//! `opcode, file, line, level, module, format, nargs`. The file and format
//! fields are stringified C literals, so they keep their quotes and escapes.

use thiserror::Error;

use crate::types::{Opcode, Severity, SymbolEntry, SymbolKind};

/// Field separator inside a metadata string.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const FIELD_COUNT: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError
{
    #[error("expected 7 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: {value:?}")]
    InvalidField
    {
        field: &'static str, value: String
    },
}

/// Parse one metadata string into a symbol entry.
///
/// Event records keep the event name in `format`; the scanner swaps in the
/// event's own format string once every symbol is known.
pub fn parse_metadata(raw: &str) -> Result<SymbolEntry, MetadataError>
{
    let fields: Vec<&str> = raw.split(RECORD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(MetadataError::FieldCount(fields.len()));
    }

    let opcode = Opcode::from_tag(fields[0]);

    // version markers reuse the layout as (module, version, 0, 0, 0, 0)
    if opcode == Opcode::Version {
        return Ok(SymbolEntry {
            kind: SymbolKind::FormattedText,
            opcode,
            file: unquote(fields[1]),
            line: 0,
            level: Severity::Other(0),
            module: String::new(),
            format: unquote(fields[2]),
            nargs: 0,
        });
    }

    let line = fields[2].trim().parse::<u32>().map_err(|_| MetadataError::InvalidField {
        field: "line",
        value: fields[2].to_string(),
    })?;
    let nargs = fields[6].trim().parse::<u32>().map_err(|_| MetadataError::InvalidField {
        field: "nargs",
        value: fields[6].to_string(),
    })?;

    let kind = if opcode == Opcode::Buffer {
        SymbolKind::Buffer
    } else {
        SymbolKind::FormattedText
    };

    Ok(SymbolEntry {
        kind,
        opcode,
        file: unquote(fields[1]),
        line,
        level: Severity::from_tag(fields[3]),
        module: fields[4].trim().to_string(),
        format: unquote(fields[5]),
        nargs,
    })
}

/// Strip one pair of surrounding double quotes and undo C escapes.
fn unquote(field: &str) -> String
{
    let trimmed = field.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

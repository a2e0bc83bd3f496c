//! Text rendering of finished records.

use thiserror::Error;

use crate::types::{LogRecord, Opcode};

/// Why a record could not be rendered. The record is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError
{
    /// The format string and the record disagree on the argument count
    #[error("format {format:?} takes {expected} arguments but the record carries {actual}: {values:08x?}")]
    ArgumentMismatch
    {
        format: String,
        expected: usize,
        actual: usize,
        values: Vec<u32>,
    },

    /// Formatted-text payload that is not a whole number of words
    #[error("argument data is {len} bytes, not a whole number of words")]
    MisalignedData
    {
        len: usize
    },

    /// Conversion the renderer does not implement
    #[error("unsupported conversion %{conversion} in {format:?}")]
    UnsupportedConversion
    {
        conversion: char, format: String
    },

    /// Field width or precision beyond [`MAX_FIELD_WIDTH`]
    #[error("field width or precision in {format:?} exceeds {limit}")]
    WidthTooLarge
    {
        format: String, limit: usize
    },
}

/// Largest field width or precision a conversion may request.
pub const MAX_FIELD_WIDTH: usize = 4096;

/// Rewrites the rendered text of one module's records.
pub trait ModuleFormatter: Send + Sync
{
    fn format(&self, record: &LogRecord, rendered: String) -> String;
}

impl<F> ModuleFormatter for F
where
    F: Fn(&LogRecord, String) -> String + Send + Sync,
{
    fn format(&self, record: &LogRecord, rendered: String) -> String
    {
        self(record, rendered)
    }
}

/// Built-in rendering for the reserved opcodes; other opcodes render as
/// their raw format string.
pub fn render_builtin(record: &LogRecord) -> Result<String, RenderError>
{
    let format = &record.entry.format;
    match record.opcode {
        Opcode::FormattedText | Opcode::Event | Opcode::EventConstruct => {
            let words = record
                .argument_words()
                .ok_or(RenderError::MisalignedData { len: record.data.len() })?;
            format_printf(format, &words)
        }
        Opcode::Buffer if record.data.is_empty() => Ok(format.clone()),
        Opcode::Buffer if format.is_empty() => Ok(hex_dump(&record.data)),
        Opcode::Buffer => Ok(format!("{format} {}", hex_dump(&record.data))),
        Opcode::Version | Opcode::Custom(_) => Ok(format.clone()),
    }
}

/// Bytes as lowercase, space-separated hex pairs.
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String
{
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default, Clone, Copy)]
struct Conversion
{
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
    kind: char,
}

enum Piece
{
    Literal(String),
    Conversion(Conversion),
}

/// Substitute 32-bit arguments into a C `printf` format string.
///
/// Supports `%d %i %u %x %X %o %c %f %p %s %%` with flags, width and
/// precision; length modifiers are accepted and ignored. `%f` reads the word
/// as an IEEE-754 single. `%s` prints the pointer, since device memory is not
/// reachable from the host.
pub fn format_printf(format: &str, args: &[u32]) -> Result<String, RenderError>
{
    let pieces = parse(format)?;
    let expected = pieces
        .iter()
        .filter(|piece| matches!(piece, Piece::Conversion(_)))
        .count();
    if expected != args.len() {
        return Err(RenderError::ArgumentMismatch {
            format: format.to_string(),
            expected,
            actual: args.len(),
            values: args.to_vec(),
        });
    }

    let mut out = String::with_capacity(format.len() + args.len() * 8);
    let mut args = args.iter();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(&text),
            Piece::Conversion(conversion) => {
                if let Some(value) = args.next() {
                    out.push_str(&conversion.render(*value));
                }
            }
        }
    }
    Ok(out)
}

fn parse(format: &str) -> Result<Vec<Piece>, RenderError>
{
    let unsupported = |conversion| RenderError::UnsupportedConversion {
        conversion,
        format: format.to_string(),
    };
    let too_wide = || RenderError::WidthTooLarge {
        format: format.to_string(),
        limit: MAX_FIELD_WIDTH,
    };

    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(std::mem::take(&mut literal)));
        }

        let mut conversion = Conversion::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => conversion.left = true,
                '0' => conversion.zero = true,
                '+' => conversion.plus = true,
                ' ' => conversion.space = true,
                '#' => conversion.alternate = true,
                _ => break,
            }
            chars.next();
        }
        conversion.width = field_width(&mut chars).ok_or_else(too_wide)?;
        if chars.peek() == Some(&'.') {
            chars.next();
            conversion.precision = Some(field_width(&mut chars).ok_or_else(too_wide)?);
        }
        while chars.peek().is_some_and(|c| matches!(c, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't')) {
            chars.next();
        }

        let kind = chars.next().ok_or_else(|| unsupported('%'))?;
        if !matches!(kind, 'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' | 'f' | 'F' | 'p' | 's') {
            return Err(unsupported(kind));
        }
        conversion.kind = kind;
        pieces.push(Piece::Conversion(conversion));
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

impl Conversion
{
    fn render(&self, value: u32) -> String
    {
        match self.kind {
            'd' | 'i' => {
                let signed = value as i32;
                let sign = if signed < 0 {
                    "-"
                } else if self.plus {
                    "+"
                } else if self.space {
                    " "
                } else {
                    ""
                };
                self.integer(sign, signed.unsigned_abs().to_string())
            }
            'u' => self.integer("", value.to_string()),
            'x' => self.integer(self.prefix(value, "0x"), format!("{value:x}")),
            'X' => self.integer(self.prefix(value, "0X"), format!("{value:X}")),
            'o' => self.integer(self.prefix(value, "0"), format!("{value:o}")),
            'c' => self.pad("", char::from(value as u8).to_string(), false),
            'f' | 'F' => {
                let float = f64::from(f32::from_bits(value));
                let sign = if float.is_sign_negative() {
                    "-"
                } else if self.plus {
                    "+"
                } else if self.space {
                    " "
                } else {
                    ""
                };
                let body = format!("{:.*}", self.precision.unwrap_or(6), float.abs());
                self.pad(sign, body, float.is_finite())
            }
            // 'p' and 's'
            _ => self.pad("", format!("0x{value:08x}"), false),
        }
    }

    fn prefix(&self, value: u32, prefix: &'static str) -> &'static str
    {
        if self.alternate && value != 0 {
            prefix
        } else {
            ""
        }
    }

    fn integer(&self, sign: &str, digits: String) -> String
    {
        let digits = match self.precision {
            Some(0) if digits == "0" => String::new(),
            Some(precision) if digits.len() < precision => format!("{digits:0>precision$}"),
            _ => digits,
        };
        self.pad(sign, digits, self.precision.is_none())
    }

    /// Apply width; zero padding goes between the sign/prefix and the digits.
    fn pad(&self, sign: &str, body: String, zero_allowed: bool) -> String
    {
        let len = sign.len() + body.len();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let fill = self.width - len;
        if self.left {
            format!("{sign}{body}{}", " ".repeat(fill))
        } else if self.zero && zero_allowed {
            format!("{sign}{}{body}", "0".repeat(fill))
        } else {
            format!("{}{sign}{body}", " ".repeat(fill))
        }
    }
}

/// Decimal digits of a width or precision; `None` once past the limit.
fn field_width(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize>
{
    let mut width: usize = 0;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        width = width
            .checked_mul(10)
            .and_then(|width| width.checked_add(digit as usize))
            .filter(|width| *width <= MAX_FIELD_WIDTH)?;
        chars.next();
    }
    Some(width)
}

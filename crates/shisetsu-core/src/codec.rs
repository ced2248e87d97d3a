//! Tab-delimited row codec.
//!
//! Fields are escaped the way PostgreSQL's `COPY ... FROM` text format expects:
//! backslash, tab, newline and carriage return become `\\`, `\t`, `\n`, `\r`.
//! A row is therefore always exactly one line.

use std::io::{self, Write};

use thiserror::Error;

pub const DELIMITER: char = '\t';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("dangling backslash at end of field")]
    DanglingEscape,

    #[error("unknown escape sequence \\{0}")]
    UnknownEscape(char),
}

pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_field(field: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(CodecError::UnknownEscape(other)),
            None => return Err(CodecError::DanglingEscape),
        }
    }
    Ok(out)
}

/// Write one escaped, tab-joined row followed by a newline.
pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, fields: &[S]) -> io::Result<()> {
    let mut first = true;
    for field in fields {
        if !first {
            write!(w, "{DELIMITER}")?;
        }
        first = false;
        w.write_all(escape_field(field.as_ref()).as_bytes())?;
    }
    writeln!(w)
}

/// Split one line (without its terminator) into unescaped fields.
pub fn split_row(line: &str) -> Result<Vec<String>, CodecError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.split(DELIMITER).map(unescape_field).collect()
}

//! BibTeX entry parser.
//!
//! Turns raw entries into [`Record`]s. The text is split into blocks and
//! each block is read by the `biblatex` crate on its own, so a malformed
//! entry is skipped with a warning instead of failing the whole text.
//! `@string` definitions are carried over to later blocks; `@comment` and
//! `@preamble` blocks are ignored.

use std::fmt;

use biblatex::{Bibliography, Chunk, Spanned};
use regex::Regex;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::splitter::{EntrySplitter, SplitMode};

/// Key under which the entry type is exported when entry metadata is enabled.
pub const ENTRY_TYPE_KEY: &str = "ENTRYTYPE";
/// Key under which the citation key is exported when entry metadata is enabled.
pub const ENTRY_KEY_KEY: &str = "ID";

/// Month macros defined ahead of every block.
const MONTH_MACROS: &[(&str, &str)] = &[
    ("jan", "January"),
    ("feb", "February"),
    ("mar", "March"),
    ("apr", "April"),
    ("may", "May"),
    ("jun", "June"),
    ("jul", "July"),
    ("aug", "August"),
    ("sep", "September"),
    ("oct", "October"),
    ("nov", "November"),
    ("dec", "December"),
];

/// Total failure to parse an input.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("input is not valid UTF-8 text: {0}")]
    NotText(#[from] std::str::Utf8Error),
}

/// Why a single entry could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntryError {
    #[error("entry does not start with '@'")]
    MissingMarker,

    #[error("missing entry type after '@'")]
    MissingType,

    #[error("missing '{{' or '(' after @{0}")]
    MissingOpener(String),

    #[error("@{0} entry is never closed")]
    Unterminated(String),

    #[error("@{0} block is not a bibliographic entry")]
    NotAnEntry(String),

    #[error("invalid BibTeX: {0}")]
    Syntax(String),

    #[error("no entry could be read from the @{0} block")]
    NoEntry(String),
}

/// A parsed bibliographic entry: its type, citation key and fields.
///
/// Field names are stored in lowercase, in the order they first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entry_type: String,
    key: String,
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(entry_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into().to_lowercase(),
            key: key.into(),
            fields: Vec::new(),
        }
    }

    /// Creates a record from `(name, value)` pairs.
    pub fn from_fields<I, K, V>(entry_type: &str, key: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut record = Self::new(entry_type, key);
        for (name, value) in fields {
            record.set(name.as_ref(), value.into());
        }
        record
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Looks up a field by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(name, value)` pairs in parsed order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sets a field. A repeated name replaces the earlier value in place.
    fn set(&mut self, name: &str, value: String) {
        let name = name.to_lowercase();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of string fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::default();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    match name.as_str() {
                        ENTRY_TYPE_KEY => record.entry_type = value,
                        ENTRY_KEY_KEY => record.key = value,
                        _ if name.is_empty() => {
                            return Err(de::Error::custom("field name must not be empty"))
                        }
                        _ => record.set(&name, value),
                    }
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// An entry that was skipped during parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWarning {
    /// Position of the entry among all entries of the input, from 0.
    pub index: usize,
    pub cause: EntryError,
}

impl fmt::Display for EntryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {} skipped: {}", self.index, self.cause)
    }
}

/// Result of parsing a whole text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBibliography {
    pub records: Vec<Record>,
    pub warnings: Vec<EntryWarning>,
}

/// What a single `@...` block turned out to be.
enum Block {
    Entry(Record),
    StringDef(String),
    Ignored(String),
}

/// Header and body delimiters of one block.
struct Layout {
    entry_type: String,
    /// Byte offset of the opening `{` or `(`.
    open: usize,
    /// Byte offset of the matching closer.
    close: usize,
    /// Top-level field names, lowercased, in source order.
    field_order: Vec<String>,
}

/// Reads blocks one at a time, keeping the `@string` definitions seen so
/// far so that later blocks can use them.
struct BlockReader {
    header_re: Regex,
    field_re: Regex,
    /// BibTeX source of every accepted `@string` block, month macros first.
    strings: String,
}

impl BlockReader {
    fn new() -> Self {
        let strings = MONTH_MACROS
            .iter()
            .map(|(name, value)| format!("@string{{{name} = {{{value}}}}}\n"))
            .collect();
        Self {
            header_re: Regex::new(r"^\s*@\s*([A-Za-z][\w-]*)?\s*([{(])?").unwrap(),
            field_re: Regex::new(r##"^\s*([^\s=,{}()"#%]+)\s*="##).unwrap(),
            strings,
        }
    }

    fn read(&mut self, raw: &str) -> Result<Block, EntryError> {
        let caps = self
            .header_re
            .captures(raw)
            .ok_or(EntryError::MissingMarker)?;
        let entry_type = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .ok_or(EntryError::MissingType)?;
        if entry_type == "comment" {
            return Ok(Block::Ignored(entry_type));
        }
        let open = caps
            .get(2)
            .map(|m| m.start())
            .ok_or_else(|| EntryError::MissingOpener(entry_type.clone()))?;
        if entry_type == "preamble" {
            return Ok(Block::Ignored(entry_type));
        }

        let layout = self.layout(raw, entry_type, open)?;
        // `biblatex` reads brace-delimited blocks; trailing text is dropped.
        let source = format!(
            "@{}{{{}}}\n",
            layout.entry_type,
            &raw[layout.open + 1..layout.close]
        );
        let bibliography = Bibliography::parse(&format!("{}{}", self.strings, source))
            .map_err(|e| EntryError::Syntax(e.to_string()))?;

        if layout.entry_type == "string" {
            self.strings.push_str(&source);
            return Ok(Block::StringDef(source));
        }

        let entry = bibliography
            .iter()
            .next()
            .ok_or_else(|| EntryError::NoEntry(layout.entry_type.clone()))?;

        let mut values: Vec<(String, String)> = entry
            .fields
            .iter()
            .map(|(name, chunks)| (name.to_lowercase(), field_text(chunks)))
            .collect();
        let mut record = Record::new(layout.entry_type, entry.key.clone());
        for name in &layout.field_order {
            if let Some(i) = values.iter().position(|(n, _)| n == name) {
                let (name, value) = values.remove(i);
                record.set(&name, value);
            }
        }
        for (name, value) in values {
            record.set(&name, value);
        }
        Ok(Block::Entry(record))
    }

    /// Finds the closer matching the opener at `open` and the top-level
    /// field names in between.
    fn layout(&self, raw: &str, entry_type: String, open: usize) -> Result<Layout, EntryError> {
        let bytes = raw.as_bytes();
        let closer = if bytes[open] == b'(' { b')' } else { b'}' };
        let mut depth = 1usize;
        let mut in_quote = false;
        let mut field_order = Vec::new();

        for i in open + 1..bytes.len() {
            match bytes[i] {
                b'{' => depth += 1,
                b'}' if depth > 1 => depth -= 1,
                b'"' if depth == 1 => in_quote = !in_quote,
                b',' if depth == 1 && !in_quote => {
                    if let Some(caps) = self.field_re.captures(&raw[i + 1..]) {
                        field_order.push(caps[1].to_lowercase());
                    }
                }
                b if b == closer && depth == 1 && !in_quote => {
                    return Ok(Layout {
                        entry_type,
                        open,
                        close: i,
                        field_order,
                    });
                }
                _ => {}
            }
        }

        Err(EntryError::Unterminated(entry_type))
    }
}

/// Flattens a `biblatex` field value into plain text.
fn field_text(chunks: &[Spanned<Chunk>]) -> String {
    chunks
        .iter()
        .map(|chunk| match &chunk.v {
            Chunk::Normal(s) => s.as_str(),
            Chunk::Verbatim(s) => s.as_str(),
            Chunk::Math(s) => s.as_str(),
        })
        .collect()
}

/// Parses a whole BibTeX text.
///
/// Entries that fail to parse are reported in
/// [`ParsedBibliography::warnings`] and left out of the records.
///
/// # Examples
///
/// ```
/// use bibtex_convert::parse_bibtex;
///
/// let parsed = parse_bibtex("@article{a1, Title = {On Things}, year = 2019}");
/// assert_eq!(parsed.records.len(), 1);
/// assert_eq!(parsed.records[0].get("title"), Some("On Things"));
/// ```
pub fn parse_bibtex(text: &str) -> ParsedBibliography {
    let mut reader = BlockReader::new();
    let mut parsed = ParsedBibliography::default();

    for (index, raw) in EntrySplitter::new(text, SplitMode::Balanced).enumerate() {
        match reader.read(raw) {
            Ok(Block::Entry(record)) => parsed.records.push(record),
            Ok(Block::StringDef(source)) => log::debug!("defined {}", source.trim_end()),
            Ok(Block::Ignored(kind)) => log::debug!("ignoring @{kind} block"),
            Err(cause) => {
                let warning = EntryWarning { index, cause };
                log::warn!("{}", warning);
                parsed.warnings.push(warning);
            }
        }
    }

    log::debug!(
        "parsed {} record(s), skipped {} entry(ies)",
        parsed.records.len(),
        parsed.warnings.len()
    );
    parsed
}

/// Parses BibTeX held as raw bytes, which must be valid UTF-8.
pub fn parse_bibtex_bytes(bytes: &[u8]) -> Result<ParsedBibliography, ParseError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(parse_bibtex(text))
}

/// Parses a single raw entry into a [`Record`].
///
/// Only the month macros are available; `@string`, `@comment` and
/// `@preamble` blocks are not records and are rejected.
pub fn parse_entry(raw: &str) -> Result<Record, EntryError> {
    match BlockReader::new().read(raw)? {
        Block::Entry(record) => Ok(record),
        Block::StringDef(_) => Err(EntryError::NotAnEntry("string".to_string())),
        Block::Ignored(kind) => Err(EntryError::NotAnEntry(kind)),
    }
}

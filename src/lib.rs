//! bibtex-convert: convert BibTeX bibliographies into CSV, JSON and DOI lists.
//!
//! This library provides functionality to:
//! - Split concatenated BibTeX text into raw entries, optionally bounded
//! - Parse entries into ordered field records
//! - Extract DOIs and coerce year values
//! - Encode records as CSV and JSON, and DOIs as plain text

pub mod encode;
pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod splitter;

pub use encode::{
    column_names, decode_json, encode_csv, encode_csv_with, encode_doi_text, encode_json,
    encode_json_with, EncodeError, ExportFormat, ExportOptions,
};
pub use extract::{coerce_year, extract_identifiers};
pub use parser::{
    parse_bibtex, parse_bibtex_bytes, parse_entry, EntryError, EntryWarning, ParseError,
    ParsedBibliography, Record,
};
pub use pipeline::{
    run, run_bytes, run_with, Conversion, Diagnostic, Outcome, PipelineError, PipelineOptions,
    Stage,
};
pub use splitter::{join_entries, split_entries, EntrySplitter, SplitMode};

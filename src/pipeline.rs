//! Conversion pipeline.
//!
//! Runs one conversion end to end: optional preview splitting, parsing,
//! identifier extraction and encoding. Per-entry and per-encoder failures
//! are absorbed and reported as [`Diagnostic`]s; only a total failure is
//! returned as a [`PipelineError`].

use std::fmt;

use thiserror::Error;

use crate::encode::{
    encode_csv_with, encode_doi_text, encode_json_with, ExportFormat, ExportOptions,
};
use crate::extract::extract_identifiers;
use crate::parser::{parse_bibtex, EntryWarning, ParseError, ParsedBibliography, Record};
use crate::splitter::{join_entries, split_entries, SplitMode};

/// Errors that abort a whole conversion.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid preview limit {0}: the limit must be at least 1")]
    InvalidLimit(usize),

    #[error("Error processing BibTeX data while {stage}: {source}")]
    Parse {
        stage: Stage,
        #[source]
        source: ParseError,
    },
}

impl PipelineError {
    /// The stage the conversion was in when it failed.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidLimit(_) => Stage::Idle,
            PipelineError::Parse { stage, .. } => *stage,
        }
    }
}

/// Stages of a single conversion.
///
/// A conversion moves `Idle -> Splitting (with a limit) -> Parsing ->
/// Extracting -> Encoding -> Done`, or to `Failed` from the stage that
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Splitting,
    Parsing,
    Extracting,
    Encoding,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Splitting => "splitting",
            Stage::Parsing => "parsing",
            Stage::Extracting => "extracting",
            Stage::Encoding => "encoding",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A failure that was absorbed during a conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The input is not blank but contains no `@` entry marker.
    NoEntryMarker,
    /// An entry could not be parsed and was left out.
    SkippedEntry(EntryWarning),
    /// An encoder failed; its payload is absent.
    EncodeFailed { format: ExportFormat, cause: String },
}

impl Diagnostic {
    /// The stage in which the failure was absorbed.
    pub fn stage(&self) -> Stage {
        match self {
            Diagnostic::NoEntryMarker | Diagnostic::SkippedEntry(_) => Stage::Parsing,
            Diagnostic::EncodeFailed { .. } => Stage::Encoding,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NoEntryMarker => f.write_str("no BibTeX entry marker ('@') found in input"),
            Diagnostic::SkippedEntry(warning) => write!(f, "{}", warning),
            Diagnostic::EncodeFailed { format, cause } => {
                write!(f, "Error converting to {}: {}", format, cause)
            }
        }
    }
}

/// Settings for one conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Process only the first `limit` entries.
    pub limit: Option<usize>,
    /// How entries are delimited when a limit is applied.
    pub split_mode: SplitMode,
    pub export: ExportOptions,
}

/// Records and payloads of a conversion that produced at least one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub records: Vec<Record>,
    /// CSV payload, absent if the CSV encoder failed.
    pub csv: Option<Vec<u8>>,
    /// JSON payload, absent if the JSON encoder failed.
    pub json: Option<Vec<u8>>,
    pub identifiers: Vec<String>,
    /// DOI list payload, absent when no record has a DOI.
    pub doi_text: Option<Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of a conversion that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No record was produced; there is nothing to export.
    Empty { diagnostics: Vec<Diagnostic> },
    Converted(Conversion),
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty { .. })
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Outcome::Empty { .. } => &[],
            Outcome::Converted(conversion) => &conversion.records,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Outcome::Empty { diagnostics } => diagnostics,
            Outcome::Converted(conversion) => &conversion.diagnostics,
        }
    }

    pub fn into_conversion(self) -> Option<Conversion> {
        match self {
            Outcome::Empty { .. } => None,
            Outcome::Converted(conversion) => Some(conversion),
        }
    }
}

/// Current stage of one conversion.
struct Progress {
    stage: Stage,
}

impl Progress {
    fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    fn advance(&mut self, next: Stage) {
        log::debug!("pipeline stage: {} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Moves to `Failed`, returning the stage that failed.
    fn fail(&mut self) -> Stage {
        let failed_in = self.stage;
        self.advance(Stage::Failed);
        failed_in
    }
}

/// Input handed to a conversion.
enum Input<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

/// Converts BibTeX text, optionally limited to its first `limit` entries.
///
/// # Examples
///
/// ```
/// use bibtex_convert::{run, Outcome};
///
/// let text = "@article{a1, doi={10.1/x}, year={2019}}\n@book{b1, year={bad}}";
/// let conversion = run(text, None).unwrap().into_conversion().unwrap();
/// assert_eq!(conversion.records.len(), 2);
/// assert_eq!(conversion.identifiers, vec!["10.1/x"]);
///
/// assert!(matches!(run("", None).unwrap(), Outcome::Empty { .. }));
/// ```
pub fn run(raw: &str, limit: Option<usize>) -> Result<Outcome, PipelineError> {
    run_with(
        raw,
        &PipelineOptions {
            limit,
            ..PipelineOptions::default()
        },
    )
}

/// Converts BibTeX held as raw bytes, which must be valid UTF-8.
///
/// The bytes are decoded by the first stage of the conversion, so a decoding
/// error reports `Splitting` when a limit is set and `Parsing` otherwise.
pub fn run_bytes(bytes: &[u8], options: &PipelineOptions) -> Result<Outcome, PipelineError> {
    execute(Input::Bytes(bytes), options)
}

/// Converts BibTeX text with the given options.
///
/// With a limit, the text is first cut down to its first `limit` entries,
/// which are rejoined with newlines and parsed; without one, the whole text
/// is parsed directly.
pub fn run_with(raw: &str, options: &PipelineOptions) -> Result<Outcome, PipelineError> {
    execute(Input::Text(raw), options)
}

fn execute(input: Input<'_>, options: &PipelineOptions) -> Result<Outcome, PipelineError> {
    let mut progress = Progress::new();

    if options.limit == Some(0) {
        progress.fail();
        return Err(PipelineError::InvalidLimit(0));
    }

    progress.advance(if options.limit.is_some() {
        Stage::Splitting
    } else {
        Stage::Parsing
    });
    let raw = match input {
        Input::Text(text) => text,
        Input::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let source = ParseError::from(e);
                log::error!("Error parsing BibTeX: {}", source);
                return Err(PipelineError::Parse {
                    stage: progress.fail(),
                    source,
                });
            }
        },
    };

    let parsed = match options.limit {
        Some(limit) => {
            let entries = split_entries(raw, Some(limit), options.split_mode);
            log::debug!("limited input to {} of at most {} entries", entries.len(), limit);
            let limited = join_entries(&entries);
            progress.advance(Stage::Parsing);
            parse_bibtex(&limited)
        }
        None => parse_bibtex(raw),
    };

    let ParsedBibliography { records, warnings } = parsed;
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    if !raw.trim().is_empty() && !raw.contains('@') {
        diagnostics.push(Diagnostic::NoEntryMarker);
    }
    diagnostics.extend(warnings.into_iter().map(Diagnostic::SkippedEntry));

    if records.is_empty() {
        log::info!("no BibTeX entries found");
        progress.advance(Stage::Done);
        return Ok(Outcome::Empty { diagnostics });
    }

    progress.advance(Stage::Extracting);
    let identifiers = extract_identifiers(&records);
    log::debug!("extracted {} DOI(s) from {} record(s)", identifiers.len(), records.len());

    progress.advance(Stage::Encoding);
    let csv = absorb(
        ExportFormat::Csv,
        encode_csv_with(&records, options.export),
        &mut diagnostics,
    );
    let json = absorb(
        ExportFormat::Json,
        encode_json_with(&records, options.export),
        &mut diagnostics,
    );
    let doi_text = if identifiers.is_empty() {
        None
    } else {
        Some(encode_doi_text(&identifiers))
    };

    progress.advance(Stage::Done);
    Ok(Outcome::Converted(Conversion {
        records,
        csv,
        json,
        identifiers,
        doi_text,
        diagnostics,
    }))
}

/// Keeps a successful payload, or records the failure and drops it.
fn absorb<E: fmt::Display>(
    format: ExportFormat,
    result: Result<Vec<u8>, E>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Vec<u8>> {
    match result {
        Ok(payload) => Some(payload),
        Err(e) => {
            log::warn!("Error converting to {}: {}", format, e);
            diagnostics.push(Diagnostic::EncodeFailed {
                format,
                cause: e.to_string(),
            });
            None
        }
    }
}

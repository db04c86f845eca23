//! Export encoders.
//!
//! Serialize parsed records into the three export payloads: CSV, pretty
//! printed JSON and a newline-separated DOI list. All payloads are UTF-8.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::extract::coerce_year;
use crate::parser::{Record, ENTRY_KEY_KEY, ENTRY_TYPE_KEY};

/// Column rendered through [`coerce_year`].
const YEAR_COLUMN: &str = "year";

/// JSON indentation: four spaces.
const JSON_INDENT: &[u8] = b"    ";

/// Errors that can occur while encoding a payload.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to flush output: {0}")]
    Io(#[from] std::io::Error),
}

/// The export payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    DoiText,
}

impl ExportFormat {
    /// File name the payload is saved under.
    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Csv => "bibtex_output.csv",
            ExportFormat::Json => "bibtex_output.json",
            ExportFormat::DoiText => "dois.txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("CSV"),
            ExportFormat::Json => f.write_str("JSON"),
            ExportFormat::DoiText => f.write_str("DOI text"),
        }
    }
}

/// Options shared by the CSV and JSON encoders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Prepend `ENTRYTYPE` and `ID` columns/keys to every record.
    pub include_entry_meta: bool,
}

/// Borrowed view of a record as it is exported.
struct RecordView<'a> {
    record: &'a Record,
    options: ExportOptions,
}

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let meta = if self.options.include_entry_meta { 2 } else { 0 };
        let mut map = serializer.serialize_map(Some(self.record.len() + meta))?;
        if self.options.include_entry_meta {
            map.serialize_entry(ENTRY_TYPE_KEY, self.record.entry_type())?;
            map.serialize_entry(ENTRY_KEY_KEY, self.record.key())?;
        }
        for (name, value) in self.record.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Returns the union of field names across `records`, in first-seen order.
pub fn column_names(records: &[Record]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in record.fields() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }
    columns
}

/// Encodes records as CSV with default options.
pub fn encode_csv(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
    encode_csv_with(records, ExportOptions::default())
}

/// Encodes records as CSV.
///
/// The header is the union of all field names in first-seen order; fields a
/// record lacks are left empty. The `year` column is always an integer: a
/// missing or non-numeric year renders as `0`.
///
/// An empty record set has no columns and encodes to an empty payload.
pub fn encode_csv_with(
    records: &[Record],
    options: ExportOptions,
) -> Result<Vec<u8>, EncodeError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let columns = column_names(records);
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let mut header: Vec<&str> = Vec::with_capacity(columns.len() + 2);
    if options.include_entry_meta {
        header.extend([ENTRY_TYPE_KEY, ENTRY_KEY_KEY]);
    }
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for record in records {
        let mut row: Vec<String> = Vec::with_capacity(header.len());
        if options.include_entry_meta {
            row.push(record.entry_type().to_string());
            row.push(record.key().to_string());
        }
        for column in &columns {
            let value = record.get(column);
            let cell = if *column == YEAR_COLUMN {
                coerce_year(value.unwrap_or_default()).to_string()
            } else {
                value.unwrap_or_default().to_string()
            };
            row.push(cell);
        }
        writer.write_record(&row)?;
    }

    writer.into_inner().map_err(|e| EncodeError::Io(e.into_error()))
}

/// Encodes records as a JSON array with default options.
pub fn encode_json(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
    encode_json_with(records, ExportOptions::default())
}

/// Encodes records as a JSON array of objects, indented by four spaces.
///
/// Field values are exported as parsed; no year coercion happens here.
pub fn encode_json_with(
    records: &[Record],
    options: ExportOptions,
) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    (&mut serializer).collect_seq(records.iter().map(|record| RecordView { record, options }))?;
    Ok(out)
}

/// Reads a JSON payload back into records.
pub fn decode_json(bytes: &[u8]) -> Result<Vec<Record>, EncodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encodes identifiers as newline-separated text.
pub fn encode_doi_text(identifiers: &[String]) -> Vec<u8> {
    identifiers.join("\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::from_fields("article", "a1", [("doi", "10.1/x"), ("year", "2019")]),
            Record::from_fields("book", "b1", [("year", "bad"), ("title", "Café, \"Quoted\"")]),
        ]
    }

    // ============================================
    // Tests for encode_csv()
    // ============================================

    #[test]
    fn test_csv_union_of_columns() {
        // Given: Two records with overlapping fields
        let records = sample_records();

        // When: We encode them as CSV
        let csv = String::from_utf8(encode_csv(&records).unwrap()).unwrap();

        // Then: Columns are the union in first-seen order; missing cells are empty
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "doi,year,title");
        assert_eq!(lines[1], "10.1/x,2019,");
        assert_eq!(lines[2], ",0,\"Café, \"\"Quoted\"\"\"");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_missing_year_renders_zero() {
        let records = vec![
            Record::from_fields("misc", "a", [("year", "2001")]),
            Record::from_fields("misc", "b", [("title", "T")]),
        ];

        let csv = String::from_utf8(encode_csv(&records).unwrap()).unwrap();

        assert_eq!(csv, "year,title\n2001,\n0,T\n");
    }

    #[test]
    fn test_csv_year_has_no_fraction() {
        let records = vec![Record::from_fields("misc", "a", [("year", "2020.0")])];

        let csv = String::from_utf8(encode_csv(&records).unwrap()).unwrap();

        assert_eq!(csv, "year\n2020\n");
    }

    #[test]
    fn test_csv_empty_record_set_is_empty() {
        // Given: No records at all
        // When: We encode them
        let csv = encode_csv(&[]).unwrap();

        // Then: There are no columns, so the payload is empty
        assert!(csv.is_empty());
    }

    #[test]
    fn test_csv_multiline_value_is_quoted() {
        let records = vec![Record::from_fields("misc", "a", [("abstract", "one\ntwo")])];

        let csv = String::from_utf8(encode_csv(&records).unwrap()).unwrap();

        assert_eq!(csv, "abstract\n\"one\ntwo\"\n");
    }

    #[test]
    fn test_csv_with_entry_meta() {
        let records = sample_records();
        let options = ExportOptions {
            include_entry_meta: true,
        };

        let csv = String::from_utf8(encode_csv_with(&records, options).unwrap()).unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "ENTRYTYPE,ID,doi,year,title");
        assert!(lines[1].starts_with("article,a1,10.1/x,2019"));
    }

    // ============================================
    // Tests for encode_json()
    // ============================================

    #[test]
    fn test_json_four_space_indent() {
        let records = vec![Record::from_fields("misc", "a", [("title", "T"), ("year", "1")])];

        let json = String::from_utf8(encode_json(&records).unwrap()).unwrap();

        assert_eq!(
            json,
            "[\n    {\n        \"title\": \"T\",\n        \"year\": \"1\"\n    }\n]"
        );
    }

    #[test]
    fn test_json_keeps_raw_year() {
        let json = String::from_utf8(encode_json(&sample_records()).unwrap()).unwrap();

        assert!(json.contains("\"year\": \"bad\""));
    }

    #[test]
    fn test_json_roundtrip() {
        // Given: Records with unicode, quotes and differing fields
        let records = sample_records();

        // When: We encode and decode them
        let back = decode_json(&encode_json(&records).unwrap()).unwrap();

        // Then: Field content and order are unchanged
        assert_eq!(back.len(), records.len());
        for (a, b) in records.iter().zip(&back) {
            assert_eq!(a.fields().collect::<Vec<_>>(), b.fields().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_json_roundtrip_with_entry_meta() {
        let records = sample_records();
        let options = ExportOptions {
            include_entry_meta: true,
        };

        let back = decode_json(&encode_json_with(&records, options).unwrap()).unwrap();

        assert_eq!(back, records);
    }

    #[test]
    fn test_json_empty() {
        assert_eq!(encode_json(&[]).unwrap(), b"[]");
    }

    #[test]
    fn test_decode_json_rejects_non_array() {
        let result = decode_json(br#"{"title": "T"}"#);
        assert!(matches!(result, Err(EncodeError::Json(_))));
    }

    // ============================================
    // Tests for encode_doi_text()
    // ============================================

    #[test]
    fn test_doi_text() {
        let dois = vec!["10.1/x".to_string(), "10.2/y".to_string()];
        assert_eq!(encode_doi_text(&dois), b"10.1/x\n10.2/y");
        assert!(encode_doi_text(&[]).is_empty());
    }

    #[test]
    fn test_export_format_file_names() {
        assert_eq!(ExportFormat::Csv.file_name(), "bibtex_output.csv");
        assert_eq!(ExportFormat::Json.file_name(), "bibtex_output.json");
        assert_eq!(ExportFormat::DoiText.file_name(), "dois.txt");
    }
}

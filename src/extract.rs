//! Field extractors: secondary views derived from parsed records.

use crate::parser::Record;

/// Collects the `doi` field of each record, in record order.
///
/// Records without a DOI, or with an empty one, are skipped. Duplicates are
/// kept as encountered.
///
/// # Examples
///
/// ```
/// use bibtex_convert::{extract_identifiers, Record};
///
/// let records = vec![
///     Record::from_fields("article", "a", [("doi", "10.1/x")]),
///     Record::from_fields("book", "b", [("year", "2001")]),
/// ];
/// assert_eq!(extract_identifiers(&records), vec!["10.1/x"]);
/// ```
pub fn extract_identifiers(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("doi"))
        .filter(|doi| !doi.is_empty())
        .map(str::to_string)
        .collect()
}

/// Coerces a year value to an integer, yielding `0` when it is not numeric.
///
/// Surrounding whitespace is ignored and decimal forms such as `2020.0`
/// are truncated. Numbers outside the `i64` range also yield `0`.
pub fn coerce_year(value: &str) -> i64 {
    let value = value.trim();
    if let Ok(year) = value.parse::<i64>() {
        return year;
    }
    match value.parse::<f64>() {
        Ok(year) if (i64::MIN as f64..i64::MAX as f64).contains(&year) => year.trunc() as i64,
        _ => 0,
    }
}

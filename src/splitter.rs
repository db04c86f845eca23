//! Entry splitter.
//!
//! Scans raw BibTeX text and yields one substring per entry, starting at an
//! `@` marker and running up to the next marker (or the end of the input).
//! In balanced mode only an entry header (`@type{`, `@type(`) or an `@word`
//! at the start of a line opens an entry; any other `@` outside an entry is
//! free text. The splitter is a lazy iterator: bounding it with
//! [`Iterator::take`] never scans past the last entry requested.

use regex::Regex;

/// How entry boundaries are located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// Track brace/parenthesis depth so an `@` inside a field value never
    /// starts a new entry.
    #[default]
    Balanced,
    /// Every `@` starts a new entry, wherever it appears.
    Naive,
}

/// Lazy iterator over the raw entries of a BibTeX text.
///
/// # Examples
///
/// ```
/// use bibtex_convert::{EntrySplitter, SplitMode};
///
/// let text = "@article{a, note={mail me @ home}}\n@book{b}";
/// let entries: Vec<&str> = EntrySplitter::new(text, SplitMode::Balanced).collect();
/// assert_eq!(entries.len(), 2);
/// assert!(entries[0].contains("@ home"));
/// ```
pub struct EntrySplitter<'a> {
    text: &'a str,
    pos: usize,
    mode: SplitMode,
    /// Matches an entry header (`@type{` or `@type(`) at the start of a slice.
    header_re: Regex,
    /// Matches `@word` at the start of a slice, a candidate entry when it
    /// begins a line even without an opening delimiter.
    fragment_re: Regex,
}

impl<'a> EntrySplitter<'a> {
    pub fn new(text: &'a str, mode: SplitMode) -> Self {
        let header_re = Regex::new(r"^@[ \t]*[A-Za-z][\w-]*[ \t]*[{(]").unwrap();
        let fragment_re = Regex::new(r"^@[ \t]*[A-Za-z]").unwrap();
        let mut splitter = Self {
            text,
            pos: text.len(),
            mode,
            header_re,
            fragment_re,
        };
        splitter.pos = match mode {
            SplitMode::Naive => text.find('@').unwrap_or(text.len()),
            SplitMode::Balanced => splitter.first_start(),
        };
        splitter
    }

    /// Whether the `@` at byte `i` opens an entry outside any entry body.
    fn starts_entry(&self, i: usize, line_start: bool) -> bool {
        let rest = &self.text[i..];
        self.header_re.is_match(rest) || (line_start && self.fragment_re.is_match(rest))
    }

    /// Byte offset of the first entry in balanced mode.
    fn first_start(&self) -> usize {
        self.text
            .match_indices('@')
            .map(|(i, _)| i)
            .find(|&i| {
                let line = self.text[..i].rsplit('\n').next().unwrap_or_default();
                self.starts_entry(i, line.trim().is_empty())
            })
            .unwrap_or(self.text.len())
    }

    /// Returns the byte offset just past the entry starting at `start`.
    fn naive_end(&self, start: usize) -> usize {
        self.text[start + 1..]
            .find('@')
            .map_or(self.text.len(), |offset| start + 1 + offset)
    }

    /// Returns the byte offset just past the entry starting at `start`,
    /// ignoring markers nested inside the entry body and markers in free
    /// text that do not open an entry.
    ///
    /// An entry whose body never closes ends early when a well-formed
    /// entry header begins a line, so one broken entry cannot swallow the
    /// rest of the file.
    fn balanced_end(&self, start: usize) -> usize {
        let bytes = self.text.as_bytes();
        let mut closer: Option<u8> = None;
        let mut depth = 0usize;
        let mut in_quote = false;
        let mut line_blank = false;

        for i in start + 1..bytes.len() {
            let b = bytes[i];
            if b == b'@' {
                let outside = closer.is_none() || depth == 0;
                if outside && self.starts_entry(i, line_blank) {
                    return i;
                }
                if !outside && line_blank && self.header_re.is_match(&self.text[i..]) {
                    log::debug!("unterminated entry at byte {start}, resuming at byte {i}");
                    return i;
                }
            }

            match (closer, b) {
                (None, b'{') => {
                    closer = Some(b'}');
                    depth = 1;
                }
                (None, b'(') => {
                    closer = Some(b')');
                    depth = 1;
                }
                (Some(_), _) if depth == 0 => {}
                (Some(b'}'), b'{') => depth += 1,
                (Some(b'}'), b'}') => depth -= 1,
                // Parenthesised entries: braces nest values, a bare `)` closes.
                (Some(b')'), b'{') => depth += 1,
                (Some(b')'), b'}') if depth > 1 => depth -= 1,
                (Some(b')'), b'"') if depth == 1 => in_quote = !in_quote,
                (Some(b')'), b')') if depth == 1 && !in_quote => depth = 0,
                _ => {}
            }

            if b == b'\n' {
                line_blank = true;
            } else if !b.is_ascii_whitespace() {
                line_blank = false;
            }
        }

        bytes.len()
    }
}

impl<'a> Iterator for EntrySplitter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.pos >= self.text.len() {
            return None;
        }

        let start = self.pos;
        let end = match self.mode {
            SplitMode::Naive => self.naive_end(start),
            SplitMode::Balanced => self.balanced_end(start),
        };
        self.pos = end;

        Some(&self.text[start..end])
    }
}

/// Splits `text` into raw entries, materialising at most `limit` of them.
///
/// Returns an empty vector when the text contains no `@` marker.
pub fn split_entries(text: &str, limit: Option<usize>, mode: SplitMode) -> Vec<&str> {
    let splitter = EntrySplitter::new(text, mode);
    let entries: Vec<&str> = match limit {
        Some(n) => splitter.take(n).collect(),
        None => splitter.collect(),
    };

    if entries.is_empty() && !text.trim().is_empty() {
        log::debug!("no entry marker found in {} bytes of input", text.len());
    }

    entries
}

/// Rejoins raw entries into one text, separated by newlines.
pub fn join_entries(entries: &[&str]) -> String {
    entries.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ENTRIES: &str = "@article{a1, doi={10.1/x}, year={2019}}\n@book{b1, year={bad}}";

    #[test]
    fn test_empty_input() {
        assert!(split_entries("", None, SplitMode::Balanced).is_empty());
        assert!(split_entries("", None, SplitMode::Naive).is_empty());
    }

    #[test]
    fn test_no_marker_returns_empty() {
        // Given: Text without any entry marker
        let text = "just some notes, no entries here";

        // When: We split it
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: Nothing is yielded
        assert!(entries.is_empty());
    }

    #[test]
    fn test_two_entries() {
        let entries = split_entries(TWO_ENTRIES, None, SplitMode::Balanced);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], "@article{a1, doi={10.1/x}, year={2019}}\n");
        assert_eq!(entries[1], "@book{b1, year={bad}}");
    }

    #[test]
    fn test_leading_text_is_skipped() {
        // Given: A preamble of free text before the first entry
        let text = "Exported from my reference manager\n\n@misc{m1, title={T}}";

        // When: We split it
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The free text is not part of any entry
        assert_eq!(entries, vec!["@misc{m1, title={T}}"]);
    }

    #[test]
    fn test_limit_takes_first_k() {
        let text = "@a{1}\n@a{2}\n@a{3}\n@a{4}";

        let entries = split_entries(text, Some(2), SplitMode::Balanced);

        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("@a{1}"));
        assert!(entries[1].starts_with("@a{2}"));
    }

    #[test]
    fn test_limit_larger_than_available() {
        let entries = split_entries(TWO_ENTRIES, Some(5), SplitMode::Balanced);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries, split_entries(TWO_ENTRIES, None, SplitMode::Balanced));
    }

    #[test]
    fn test_splitter_is_lazy() {
        // Given: A splitter over three entries
        let text = "@a{1}@a{2}@a{3}";
        let mut splitter = EntrySplitter::new(text, SplitMode::Balanced);

        // When: We pull a single entry
        let first = splitter.next();

        // Then: Only the first entry has been consumed
        assert_eq!(first, Some("@a{1}"));
        assert_eq!(splitter.pos, "@a{1}".len());
    }

    #[test]
    fn test_balanced_ignores_marker_inside_value() {
        // Given: An e-mail address inside a braced field value
        let text = "@misc{m1, note={contact user@example.org}}\n@misc{m2, title={T}}";

        // When: We split in balanced mode
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The address does not start an entry
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("user@example.org"));
        assert!(entries[1].starts_with("@misc{m2"));
    }

    #[test]
    fn test_naive_splits_on_every_marker() {
        // Given: The same input with an `@` inside a value
        let text = "@misc{m1, note={contact user@example.org}}\n@misc{m2, title={T}}";

        // When: We split in naive mode
        let entries = split_entries(text, None, SplitMode::Naive);

        // Then: The value is cut at the `@`
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], "@misc{m1, note={contact user");
        assert_eq!(entries[1], "@example.org}}\n");
        assert_eq!(entries[2], "@misc{m2, title={T}}");
    }

    #[test]
    fn test_parenthesised_entry() {
        let text = "@book(b1, title = \"Smiles :) and (more)\")\n@book{b2}";

        let entries = split_entries(text, None, SplitMode::Balanced);

        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("(more)"));
        assert_eq!(entries[1], "@book{b2}");
    }

    #[test]
    fn test_unterminated_entry_recovers_at_next_header() {
        // Given: An entry missing its closing brace
        let text = "@article{a1, title={Broken\n@book{b1, year={2001}}";

        // When: We split in balanced mode
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The next line-leading header still starts a new entry
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], "@book{b1, year={2001}}");
    }

    #[test]
    fn test_marker_at_line_start_inside_value_without_header() {
        // Given: A value whose continuation line begins with `@` but is not a header
        let text = "@misc{m1, note={first line\n@handle on the next}}\n@misc{m2}";

        // When: We split in balanced mode
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The value stays inside the first entry
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("@handle on the next"));
    }

    #[test]
    fn test_trailing_fragment_is_yielded() {
        // Given: A malformed fragment after the last entry
        let text = "@misc{m1}\n@broken";

        // When: We split
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The fragment is still handed on as a candidate entry
        assert_eq!(entries, vec!["@misc{m1}\n", "@broken"]);
    }

    #[test]
    fn test_marker_in_free_text_is_not_an_entry() {
        // Given: An e-mail address in a comment line before two entries
        let text = "% contact: me@example.org\n@misc{a, doi={10.1/a}}\n@misc{b, doi={10.1/b}}";

        // When: We split with a limit of one
        let entries = split_entries(text, Some(1), SplitMode::Balanced);

        // Then: The limit is spent on the first real entry
        assert_eq!(entries, vec!["@misc{a, doi={10.1/a}}\n"]);
        assert_eq!(split_entries(text, None, SplitMode::Balanced).len(), 2);
    }

    #[test]
    fn test_marker_in_text_between_entries_is_not_an_entry() {
        // Given: Free text with an `@` between two entries
        let text = "@misc{a}\nquestions to me@example.org or @ the desk\n@misc{b}";

        // When: We split in balanced mode
        let entries = split_entries(text, None, SplitMode::Balanced);

        // Then: The free text trails the first entry
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("me@example.org"));
        assert_eq!(entries[1], "@misc{b}");
    }

    #[test]
    fn test_naive_still_splits_free_text_markers() {
        let text = "% contact: me@example.org\n@misc{a}";

        let entries = split_entries(text, None, SplitMode::Naive);

        assert_eq!(entries, vec!["@example.org\n", "@misc{a}"]);
    }

    #[test]
    fn test_join_entries() {
        assert_eq!(join_entries(&["@a{1}", "@a{2}"]), "@a{1}\n@a{2}");
        assert_eq!(join_entries(&[]), "");
    }
}

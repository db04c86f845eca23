//! Shared test constants and helpers for integration tests.

#![allow(dead_code)]

/// Two entries from the reference example: one with a DOI, one with a
/// non-numeric year.
pub const TWO_ENTRIES: &str = "@article{a1, doi={10.1/x}, year={2019}}\n@book{b1, year={bad}}";

/// A realistic export with comments, a string macro, multi-line values and
/// an `@` inside a field value.
pub const LIBRARY: &str = r#"% Exported from a reference manager
@string{jphys = "Annalen der Physik"}

@article{einstein1905,
    author  = {Albert Einstein},
    title   = {Zur Elektrodynamik bewegter K{\"o}rper},
    journal = jphys,
    year    = 1905,
    doi     = {10.1002/andp.19053221004},
}

@misc{contact2020,
    title = {Mailing list},
    note  = {Write to maintainers@example.org for access},
    year  = {2020},
}

@book{knuth1984,
    author    = "Donald E. Knuth",
    title     = "The {\TeX}book",
    publisher = "Addison-Wesley",
    year      = "1984",
    abstract  = {A book
                 about typesetting.},
}

@inproceedings(turing1950,
    title = "Computing Machinery and Intelligence",
    doi   = "10.1093/mind/LIX.236.433",
    month = oct
)
"#;

/// Build a BibTeX text of `n` numbered `@misc` entries, each with a DOI.
pub fn build_entries(n: usize) -> String {
    (1..=n)
        .map(|i| {
            format!(
                "@misc{{key{i}, title = {{Title {i}}}, doi = {{10.1000/{i}}}, year = {{20{i:02}}}}}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

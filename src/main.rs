//! CLI for bibtex-convert - Convert BibTeX files into CSV, JSON and DOI lists.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use bibtex_convert::{
    decode_json, encode_json_with, run_bytes, Conversion, ExportFormat, ExportOptions, Outcome,
    PipelineError, PipelineOptions, SplitMode,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Convert BibTeX files into CSV, JSON and a list of DOIs
#[derive(Parser)]
#[command(name = "bibtex-convert")]
#[command(version)]
#[command(after_help = "\
Examples:
  bibtex-convert convert refs.bib
  bibtex-convert convert a.bib b.bib -o exports/
  cat refs.bib | bibtex-convert convert - --limit 10
  bibtex-convert preview refs.bib --show 3")]
struct Cli {
    /// Log progress details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert BibTeX input and write bibtex_output.csv, bibtex_output.json and dois.txt
    #[command(after_help = "\
Examples:
  bibtex-convert convert refs.bib
  bibtex-convert convert refs.bib more.bib -o out/ --with-entry-meta
  bibtex-convert convert big.bib -n 100 --split naive")]
    Convert {
        /// Input BibTeX files, concatenated in order (use '-' for stdin)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Process only the first N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output directory (default: current directory)
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// How entries are delimited when a limit is given
        #[arg(long, value_enum, default_value_t = SplitArg::Balanced)]
        split: SplitArg,

        /// Add ENTRYTYPE and ID columns to the CSV and JSON output
        #[arg(long)]
        with_entry_meta: bool,
    },

    /// Process the first entries and print a preview of every output
    Preview {
        /// Input BibTeX files, concatenated in order (use '-' for stdin)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Number of entries to process
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,

        /// Number of records to show per output (max 50)
        #[arg(
            short,
            long,
            default_value_t = 2,
            value_parser = clap::value_parser!(u8).range(1..=50)
        )]
        show: u8,

        /// How entries are delimited
        #[arg(long, value_enum, default_value_t = SplitArg::Balanced)]
        split: SplitArg,

        /// Add ENTRYTYPE and ID columns to the CSV and JSON output
        #[arg(long)]
        with_entry_meta: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    /// Ignore '@' inside field values
    Balanced,
    /// Start a new entry at every '@'
    Naive,
}

impl From<SplitArg> for SplitMode {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Balanced => SplitMode::Balanced,
            SplitArg::Naive => SplitMode::Naive,
        }
    }
}

// ---------------------------------------------------------------------------
// AppError — semantic exit codes
// ---------------------------------------------------------------------------

enum AppError {
    /// Exit 10 — input file not found / unreadable
    InputFile(String),
    /// Exit 11 — input could not be parsed at all
    Parse(String),
    /// Exit 12 — invalid option value
    InvalidArgs(String),
    /// Exit 15 — cannot write output file
    OutputFile(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::InputFile(_) => 10,
            AppError::Parse(_) => 11,
            AppError::InvalidArgs(_) => 12,
            AppError::OutputFile(_) => 15,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InputFile(msg) => {
                write!(f, "{}\n  hint: verify the file path is correct", msg)
            }
            AppError::Parse(msg) => {
                write!(f, "{}\n  hint: the input must be UTF-8 encoded BibTeX text", msg)
            }
            AppError::InvalidArgs(msg) => write!(f, "{}", msg),
            AppError::OutputFile(msg) => {
                write!(
                    f,
                    "{}\n  hint: check that the output directory is writable",
                    msg
                )
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidLimit(_) => AppError::InvalidArgs(e.to_string()),
            PipelineError::Parse { .. } => AppError::Parse(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run(command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Convert {
            inputs,
            limit,
            out_dir,
            split,
            with_entry_meta,
        } => {
            let options = PipelineOptions {
                limit,
                split_mode: split.into(),
                export: ExportOptions {
                    include_entry_meta: with_entry_meta,
                },
            };
            convert_command(&inputs, &out_dir, &options)
        }
        Commands::Preview {
            inputs,
            limit,
            show,
            split,
            with_entry_meta,
        } => {
            let options = PipelineOptions {
                limit: Some(limit),
                split_mode: split.into(),
                export: ExportOptions {
                    include_entry_meta: with_entry_meta,
                },
            };
            preview_command(&inputs, usize::from(show), &options)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Convert the inputs and write every available payload to `out_dir`.
fn convert_command(
    inputs: &[PathBuf],
    out_dir: &Path,
    options: &PipelineOptions,
) -> Result<(), AppError> {
    let Some(conversion) = process_inputs(inputs, options)? else {
        return Ok(());
    };

    fs::create_dir_all(out_dir)
        .map_err(|e| AppError::OutputFile(format!("'{}': {}", out_dir.display(), e)))?;

    let payloads = [
        (ExportFormat::Csv, conversion.csv.as_deref()),
        (ExportFormat::Json, conversion.json.as_deref()),
        (ExportFormat::DoiText, conversion.doi_text.as_deref()),
    ];

    let mut written = Vec::new();
    for (format, payload) in payloads {
        let Some(bytes) = payload else {
            continue;
        };
        let path = out_dir.join(format.file_name());
        fs::write(&path, bytes)
            .map_err(|e| AppError::OutputFile(format!("'{}': {}", path.display(), e)))?;
        written.push(path.display().to_string());
    }

    eprintln!(
        "converted {} record(s), {} DOI(s), wrote {}",
        conversion.records.len(),
        conversion.identifiers.len(),
        written.join(", ")
    );
    Ok(())
}

/// Print the first `show` rows of each payload.
fn preview_command(
    inputs: &[PathBuf],
    show: usize,
    options: &PipelineOptions,
) -> Result<(), AppError> {
    let Some(conversion) = process_inputs(inputs, options)? else {
        return Ok(());
    };

    let mut out = String::new();

    out.push_str("## CSV Preview\n\n");
    if let Some(csv) = &conversion.csv {
        let head = csv_head(csv, show)
            .map_err(|e| AppError::Parse(format!("Error previewing CSV: {}", e)))?;
        out.push_str(&head);
    }

    out.push_str("\n## JSON Preview\n\n");
    if let Some(json) = &conversion.json {
        let head = json_head(json, show, options.export)
            .map_err(|e| AppError::Parse(format!("Error previewing JSON: {}", e)))?;
        out.push_str(&head);
        out.push('\n');
    }

    out.push_str("\n## DOI Preview\n\n");
    for doi in conversion.identifiers.iter().take(show) {
        out.push_str(doi);
        out.push('\n');
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write!(handle, "{}", out).map_err(|e| AppError::OutputFile(format!("stdout: {}", e)))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read and run all inputs; `None` when there is nothing to export.
fn process_inputs(
    inputs: &[PathBuf],
    options: &PipelineOptions,
) -> Result<Option<Conversion>, AppError> {
    let raw = read_inputs(inputs)?;
    let outcome = run_bytes(&raw, options)?;

    for diagnostic in outcome.diagnostics() {
        eprintln!("warning: {}", diagnostic);
    }

    match outcome {
        Outcome::Empty { .. } => {
            eprintln!("no BibTeX entries found, nothing to export");
            Ok(None)
        }
        Outcome::Converted(conversion) => Ok(Some(conversion)),
    }
}

/// Concatenate all inputs, separated by newlines. `-` reads stdin.
fn read_inputs(inputs: &[PathBuf]) -> Result<Vec<u8>, AppError> {
    let mut raw = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        if i > 0 {
            raw.push(b'\n');
        }
        if input == Path::new("-") {
            io::stdin()
                .read_to_end(&mut raw)
                .map_err(|e| AppError::InputFile(format!("failed to read from stdin: {}", e)))?;
        } else {
            let bytes = fs::read(input)
                .map_err(|e| AppError::InputFile(format!("'{}': {}", input.display(), e)))?;
            raw.extend_from_slice(&bytes);
        }
    }
    log::debug!("read {} byte(s) from {} input(s)", raw.len(), inputs.len());
    Ok(raw)
}

/// Header plus the first `n` rows of a CSV payload.
fn csv_head(csv: &[u8], n: usize) -> Result<String, csv::Error> {
    let mut reader = csv::Reader::from_reader(csv);
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(reader.headers()?)?;
    for row in reader.records().take(n) {
        writer.write_record(&row?)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The first `n` records of a JSON payload, re-encoded.
fn json_head(
    json: &[u8],
    n: usize,
    export: ExportOptions,
) -> Result<String, bibtex_convert::EncodeError> {
    let mut records = decode_json(json)?;
    records.truncate(n);
    let bytes = encode_json_with(&records, export)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

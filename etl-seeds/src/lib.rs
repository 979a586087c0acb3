//! Reference data generator.
//!
//! Turns enumeration definitions written as YAML into CSV files loaded as dbt seeds. Each
//! definition has the shape:
//!
//! ```yaml
//! enumeration_name: customer_marital_status
//! valid_values:
//!   - code: SINGLE
//!     description: Single
//!     sort_order: 1
//! ```
//!
//! and produces `marital_status.csv` with the columns `code, description, sort_order,
//! is_active`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// Files that are not reference data and are skipped by default.
pub const DEFAULT_SKIP_FILES: &[&str] = &[
    "README.yaml",
    "audit_event_types.yaml",
    "customer_profile_attribute_names.yaml",
    "customer_profile_audit_change_reason.yaml",
];

/// Removed from enumeration names to form seed file names.
pub const DEFAULT_STRIP_PREFIX: &str = "customer_";

/// Sort order written for values that do not define one.
pub const DEFAULT_SORT_ORDER: i64 = 99;

const SEED_HEADER: [&str; 4] = ["code", "description", "sort_order", "is_active"];

const IS_ACTIVE: &str = "TRUE";

const ENUMERATION_EXTENSION: &str = "yaml";

/// Errors raised while generating seeds.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to list enumeration directory {path}: {source}")]
    ListInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create output directory {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid enumeration definition in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A scalar YAML value written verbatim into a CSV cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => f.write_str(&render_float(*value)),
            Scalar::Bool(true) => f.write_str("True"),
            Scalar::Bool(false) => f.write_str("False"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

/// Renders a float with a fractional part or a signed two-digit exponent
/// (`1.0`, `2.5`, `1e+16`, `1e-05`), so `sort_order: 1.0` stays `1.0` in the seed.
fn render_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let rendered = format!("{value:?}");
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };

    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };

    format!("{mantissa}e{sign}{digits:0>2}")
}

#[derive(Debug, Deserialize)]
pub struct EnumerationValue {
    pub code: Scalar,
    #[serde(default)]
    pub description: Option<Scalar>,
    #[serde(default)]
    pub display_name: Option<Scalar>,
    #[serde(default)]
    pub sort_order: Option<Scalar>,
}

impl EnumerationValue {
    /// Returns the CSV record for this value.
    ///
    /// The description falls back to the display name, then to an empty string.
    pub fn to_seed_row(&self) -> [String; 4] {
        let description = self
            .description
            .as_ref()
            .or(self.display_name.as_ref())
            .map(Scalar::to_string)
            .unwrap_or_default();
        let sort_order = self
            .sort_order
            .as_ref()
            .map(Scalar::to_string)
            .unwrap_or_else(|| DEFAULT_SORT_ORDER.to_string());

        [
            self.code.to_string(),
            description,
            sort_order,
            IS_ACTIVE.to_string(),
        ]
    }
}

#[derive(Debug, Deserialize)]
pub struct Enumeration {
    pub enumeration_name: String,
    #[serde(default)]
    pub valid_values: Option<Vec<EnumerationValue>>,
}

impl Enumeration {
    /// Returns the seed table name, with every occurrence of `strip` removed.
    pub fn table_name(&self, strip: &str) -> String {
        if strip.is_empty() {
            return self.enumeration_name.clone();
        }

        self.enumeration_name.replace(strip, "")
    }
}

/// Settings of one generator invocation.
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub skip_files: Vec<String>,
    pub strip_prefix: String,
}

impl SeedOptions {
    /// Options with the default skip list and prefix.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            skip_files: DEFAULT_SKIP_FILES.iter().map(|name| name.to_string()).collect(),
            strip_prefix: DEFAULT_STRIP_PREFIX.to_string(),
        }
    }
}

/// Result of converting a single enumeration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Generated { output: PathBuf, rows: usize },
    Empty,
}

/// What a generator invocation did, per input file.
#[derive(Debug, Default)]
pub struct SeedSummary {
    pub generated: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub empty: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, SeedError)>,
}

/// Converts every enumeration file of `options.input_dir` into a CSV seed.
///
/// Files are processed in name order. A file that cannot be converted is recorded in
/// [`SeedSummary::failed`] and the remaining files are still processed.
pub fn generate_seeds(options: &SeedOptions) -> Result<SeedSummary, SeedError> {
    fs::create_dir_all(&options.output_dir).map_err(|source| SeedError::CreateOutput {
        path: options.output_dir.clone(),
        source,
    })?;

    let mut summary = SeedSummary::default();

    for path in enumeration_files(&options.input_dir)? {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if options.skip_files.iter().any(|skip| *skip == file_name) {
            info!(file = %file_name, "skipping file, not reference data");
            summary.skipped.push(path);
            continue;
        }

        match convert_file(&path, &options.output_dir, &options.strip_prefix) {
            Ok(FileOutcome::Generated { output, rows }) => {
                info!(output = %output.display(), rows, "generated seed");
                summary.generated.push(output);
            }
            Ok(FileOutcome::Empty) => {
                warn!(file = %path.display(), "no values found, seed not generated");
                summary.empty.push(path);
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "failed to convert enumeration");
                summary.failed.push((path, err));
            }
        }
    }

    Ok(summary)
}

/// Converts one enumeration file into `<output_dir>/<table name>.csv`.
pub fn convert_file(
    path: &Path,
    output_dir: &Path,
    strip_prefix: &str,
) -> Result<FileOutcome, SeedError> {
    let content = fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let enumeration: Enumeration =
        serde_yaml::from_str(&content).map_err(|source| SeedError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let values = match &enumeration.valid_values {
        Some(values) if !values.is_empty() => values,
        _ => return Ok(FileOutcome::Empty),
    };

    let output = output_dir.join(format!("{}.csv", enumeration.table_name(strip_prefix)));
    write_seed(&output, values).map_err(|source| SeedError::Write {
        path: output.clone(),
        source,
    })?;

    Ok(FileOutcome::Generated {
        output,
        rows: values.len(),
    })
}

fn write_seed(output: &Path, values: &[EnumerationValue]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(SEED_HEADER)?;
    for value in values {
        writer.write_record(value.to_seed_row())?;
    }
    writer.flush()?;

    Ok(())
}

fn enumeration_files(input_dir: &Path) -> Result<Vec<PathBuf>, SeedError> {
    let list_error = |source| SeedError::ListInput {
        path: input_dir.to_path_buf(),
        source,
    };

    let mut files = vec![];
    for entry in fs::read_dir(input_dir).map_err(list_error)? {
        let path = entry.map_err(list_error)?.path();
        if path.is_file()
            && path.extension().and_then(|ext| ext.to_str()) == Some(ENUMERATION_EXTENSION)
        {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

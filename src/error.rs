use std::fmt;
use std::path::PathBuf;

/// Errors raised while converting a dataset.
///
/// Kinds marked run-fatal abort the whole conversion, everything else is
/// logged at the feature loop and processing continues with the next record.
#[derive(Debug)]
pub enum ConvertError {
    /// A shapefile or DBF table could not be opened or parsed. Run-fatal.
    DatasetOpen { path: PathBuf, reason: String },
    /// A required column is absent from a table.
    MissingColumn { table: &'static str, column: &'static str },
    /// A field value could not be parsed into the expected type.
    FieldFormat { column: String, value: String },
    /// Z_LEVEL outside -4..=5. Run-fatal.
    ZLevelOutOfRange(i64),
    /// An enumerated column holds a value outside its legal set.
    UnknownEnumValue { column: &'static str, value: String },
    /// A feature carries a geometry of the wrong type.
    GeometryMismatch { expected: &'static str, found: String },
    /// Way/relation assembly hit an inconsistency in the built graph.
    Topology(String),
    /// Output file suffix does not select a known format.
    UnknownFormat(String),
    Io(std::io::Error),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::DatasetOpen { path, reason } => {
                write!(f, "could not read {}: {}", path.display(), reason)
            }
            ConvertError::MissingColumn { table, column } => {
                write!(f, "{} does not contain column {}", table, column)
            }
            ConvertError::FieldFormat { column, value } => {
                write!(f, "could not parse field '{}' with value '{}'", column, value)
            }
            ConvertError::ZLevelOutOfRange(z) => write!(f, "z_lvl {} is not valid", z),
            ConvertError::UnknownEnumValue { column, value } => {
                write!(f, "value '{}' for {} not valid", value, column)
            }
            ConvertError::GeometryMismatch { expected, found } => {
                write!(f, "expected {} geometry, found {}", expected, found)
            }
            ConvertError::Topology(msg) => write!(f, "topology error: {}", msg),
            ConvertError::UnknownFormat(name) => {
                write!(f, "unknown format for outputfile: {}", name)
            }
            ConvertError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Io(e)
    }
}

impl ConvertError {
    /// True for kinds that must abort the whole run instead of skipping
    /// the current feature.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::DatasetOpen { .. }
                | ConvertError::ZLevelOutOfRange(_)
                | ConvertError::UnknownFormat(_)
                | ConvertError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

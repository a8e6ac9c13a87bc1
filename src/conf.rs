use std::path::PathBuf;

/// Bundled ISO-639-2 to ISO-639-1 lookup table.
pub const DEFAULT_LANG_CODE_TABLE: &str = "data/ISO-639-2_utf-8.txt";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory searched recursively for complete datasets.
    pub input_dir: PathBuf,
    /// Output file; `None` converts without writing (dry run).
    pub output_file: Option<PathBuf>,
    /// Path of the language-code table.
    pub lang_code_table: PathBuf,
}

impl Config {
    pub fn new(input_dir: PathBuf, output_file: Option<PathBuf>) -> Self {
        Self {
            input_dir,
            output_file,
            lang_code_table: PathBuf::from(DEFAULT_LANG_CODE_TABLE),
        }
    }
}

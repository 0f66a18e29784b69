use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the preprocessing and template mining pipeline
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Raw input was not valid UTF-8
    #[error("Malformed UTF-8 input at byte {position}")]
    Decode { position: usize },

    /// The timestamp width could not be learned for a run that needs it
    #[error("Input is not recognized as a '{log_type}' log")]
    NotRecognizedAsLogType { log_type: String },

    /// No pattern catalog is registered under this name
    #[error("Unknown log type: {0}")]
    UnknownLogType(String),

    /// Configuration problems
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// Missing input file
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    /// CSV read/write errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary vocabulary encoding errors
    #[error("Binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Template library content is inconsistent
    #[error("Template library error: {0}")]
    Library(String),

    /// A vocabulary write would break one of its invariants
    #[error("Vocabulary invariant violated: {0}")]
    VocabularyInvariant(String),

    /// More templates than vocabulary slots
    #[error("Vocabulary is full: {templates} templates do not fit in {capacity} slots")]
    VocabularyFull { templates: usize, capacity: usize },
}

impl AnalyzerError {
    /// Wrap an IO error with a description of what was being attempted
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        AnalyzerError::Io {
            source,
            context: context.into(),
        }
    }
}

/// Result type alias using AnalyzerError
pub type Result<T> = std::result::Result<T, AnalyzerError>;

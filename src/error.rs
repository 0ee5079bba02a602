use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid log format '{format}': {reason}")]
    Format { format: String, reason: String },

    #[error("invalid relabel rule for target label '{target}': {reason}")]
    Relabel { target: String, reason: String },

    #[error("metrics recorder error: {0}")]
    Metrics(String),

    #[error("service discovery error: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors surfaced by a line source while reading.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("source channel closed")]
    Closed,
}

/// A condition that must terminate the whole process. Workers never exit the
/// process themselves; these values travel over a channel to the top-level
/// handler in `main`, which owns the actual exit.
#[derive(Debug)]
pub enum FatalError {
    /// The process-wide tag set reached its ceiling.
    TagCardinality {
        count: usize,
        ceiling: usize,
        tags: Vec<String>,
    },
    /// A line source failed in a way the worker cannot recover from.
    Source {
        namespace: String,
        source: String,
        error: SourceError,
    },
    /// A namespace failed to start after the process already came up.
    NamespaceStartup {
        namespace: String,
        error: ExporterError,
    },
}

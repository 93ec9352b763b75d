use std::path::PathBuf;
use thiserror::Error;

/// Hard failure kinds surfaced by the pipeline.
///
/// Every fatal condition is one of these variants, wrapped in an
/// `anyhow::Error` so call sites can attach context with `?` while callers
/// that care about the class can still `downcast_ref::<BuildError>()`.
/// Library ambiguity and architecture mismatches are warnings, not errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid sketch name '{0}': names must start with a letter or digit and may only contain letters, digits, dots, dashes and underscores (max 63 chars)")]
    BadSketchName(String),

    #[error("invalid sketch: {0}")]
    SketchStructure(String),

    #[error("{recipe} pattern is missing")]
    MissingRecipe { recipe: String },

    #[error("preprocessor failed on {file}: {message}")]
    Preprocessor { file: PathBuf, message: String },

    #[error("{include}: no library found for this include")]
    UnresolvedInclude { include: String, stderr: String },

    #[error("error compiling {file}")]
    CompileFailed { file: PathBuf, stderr: String },

    #[error("{section} exceeds available space ({size} > {max_size} bytes)")]
    SizeExceeded {
        section: String,
        size: u64,
        max_size: u64,
    },

    #[error("internal error in include cache")]
    CacheInconsistency,

    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for discmerge-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for merge and build operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse failed for {path}: {message}")]
    XmlParse { path: PathBuf, message: String },

    #[error("Could not locate an Export root with config.xml/songs/covers under: {0}")]
    DataRootNotFound(PathBuf),

    #[error("Duplicate song IDs detected (non-identical): {}", format_id_preview(song_ids))]
    UnresolvedDuplicate { song_ids: Vec<u32> },

    #[error("Missing reference: {resource}")]
    MissingReference { resource: String },

    #[error("Structural corruption: {message}")]
    Corruption { message: String },

    #[error("Refusing to overwrite {path}: {reason}")]
    OverwriteRefused { path: PathBuf, reason: String },

    #[error("Build cancelled ({reason}); partial output kept at {partial_output}")]
    Cancelled {
        partial_output: PathBuf,
        reason: String,
    },

    #[error("Failed to rename {from} -> {to} after {attempts} attempts: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Flat category of an [`Error`], for callers that only branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    XmlParse,
    DataRootNotFound,
    UnresolvedDuplicate,
    MissingReference,
    Corruption,
    OverwriteRefused,
    Cancelled,
    TransientIo,
    InvalidOptions,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::XmlParse { .. } => ErrorKind::XmlParse,
            Error::DataRootNotFound(_) => ErrorKind::DataRootNotFound,
            Error::UnresolvedDuplicate { .. } => ErrorKind::UnresolvedDuplicate,
            Error::MissingReference { .. } => ErrorKind::MissingReference,
            Error::Corruption { .. } => ErrorKind::Corruption,
            Error::OverwriteRefused { .. } => ErrorKind::OverwriteRefused,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::RenameFailed { .. } => ErrorKind::TransientIo,
            Error::InvalidOptions(_) => ErrorKind::InvalidOptions,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the build stopped because the caller asked it to
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    pub(crate) fn missing(resource: impl Into<String>) -> Self {
        Error::MissingReference {
            resource: resource.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }
}

/// Render at most 50 IDs, the way the build log lists them
fn format_id_preview(ids: &[u32]) -> String {
    const PREVIEW: usize = 50;
    let shown: Vec<String> = ids.iter().take(PREVIEW).map(|id| id.to_string()).collect();
    if ids.len() > PREVIEW {
        format!("[{}, ...] ({} total)", shown.join(", "), ids.len())
    } else {
        format!("[{}]", shown.join(", "))
    }
}

/// Result type alias for discmerge operations
pub type Result<T> = std::result::Result<T, Error>;

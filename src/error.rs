use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure inside an inference backend or in the shape of what it returned.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("inference backend failed: {0}")]
    Backend(String),

    #[error("model returned {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },

    #[error("model returned an empty prediction")]
    EmptyPrediction,

    #[error("model weights not found: {}", .0.display())]
    MissingWeights(PathBuf),

    #[error("no inference backend compiled in (rebuild with `--features menoh`)")]
    Unavailable,
}

#[cfg(feature = "menoh")]
impl From<menoh::Error> for ModelError {
    fn from(err: menoh::Error) -> Self {
        ModelError::Backend(err.to_string())
    }
}

/// Startup failures: vocabulary and weight loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no vocabulary found (tried {})", display_paths(.tried))]
    VocabularyMissing { tried: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed tokenizer json {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed binary vocabulary {}: {source}", .path.display())]
    Binary {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("invalid tokenizer: {0}")]
    InvalidTokenizer(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("could not start inference thread: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("inference worker exited during startup")]
    WorkerExited,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of a failed caption request.
///
/// The first group is caused by the caller's input; the rest are internal.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("No image uploaded")]
    NoImage,

    #[error("No image selected")]
    EmptyFilename,

    #[error("could not decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("could not read image {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not generate caption: {0}")]
    Model(#[from] ModelError),

    #[error("inference worker is not running")]
    WorkerUnavailable,
}

impl CaptionError {
    /// True for errors the caller can fix by sending a different image.
    pub fn is_client_error(&self) -> bool {
        match self {
            CaptionError::NoImage
            | CaptionError::EmptyFilename
            | CaptionError::ImageDecode(_)
            | CaptionError::Unreadable { .. } => true,
            CaptionError::Model(_) | CaptionError::WorkerUnavailable => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("history file {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

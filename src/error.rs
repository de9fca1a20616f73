use std::path::PathBuf;
use thiserror::Error;

/// The error type for dataset preparation.
///
/// Run-level variants (`Config`, `DirectoryCreation`, `ThreadPool`) abort a run.
/// The remaining variants are recorded per task and never unwind past it.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to create output directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageProbe {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to encode JPEG for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read annotation {path}: {source}")]
    AnnotationRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse annotation {path}: {source}")]
    AnnotationParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read label file {path}: {source}")]
    LabelRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Cancelled before completion")]
    Cancelled,
}

impl PrepError {
    /// Whether this error aborts the whole run rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PrepError::Config(_) | PrepError::DirectoryCreation { .. } | PrepError::ThreadPool(_)
        )
    }
}

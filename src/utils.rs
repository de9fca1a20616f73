use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;

use crate::error::PrepError;
use crate::types::AnnotationDocument;

/// Receives aggregate progress as tasks finish.
///
/// Calls arrive from worker threads but are serialized, and `completed`
/// strictly increases from call to call.
pub trait ProgressSink: Sync {
    fn report(&self, completed: usize, total: usize);
}

impl ProgressSink for ProgressBar {
    fn report(&self, completed: usize, total: usize) {
        self.set_length(total as u64);
        self.set_position(completed as u64);
    }
}

/// Sink that drops every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _completed: usize, _total: usize) {}
}

/// Completed fraction in [0, 1]; an empty batch counts as done
pub fn progress_fraction(completed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Build the bounded worker pool; its size is the admission limit for tasks
pub fn create_io_thread_pool(workers: usize) -> Result<rayon::ThreadPool, PrepError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("yoloprep-worker-{}", i))
        .build()?;
    Ok(pool)
}

/// Create an output directory, optionally wiping what is already there
pub fn create_output_directory(path: &Path, clean: bool) -> Result<std::path::PathBuf, PrepError> {
    let to_err = |source: std::io::Error| PrepError::DirectoryCreation {
        path: path.to_path_buf(),
        source,
    };
    if clean && path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).map_err(to_err)?;
    }
    fs::create_dir_all(path).map_err(to_err)?;
    Ok(path.to_path_buf())
}

/// Read and parse one annotation document
pub fn read_annotation(path: &Path) -> Result<AnnotationDocument, PrepError> {
    let bytes = fs::read(path).map_err(|source| PrepError::AnnotationRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| PrepError::AnnotationParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Render a panic payload as text
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

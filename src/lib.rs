//! Annotated images to YOLO detection dataset
//!
//! This library converts folders of images with polygon/rectangle JSON annotations into
//! a YOLO dataset: normalized box labels, optionally size-bounded JPEG images, a
//! randomized train/val/test split and a data.yaml manifest. It also exposes the
//! label-file operations used when reviewing a prepared dataset.

pub mod compress;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod io;
pub mod review;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, PipelineConfig};
pub use conversion::convert_to_yolo;
pub use dataset::{partition, process_dataset, process_dataset_with_cancel, split_tasks};
pub use error::PrepError;
pub use io::{create_dataset_yaml, discover_tasks, setup_output_directories, OutputDirs};
pub use types::{
    ClassMap, NormalizedBox, ProcessingStats, RunReport, SourcePair, Subset, Task, TaskOutcome,
    TaskStatus,
};
pub use utils::{NoProgress, ProgressSink};

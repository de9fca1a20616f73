use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PrepError;
use crate::types::ClassMap;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_KB: u64 = 500;

/// Command-line arguments for building a YOLO dataset from annotated image folders.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Directory holding source images and their JSON annotations (repeatable)
    #[arg(short = 's', long = "source_dir")]
    pub source_dirs: Vec<PathBuf>,

    /// Root directory for the generated dataset
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Proportion of the dataset to use for training
    #[arg(long = "train_ratio", default_value_t = 0.8, value_parser = validate_ratio)]
    pub train_ratio: f64,

    /// Proportion of the dataset to use for validation; the rest goes to test
    #[arg(long = "val_ratio", default_value_t = 0.2, value_parser = validate_ratio)]
    pub val_ratio: f64,

    /// Copy images as-is instead of recompressing them to JPEG
    #[arg(long = "no_compress")]
    pub no_compress: bool,

    /// Target size in KiB for recompressed images
    #[arg(long = "max_kb", default_value_t = DEFAULT_MAX_KB)]
    pub max_kb: u64,

    /// Seed for random shuffling; time-based when omitted
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Number of images processed concurrently
    #[arg(long = "workers", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Delete existing images/ and labels/ under the output directory first
    #[arg(long = "clean")]
    pub clean: bool,

    /// Ordered class names; ids are assigned by position
    #[arg(use_value_delimiter = true)]
    pub class_list: Vec<String>,
}

// Validate that a ratio is between 0.0 and 1.0
fn validate_ratio(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("RATIO must be between 0.0 and 1.0".to_string()),
    }
}

/// Everything a dataset run needs. Ratios are taken as given.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_dirs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub class_map: ClassMap,
    pub process_images: bool,
    pub max_kb: u64,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub seed: Option<u64>,
    pub workers: usize,
    pub clean_output: bool,
}

impl PipelineConfig {
    /// Validate the required inputs and fill the rest with defaults
    pub fn new<S: AsRef<str>>(
        source_dirs: Vec<PathBuf>,
        output_dir: PathBuf,
        class_names: &[S],
    ) -> Result<Self, PrepError> {
        if source_dirs.is_empty() {
            return Err(PrepError::Config("no source directories given".to_string()));
        }
        if output_dir.as_os_str().is_empty() {
            return Err(PrepError::Config("output directory is missing".to_string()));
        }
        let class_map = ClassMap::from_names(class_names)?;

        Ok(Self {
            source_dirs,
            output_dir,
            class_map,
            process_images: true,
            max_kb: DEFAULT_MAX_KB,
            train_ratio: 0.8,
            val_ratio: 0.2,
            seed: None,
            workers: DEFAULT_WORKERS,
            clean_output: false,
        })
    }

    /// Check the fields again, since they may have been changed after `new`
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.source_dirs.is_empty() {
            return Err(PrepError::Config("no source directories given".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(PrepError::Config("output directory is missing".to_string()));
        }
        if self.class_map.is_empty() {
            return Err(PrepError::Config("class list is empty".to_string()));
        }
        if self.workers == 0 {
            return Err(PrepError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl TryFrom<&Args> for PipelineConfig {
    type Error = PrepError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = PipelineConfig::new(
            args.source_dirs.clone(),
            args.output_dir.clone().unwrap_or_default(),
            args.class_list.as_slice(),
        )?;
        config.process_images = !args.no_compress;
        config.max_kb = args.max_kb;
        config.train_ratio = args.train_ratio;
        config.val_ratio = args.val_ratio;
        config.seed = args.seed;
        config.workers = args.workers;
        config.clean_output = args.clean;
        config.validate()?;
        Ok(config)
    }
}

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::PipelineConfig;
use crate::conversion::{process_tasks_in_parallel, TaskParams};
use crate::error::PrepError;
use crate::io::{create_dataset_yaml, discover_tasks, setup_output_directories};
use crate::types::{ProcessingStats, RunReport, SourcePair, Subset, Task};
use crate::utils::{create_io_thread_pool, ProgressSink};

/// Number of items that land in (train, val, test) for `n` items.
///
/// Train and val take `floor(n * ratio)` each, capped by what is left; test
/// gets the remainder. Ratios are not normalized.
pub fn split_counts(n: usize, train_ratio: f64, val_ratio: f64) -> (usize, usize, usize) {
    let train = ((n as f64 * train_ratio).floor() as usize).min(n);
    let val = ((n as f64 * val_ratio).floor() as usize).min(n - train);
    (train, val, n - train - val)
}

/// Subset for the item at `index` after shuffling
pub fn subset_for_index(index: usize, train_count: usize, val_count: usize) -> Subset {
    if index < train_count {
        Subset::Train
    } else if index < train_count + val_count {
        Subset::Val
    } else {
        Subset::Test
    }
}

/// Shuffle `items` with `rng` and label each by its position
pub fn partition<T, R: Rng + ?Sized>(
    mut items: Vec<T>,
    train_ratio: f64,
    val_ratio: f64,
    rng: &mut R,
) -> Vec<(Subset, T)> {
    items.shuffle(rng);
    let (train_count, val_count, _) = split_counts(items.len(), train_ratio, val_ratio);
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| (subset_for_index(i, train_count, val_count), item))
        .collect()
}

/// Split discovered pairs into train/val/test tasks using a seeded shuffle
pub fn split_tasks(pairs: Vec<SourcePair>, train_ratio: f64, val_ratio: f64, seed: u64) -> Vec<Task> {
    let mut rng = StdRng::seed_from_u64(seed);
    partition(pairs, train_ratio, val_ratio, &mut rng)
        .into_iter()
        .map(|(subset, pair)| Task::new(pair, subset))
        .collect()
}

/// Seed used when none is configured
pub fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Main dataset processing pipeline
pub fn process_dataset(
    config: &PipelineConfig,
    progress: &dyn ProgressSink,
) -> Result<RunReport, PrepError> {
    process_dataset_with_cancel(config, progress, &AtomicBool::new(false))
}

/// Like `process_dataset`, but tasks that have not finished when `cancel` is
/// set end as skipped. The manifest is still written.
pub fn process_dataset_with_cancel(
    config: &PipelineConfig,
    progress: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> Result<RunReport, PrepError> {
    config.validate()?;

    info!("Scanning {} source directories...", config.source_dirs.len());
    let pairs = discover_tasks(&config.source_dirs);
    if pairs.is_empty() {
        warn!("No images found in the source directories; nothing to do.");
        return Ok(RunReport::default());
    }
    info!("Found {} images.", pairs.len());

    let seed = config.seed.unwrap_or_else(time_seed);
    info!("Shuffling with seed {}", seed);
    let tasks = split_tasks(pairs, config.train_ratio, config.val_ratio, seed);
    let (train, val, test) = split_counts(tasks.len(), config.train_ratio, config.val_ratio);
    info!("Split: {} train, {} val, {} test", train, val, test);

    let output_dirs = setup_output_directories(&config.output_dir, config.clean_output)?;
    let pool = create_io_thread_pool(config.workers)?;
    let params = TaskParams {
        output_dirs: &output_dirs,
        class_map: &config.class_map,
        process_images: config.process_images,
        max_kb: config.max_kb,
    };
    let outcomes = process_tasks_in_parallel(&tasks, &params, &pool, progress, cancel);

    info!("Creating data.yaml file...");
    create_dataset_yaml(&output_dirs, &config.class_map)?;

    let stats = ProcessingStats::from_outcomes(&outcomes);
    stats.print_summary();
    info!("Conversion process completed.");

    Ok(RunReport { outcomes, stats })
}

use image::{DynamicImage, ImageReader};
use log::{debug, warn};
use rayon::prelude::*;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Mutex;

use crate::compress::compress_to_file;
use crate::error::PrepError;
use crate::io::OutputDirs;
use crate::types::{
    AnnotationDocument, ClassMap, NormalizedBox, PolygonShape, Task, TaskOutcome, TaskStatus,
};
use crate::utils::{panic_message, read_annotation, ProgressSink};

/// Settings shared by every task of a run
#[derive(Debug)]
pub struct TaskParams<'a> {
    pub output_dirs: &'a OutputDirs,
    pub class_map: &'a ClassMap,
    pub process_images: bool,
    pub max_kb: u64,
}

/// Run every task on `pool`, isolating failures and panics per task.
///
/// Outcomes come back in task order; completion order is unspecified.
pub fn process_tasks_in_parallel(
    tasks: &[Task],
    params: &TaskParams,
    pool: &rayon::ThreadPool,
    progress: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> Vec<TaskOutcome> {
    run_tasks_on_pool(tasks, pool, progress, |task| process_task(task, params, cancel))
}

/// Drive `run` over every task on `pool`.
///
/// A panic inside `run` becomes a `TaskPanicked` failure for that task only, and
/// a panicking progress sink is logged without affecting any task.
pub fn run_tasks_on_pool<F>(
    tasks: &[Task],
    pool: &rayon::ThreadPool,
    progress: &dyn ProgressSink,
    run: F,
) -> Vec<TaskOutcome>
where
    F: Fn(&Task) -> TaskStatus + Sync,
{
    let total = tasks.len();
    let completed = Mutex::new(0usize);

    pool.install(|| {
        tasks
            .par_iter()
            .map(|task| {
                let status = panic::catch_unwind(AssertUnwindSafe(|| run(task)))
                    .unwrap_or_else(|payload| {
                        TaskStatus::Failed(PrepError::TaskPanicked(panic_message(payload.as_ref())))
                    });

                match &status {
                    TaskStatus::Failed(e) => {
                        warn!("Failed to process {}: {}", task.image_path.display(), e)
                    }
                    TaskStatus::Skipped(e) => {
                        warn!("Skipped {}: {}", task.image_path.display(), e)
                    }
                    _ => debug!("Processed {} into {}", task.image_path.display(), task.subset),
                }

                let mut done = completed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                *done += 1;
                let reported =
                    panic::catch_unwind(AssertUnwindSafe(|| progress.report(*done, total)));
                drop(done);
                if let Err(payload) = reported {
                    warn!("Progress sink panicked: {}", panic_message(payload.as_ref()));
                }

                TaskOutcome {
                    task: task.clone(),
                    status,
                }
            })
            .collect()
    })
}

/// Run one task: acquire the image, then convert its annotation if any
pub fn process_task(task: &Task, params: &TaskParams, cancel: &AtomicBool) -> TaskStatus {
    if cancel.load(Relaxed) {
        return TaskStatus::Skipped(PrepError::Cancelled);
    }

    let base_name = task.base_name();
    let images_dir = params.output_dirs.images_dir(task.subset);

    let (width, height) = if params.process_images {
        let image = match decode_image(&task.image_path) {
            Ok(image) => image,
            Err(e) => return TaskStatus::Skipped(e),
        };
        let dest = images_dir.join(format!("{}.jpg", base_name));
        if let Err(e) = compress_to_file(&image, &dest, params.max_kb) {
            return TaskStatus::Failed(e);
        }
        (image.width(), image.height())
    } else {
        let dims = match probe_dimensions(&task.image_path) {
            Ok(dims) => dims,
            Err(e) => return TaskStatus::Skipped(e),
        };
        let dest = match task.image_path.extension() {
            Some(ext) => images_dir.join(format!("{}.{}", base_name, ext.to_string_lossy())),
            None => images_dir.join(&base_name),
        };
        if let Err(source) = fs::copy(&task.image_path, &dest) {
            return TaskStatus::Failed(PrepError::Write { path: dest, source });
        }
        dims
    };

    if width == 0 || height == 0 || !task.annotation_path.is_file() {
        return TaskStatus::ImageOnly;
    }
    if cancel.load(Relaxed) {
        return TaskStatus::Skipped(PrepError::Cancelled);
    }

    let document = match read_annotation(&task.annotation_path) {
        Ok(document) => document,
        Err(e) => return TaskStatus::Failed(e),
    };
    let boxes = convert_to_yolo(&document, width, height, params.class_map);

    let label_path = params
        .output_dirs
        .labels_dir(task.subset)
        .join(format!("{}.txt", base_name));
    match write_label_file(&label_path, &boxes) {
        Ok(()) => TaskStatus::Converted { boxes: boxes.len() },
        Err(e) => TaskStatus::Failed(e),
    }
}

/// Fully decode an image, sniffing the format from its content
pub fn decode_image(path: &Path) -> Result<DynamicImage, PrepError> {
    let to_err = |source: image::ImageError| PrepError::ImageDecode {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)
        .map_err(|e| to_err(image::ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| to_err(image::ImageError::IoError(e)))?
        .decode()
        .map_err(to_err)
}

/// Read width and height from the image header without decoding pixels
pub fn probe_dimensions(path: &Path) -> Result<(u32, u32), PrepError> {
    let size = imagesize::size(path).map_err(|source| PrepError::ImageProbe {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((size.width as u32, size.height as u32))
}

/// Convert an annotation document to normalized boxes.
///
/// Polygons come first, then rectangles, each in document order. Shapes whose
/// label is not in `class_map` are dropped without notice.
pub fn convert_to_yolo(
    document: &AnnotationDocument,
    image_width: u32,
    image_height: u32,
    class_map: &ClassMap,
) -> Vec<NormalizedBox> {
    let mut boxes = Vec::new();

    for shape in document.shapes.iter().flatten() {
        let Some(class_id) = shape.label.as_deref().and_then(|l| class_map.get(l)) else {
            continue;
        };
        if let Some(corners) = calculate_bounding_box(shape) {
            boxes.push(NormalizedBox::from_corners(
                class_id,
                corners,
                image_width,
                image_height,
            ));
        }
    }

    for rect in document.labels.iter().flatten() {
        let Some(class_id) = rect.name.as_deref().and_then(|n| class_map.get(n)) else {
            continue;
        };
        boxes.push(NormalizedBox::from_corners(
            class_id,
            rect.corners(),
            image_width,
            image_height,
        ));
    }

    boxes
}

/// Axis-aligned bounds (x_min, y_min, x_max, y_max) over a polygon's points.
///
/// Points with fewer than two coordinates are ignored; `None` if none remain.
pub fn calculate_bounding_box(shape: &PolygonShape) -> Option<(f64, f64, f64, f64)> {
    shape
        .points
        .iter()
        .flatten()
        .filter(|p| p.len() >= 2)
        .fold(None, |acc, p| {
            let (x, y) = (p[0], p[1]);
            Some(match acc {
                None => (x, y, x, y),
                Some((x_min, y_min, x_max, y_max)) => {
                    (x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y))
                }
            })
        })
}

/// Render boxes as label file text: one line per box, no trailing newline
pub fn format_label_lines(boxes: &[NormalizedBox]) -> String {
    boxes
        .iter()
        .map(NormalizedBox::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write a label file; an empty box list still produces an empty file
pub fn write_label_file(path: &Path, boxes: &[NormalizedBox]) -> Result<(), PrepError> {
    fs::write(path, format_label_lines(boxes)).map_err(|source| PrepError::Write {
        path: path.to_path_buf(),
        source,
    })
}

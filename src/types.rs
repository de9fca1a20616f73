use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PrepError;

// Source image extensions picked up during discovery and review
pub const IMG_FORMATS: &[&str] = &["bmp", "jpeg", "jpg", "png"];

/// Check an extension against `IMG_FORMATS`, ignoring case
pub fn is_image_extension(ext: &str) -> bool {
    IMG_FORMATS.iter().any(|f| f.eq_ignore_ascii_case(ext))
}

/// One of the three dataset partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subset {
    Train,
    Val,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Val, Subset::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Val => "val",
            Subset::Test => "test",
        }
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// An image found during discovery and the sibling JSON that may annotate it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePair {
    pub image_path: PathBuf,
    pub annotation_path: PathBuf,
}

/// A unit of pipeline work: a source pair with its assigned subset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub image_path: PathBuf,
    pub annotation_path: PathBuf,
    pub subset: Subset,
}

impl Task {
    pub fn new(pair: SourcePair, subset: Subset) -> Self {
        Self {
            image_path: pair.image_path,
            annotation_path: pair.annotation_path,
            subset,
        }
    }

    /// Output base name: the sanitized file stem of the source image
    pub fn base_name(&self) -> String {
        let stem = self
            .image_path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        sanitize_filename::sanitize(stem)
    }
}

/// Class name to id mapping, ids assigned by position in the class list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMap {
    ids: HashMap<String, usize>,
}

impl ClassMap {
    /// Build from an ordered list of names. Names are trimmed; blank or
    /// repeated names are rejected so that ids stay contiguous.
    pub fn from_names<I, S>(names: I) -> Result<Self, PrepError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = HashMap::new();
        for (id, name) in names.into_iter().enumerate() {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(PrepError::Config(format!("class name at position {} is blank", id)));
            }
            if ids.insert(name.to_string(), id).is_some() {
                return Err(PrepError::Config(format!("class name '{}' is listed twice", name)));
            }
        }
        if ids.is_empty() {
            return Err(PrepError::Config("class list is empty".to_string()));
        }
        Ok(Self { ids })
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The id -> name view, in ascending id order
    pub fn inverted(&self) -> BTreeMap<usize, &str> {
        self.ids
            .iter()
            .map(|(name, &id)| (id, name.as_str()))
            .collect()
    }
}

/// A YOLO bounding box: center and size as fractions of the image dimensions.
///
/// No clamping is applied, so boxes that overhang the image or were drawn
/// inverted pass through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub class_id: usize,
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    /// Normalize a pixel rectangle given as two corners
    pub fn from_corners(
        class_id: usize,
        (x1, y1, x2, y2): (f64, f64, f64, f64),
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let w = x2 - x1;
        let h = y2 - y1;
        let img_w = image_width as f64;
        let img_h = image_height as f64;
        Self {
            class_id,
            cx: (x1 + w / 2.0) / img_w,
            cy: (y1 + h / 2.0) / img_h,
            width: w / img_w,
            height: h / img_h,
        }
    }

    /// Project back to pixel corners (x1, y1, x2, y2)
    pub fn to_corners(&self, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
        let img_w = image_width as f64;
        let img_h = image_height as f64;
        let half_w = self.width * img_w / 2.0;
        let half_h = self.height * img_h / 2.0;
        (
            self.cx * img_w - half_w,
            self.cy * img_h - half_h,
            self.cx * img_w + half_w,
            self.cy * img_h + half_h,
        )
    }
}

impl fmt::Display for NormalizedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.cx, self.cy, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLineError(pub String);

impl fmt::Display for LabelLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed label line: {:?}", self.0)
    }
}

impl std::error::Error for LabelLineError {}

impl FromStr for NormalizedBox {
    type Err = LabelLineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let err = || LabelLineError(line.to_string());
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(err());
        }
        let class_id = fields[0].parse::<usize>().map_err(|_| err())?;
        let mut values = [0.0f64; 4];
        for (slot, field) in values.iter_mut().zip(&fields[1..5]) {
            *slot = field.parse::<f64>().map_err(|_| err())?;
        }
        Ok(Self {
            class_id,
            cx: values[0],
            cy: values[1],
            width: values[2],
            height: values[3],
        })
    }
}

// The annotation document: polygon `shapes` and explicit rectangle `labels`.
// Every key is optional and unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationDocument {
    #[serde(default)]
    pub shapes: Option<Vec<PolygonShape>>,
    #[serde(default)]
    pub labels: Option<Vec<RectangleLabel>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolygonShape {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub points: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RectangleLabel {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub x1: Option<f64>,
    #[serde(default)]
    pub y1: Option<f64>,
    #[serde(default)]
    pub x2: Option<f64>,
    #[serde(default)]
    pub y2: Option<f64>,
}

impl RectangleLabel {
    pub fn corners(&self) -> (f64, f64, f64, f64) {
        (
            self.x1.unwrap_or_default(),
            self.y1.unwrap_or_default(),
            self.x2.unwrap_or_default(),
            self.y2.unwrap_or_default(),
        )
    }
}

/// How a single task ended
#[derive(Debug)]
pub enum TaskStatus {
    /// Image written and a label file produced with this many boxes
    Converted { boxes: usize },
    /// Image written; no annotation file to convert
    ImageOnly,
    /// Nothing written (undecodable image or cancellation)
    Skipped(PrepError),
    /// A step failed; outputs of earlier steps are left in place
    Failed(PrepError),
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub status: TaskStatus,
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total_tasks: usize,
    pub converted: usize,
    pub image_only: usize,
    pub skipped: usize,
    pub failed: usize,
    pub boxes_written: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, status: &TaskStatus) {
        self.total_tasks += 1;
        match status {
            TaskStatus::Converted { boxes } => {
                self.converted += 1;
                self.boxes_written += boxes;
            }
            TaskStatus::ImageOnly => self.image_only += 1,
            TaskStatus::Skipped(_) => self.skipped += 1,
            TaskStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn from_outcomes(outcomes: &[TaskOutcome]) -> Self {
        let mut stats = Self::new();
        for outcome in outcomes {
            stats.record(&outcome.status);
        }
        stats
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Total tasks: {}", self.total_tasks);
        log::info!(
            "Converted with labels: {} ({} boxes)",
            self.converted,
            self.boxes_written
        );
        log::info!("Images without annotation: {}", self.image_only);
        if self.skipped > 0 {
            log::warn!("Skipped (undecodable or cancelled): {}", self.skipped);
        }
        if self.failed > 0 {
            log::warn!("Failed tasks: {}", self.failed);
        }
    }
}

/// Result of a full run
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
    pub stats: ProcessingStats,
}

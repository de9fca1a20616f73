//! Label review and editing.
//!
//! These are the pieces an interactive reviewer needs: listing the images of a
//! prepared dataset, projecting label lines back to pixel rectangles, hit
//! testing, turning a drag into a box, and appending or removing label lines.

use jwalk::WalkDir;
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PrepError;
use crate::types::{is_image_extension, NormalizedBox, Subset};

/// Drags smaller than this many pixels in either direction are treated as clicks
pub const MIN_DRAW_SIZE: f64 = 5.0;

/// An axis-aligned rectangle in image pixels, top-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    pub fn to_normalized(&self, class_id: usize, image_width: u32, image_height: u32) -> NormalizedBox {
        NormalizedBox::from_corners(
            class_id,
            (self.x, self.y, self.x + self.width, self.y + self.height),
            image_width,
            image_height,
        )
    }
}

/// A box read from a label file along with the line it came from
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBox {
    pub class_id: usize,
    pub rect: PixelRect,
    pub raw: String,
}

/// An image of a prepared dataset and where its labels live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewItem {
    pub subset: Subset,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// List the images under `root/images/{train,val,test}`, subset by subset
pub fn list_review_items(root: &Path) -> Vec<ReviewItem> {
    let mut items = Vec::new();
    for subset in Subset::ALL {
        let images_dir = root.join("images").join(subset.as_str());
        if !images_dir.is_dir() {
            continue;
        }
        let labels_dir = root.join("labels").join(subset.as_str());
        for entry in WalkDir::new(&images_dir)
            .min_depth(1)
            .max_depth(1)
            .sort(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let image_path = entry.path();
            if !image_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(is_image_extension)
            {
                continue;
            }
            let stem = image_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            items.push(ReviewItem {
                subset,
                label_path: labels_dir.join(format!("{}.txt", stem)),
                image_path,
            });
        }
    }
    items
}

/// Project label lines back to pixel rectangles; malformed lines are skipped
pub fn parse_label_lines(content: &str, image_width: u32, image_height: u32) -> Vec<LabeledBox> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.parse::<NormalizedBox>() {
            Ok(bbox) => Some((line, bbox)),
            Err(e) => {
                debug!("{}", e);
                None
            }
        })
        .map(|(line, bbox)| {
            let (x1, y1, x2, y2) = bbox.to_corners(image_width, image_height);
            LabeledBox {
                class_id: bbox.class_id,
                rect: PixelRect {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
                raw: line.to_string(),
            }
        })
        .collect()
}

fn read_label_file(path: &Path) -> Result<String, PrepError> {
    fs::read_to_string(path).map_err(|source| PrepError::LabelRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a label file; a missing file means no boxes
pub fn load_label_file(
    path: &Path,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<LabeledBox>, PrepError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = read_label_file(path)?;
    Ok(parse_label_lines(&content, image_width, image_height))
}

/// Append one box as a new line, creating the file if needed
pub fn append_label(path: &Path, bbox: &NormalizedBox) -> Result<(), PrepError> {
    let needs_separator = match fs::read(path) {
        Ok(existing) => existing.last().is_some_and(|&b| b != b'\n'),
        Err(_) => false,
    };
    let to_err = |source: std::io::Error| PrepError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)?;
    let line = if needs_separator {
        format!("\n{}", bbox)
    } else {
        bbox.to_string()
    };
    file.write_all(line.as_bytes()).map_err(to_err)
}

/// Remove the first line matching `raw` (ignoring surrounding whitespace).
///
/// Blank lines are dropped on rewrite. Returns whether a line was removed.
pub fn remove_label(path: &Path, raw: &str) -> Result<bool, PrepError> {
    let content = read_label_file(path)?;
    let target = raw.trim();
    let mut removed = false;
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            if !removed && line.trim() == target {
                removed = true;
                return false;
            }
            !line.trim().is_empty()
        })
        .collect();
    fs::write(path, kept.join("\n")).map_err(|source| PrepError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(removed)
}

/// The box under a point, preferring the one drawn last
pub fn topmost_box_at(boxes: &[LabeledBox], x: f64, y: f64) -> Option<&LabeledBox> {
    boxes.iter().rev().find(|b| b.rect.contains(x, y))
}

/// In-progress drag for drawing a new box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub start: (f64, f64),
    pub current: (f64, f64),
}

impl DrawState {
    pub fn begin(x: f64, y: f64) -> Self {
        Self {
            start: (x, y),
            current: (x, y),
        }
    }

    pub fn update(&mut self, x: f64, y: f64) {
        self.current = (x, y);
    }

    /// The dragged rectangle, whatever direction the drag went
    pub fn rect(&self) -> PixelRect {
        let (sx, sy) = self.start;
        let (cx, cy) = self.current;
        PixelRect {
            x: sx.min(cx),
            y: sy.min(cy),
            width: (sx - cx).abs(),
            height: (sy - cy).abs(),
        }
    }

    /// End the drag; `None` when it is too small to be a deliberate box
    pub fn finish(self) -> Option<PixelRect> {
        let rect = self.rect();
        if rect.width < MIN_DRAW_SIZE || rect.height < MIN_DRAW_SIZE {
            None
        } else {
            Some(rect)
        }
    }
}

use jwalk::WalkDir;
use log::warn;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::PrepError;
use crate::types::{is_image_extension, ClassMap, SourcePair, Subset};
use crate::utils::create_output_directory;

pub const MANIFEST_FILE_NAME: &str = "data.yaml";

/// The `images/` and `labels/` trees of a dataset root
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root: PathBuf,
}

impl OutputDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn images_dir(&self, subset: Subset) -> PathBuf {
        self.root.join("images").join(subset.as_str())
    }

    pub fn labels_dir(&self, subset: Subset) -> PathBuf {
        self.root.join("labels").join(subset.as_str())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }
}

/// Set up the directory structure for YOLO dataset output
pub fn setup_output_directories(root: &Path, clean: bool) -> Result<OutputDirs, PrepError> {
    let output_dirs = OutputDirs::new(root);
    if clean {
        create_output_directory(&root.join("images"), true)?;
        create_output_directory(&root.join("labels"), true)?;
    }
    for subset in Subset::ALL {
        create_output_directory(&output_dirs.images_dir(subset), false)?;
        create_output_directory(&output_dirs.labels_dir(subset), false)?;
    }
    Ok(output_dirs)
}

/// Collect image files directly inside each source directory, each paired with
/// the same-named `.json` beside it. Unreadable directories are logged and skipped.
pub fn discover_tasks(source_dirs: &[PathBuf]) -> Vec<SourcePair> {
    let mut pairs = Vec::new();
    for dir in source_dirs {
        if !dir.is_dir() {
            warn!("Skipping source {}: not a readable directory", dir.display());
            continue;
        }
        let entries = WalkDir::new(dir)
            .skip_hidden(false)
            .min_depth(1)
            .max_depth(1)
            .sort(true);
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error while reading {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let image_path = entry.path();
            if !image_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(is_image_extension)
            {
                continue;
            }
            let annotation_path = image_path.with_extension("json");
            pairs.push(SourcePair {
                image_path,
                annotation_path,
            });
        }
    }
    pairs
}

/// Render the dataset manifest: root path, subset image directories and the
/// class names listed by ascending id
pub fn render_dataset_yaml(root: &Path, class_map: &ClassMap) -> String {
    let mut yaml_content = format!(
        "path: {}\ntrain: images/train\nval: images/val\ntest: images/test\n",
        root.to_string_lossy()
    );
    yaml_content.push_str("\nnames:\n");
    for (id, name) in class_map.inverted() {
        yaml_content.push_str(&format!("    {}: {}\n", id, name));
    }
    yaml_content
}

/// Create the data.yaml file for YOLO training
pub fn create_dataset_yaml(output_dirs: &OutputDirs, class_map: &ClassMap) -> Result<PathBuf, PrepError> {
    let dataset_yaml_path = output_dirs.manifest_path();
    let to_err = |source: std::io::Error| PrepError::Write {
        path: dataset_yaml_path.clone(),
        source,
    };
    let absolute_path = fs::canonicalize(&output_dirs.root).unwrap_or_else(|_| output_dirs.root.clone());
    let yaml_content = render_dataset_yaml(&absolute_path, class_map);

    let mut dataset_yaml = BufWriter::new(File::create(&dataset_yaml_path).map_err(to_err)?);
    dataset_yaml
        .write_all(yaml_content.as_bytes())
        .and_then(|_| dataset_yaml.flush())
        .map_err(to_err)?;
    Ok(dataset_yaml_path)
}

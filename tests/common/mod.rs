#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use yoloprep::ProgressSink;

/// Write a small gradient JPEG of the given size
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
    });
    img.save(path).unwrap();
}

/// Write a PNG of the given size
pub fn write_png(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
    img.save(path).unwrap();
}

/// Deterministic high-entropy image that compresses poorly
pub fn noise_image(width: u32, height: u32) -> image::DynamicImage {
    let mut state: u32 = 0x1234_5678;
    let img = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xFF) as u8
        };
        Rgb([next(), next(), next()])
    });
    image::DynamicImage::ImageRgb8(img)
}

pub fn write_json(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

pub fn dataset_file(root: &Path, kind: &str, subset: &str, name: &str) -> PathBuf {
    root.join(kind).join(subset).join(name)
}

/// Progress sink that records every report
#[derive(Default)]
pub struct RecordingProgress {
    pub reports: Mutex<Vec<(usize, usize)>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, completed: usize, total: usize) {
        self.reports.lock().unwrap().push((completed, total));
    }
}

use std::path::{Path, PathBuf};

use image::RgbImage;
use rand::seq::SliceRandom;
use rand::Rng;

use super::TrainingError;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Images grouped into one subdirectory per class.
///
/// Classes are the subdirectory names in sorted order; a sample's label is
/// its class's position in that order.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<(PathBuf, usize)>,
}

impl ImageFolder {
    pub fn open(root: &Path) -> Result<Self, TrainingError> {
        if !root.is_dir() {
            return Err(TrainingError::DatasetMissing(root.to_path_buf()));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(root.join(class))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            files.sort();
            samples.extend(files.into_iter().map(|p| (p, label)));
        }

        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn label(&self, index: usize) -> usize {
        self.samples[index].1
    }

    pub fn load(&self, index: usize) -> Result<(RgbImage, usize), TrainingError> {
        let (path, label) = &self.samples[index];
        let img = image::open(path).map_err(|source| TrainingError::Image {
            path: path.clone(),
            source,
        })?;
        Ok((img.to_rgb8(), *label))
    }

    /// Sample indices split into batches, optionally shuffled.
    pub fn batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }
        order
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

//! Labelled raw dump → `{out}/{train,val}/{grade}/{id}.png`.
//!
//! The labels file is a CSV with `id_code` and `diagnosis` columns (the APTOS
//! layout). Each grade is split independently so both sides keep the class
//! balance of the source.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use super::TrainingError;
use crate::models::enums::DrGrade;
use crate::pipeline::preprocess::INPUT_SIZE;

pub const DEFAULT_SPLIT_SEED: u64 = 42;
pub const DEFAULT_VAL_FRACTION: f64 = 0.2;

const SOURCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "tif"];

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub raw_images: PathBuf,
    pub labels_csv: PathBuf,
    pub out_dir: PathBuf,
    pub val_fraction: f64,
    pub seed: u64,
    pub image_size: u32,
}

impl PrepareConfig {
    pub fn new(raw_images: PathBuf, labels_csv: PathBuf, out_dir: PathBuf) -> Self {
        Self {
            raw_images,
            labels_csv,
            out_dir,
            val_fraction: DEFAULT_VAL_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
            image_size: INPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareSummary {
    pub train_written: usize,
    pub val_written: usize,
    pub skipped_existing: usize,
    pub unknown_grade: usize,
    pub missing_image: usize,
    pub invalid_id: usize,
}

#[derive(Debug, Deserialize)]
struct LabelRow {
    id_code: String,
    diagnosis: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Split {
    Train,
    Val,
}

impl Split {
    fn dir(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn find_source(raw_images: &Path, id: &str) -> Option<PathBuf> {
    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| raw_images.join(format!("{id}.{ext}")))
        .find(|p| p.is_file())
}

/// Assign each sample to a split, per grade, deterministically for `seed`.
fn stratified_split(
    by_grade: BTreeMap<u8, Vec<(String, PathBuf)>>,
    val_fraction: f64,
    seed: u64,
) -> Vec<(Split, u8, String, PathBuf)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for (grade, mut samples) in by_grade {
        samples.shuffle(&mut rng);
        let n_val = (samples.len() as f64 * val_fraction).round() as usize;
        for (i, (id, path)) in samples.into_iter().enumerate() {
            let split = if i < n_val { Split::Val } else { Split::Train };
            out.push((split, grade, id, path));
        }
    }
    out
}

pub fn prepare_dataset(config: &PrepareConfig) -> Result<PrepareSummary, TrainingError> {
    if !config.raw_images.is_dir() {
        return Err(TrainingError::DatasetMissing(config.raw_images.clone()));
    }
    if !(0.0..1.0).contains(&config.val_fraction) {
        return Err(TrainingError::InvalidConfig(format!(
            "val fraction must be in [0, 1), got {}",
            config.val_fraction
        )));
    }

    let mut summary = PrepareSummary::default();
    let mut by_grade: BTreeMap<u8, Vec<(String, PathBuf)>> = BTreeMap::new();

    let mut reader = csv::Reader::from_path(&config.labels_csv)?;
    for row in reader.deserialize::<LabelRow>() {
        let row = row?;
        let id = row.id_code.trim().to_string();
        let Ok(grade) = DrGrade::try_from(row.diagnosis) else {
            summary.unknown_grade += 1;
            continue;
        };
        if !valid_id(&id) {
            summary.invalid_id += 1;
            continue;
        }
        let Some(source) = find_source(&config.raw_images, &id) else {
            summary.missing_image += 1;
            continue;
        };
        by_grade.entry(grade.index()).or_default().push((id, source));
    }

    for split in [Split::Train, Split::Val] {
        for grade in DrGrade::ALL {
            let dir = config.out_dir.join(split.dir()).join(grade.index().to_string());
            std::fs::create_dir_all(dir)?;
        }
    }

    for (split, grade, id, source) in stratified_split(by_grade, config.val_fraction, config.seed) {
        let dst = config
            .out_dir
            .join(split.dir())
            .join(grade.to_string())
            .join(format!("{id}.png"));
        if dst.exists() {
            summary.skipped_existing += 1;
            continue;
        }

        let img = image::open(&source).map_err(|source_err| TrainingError::Image {
            path: source.clone(),
            source: source_err,
        })?;
        img.resize_exact(config.image_size, config.image_size, FilterType::CatmullRom)
            .to_rgb8()
            .save(&dst)
            .map_err(|e| TrainingError::Image {
                path: dst.clone(),
                source: e,
            })?;

        match split {
            Split::Train => summary.train_written += 1,
            Split::Val => summary.val_written += 1,
        }
    }

    tracing::info!(
        train = summary.train_written,
        val = summary.val_written,
        skipped_existing = summary.skipped_existing,
        unknown_grade = summary.unknown_grade,
        missing_image = summary.missing_image,
        invalid_id = summary.invalid_id,
        "Dataset prepared"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn fixture() -> (tempfile::TempDir, PrepareConfig) {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();

        let mut csv = String::from("id_code,diagnosis\n");
        for i in 0..10 {
            let id = format!("a{i:03}");
            RgbImage::from_pixel(60, 40, Rgb([i as u8 * 20, 0, 0]))
                .save(raw.join(format!("{id}.png")))
                .unwrap();
            csv.push_str(&format!("{id},0\n"));
        }
        for i in 0..5 {
            let id = format!("b{i:03}");
            RgbImage::new(30, 30).save(raw.join(format!("{id}.jpg"))).unwrap();
            csv.push_str(&format!("{id},2\n"));
        }
        csv.push_str("c000,7\n");
        csv.push_str("ghost,1\n");
        csv.push_str("../escape,1\n");
        let labels = dir.path().join("train.csv");
        std::fs::write(&labels, csv).unwrap();

        let config = PrepareConfig::new(raw, labels, dir.path().join("processed"));
        (dir, config)
    }

    fn count_pngs(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn stratified_split_and_counters() {
        let (_dir, config) = fixture();
        let summary = prepare_dataset(&config).unwrap();
        assert_eq!(
            summary,
            PrepareSummary {
                train_written: 12,
                val_written: 3,
                skipped_existing: 0,
                unknown_grade: 1,
                missing_image: 1,
                invalid_id: 1,
            }
        );

        let out = &config.out_dir;
        assert_eq!(count_pngs(&out.join("train").join("0")), 8);
        assert_eq!(count_pngs(&out.join("val").join("0")), 2);
        assert_eq!(count_pngs(&out.join("train").join("2")), 4);
        assert_eq!(count_pngs(&out.join("val").join("2")), 1);
        assert!(out.join("val").join("4").is_dir());

        let any = std::fs::read_dir(out.join("train").join("2"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert_eq!(image::open(any).unwrap().to_rgb8().dimensions(), (224, 224));
    }

    #[test]
    fn rerun_skips_existing_outputs() {
        let (_dir, config) = fixture();
        prepare_dataset(&config).unwrap();
        let again = prepare_dataset(&config).unwrap();
        assert_eq!(again.train_written + again.val_written, 0);
        assert_eq!(again.skipped_existing, 15);
    }

    #[test]
    fn missing_raw_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = PrepareConfig::new(
            dir.path().join("nope"),
            dir.path().join("x.csv"),
            dir.path().join("out"),
        );
        assert!(matches!(
            prepare_dataset(&config),
            Err(TrainingError::DatasetMissing(_))
        ));
    }
}

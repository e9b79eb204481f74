//! Fundus image preprocessing for the classifier.
//!
//! Inference path, in order: resize shortest side to 256 (aspect kept),
//! center-crop 224×224, scale to [0, 1], normalize per channel with the
//! ImageNet statistics the backbone was pretrained on. Training reuses the
//! same tensor conversion with random-resized-crop + horizontal flip in front.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use rand::Rng;
use thiserror::Error;

/// Shortest side after the first resize.
pub const RESIZE_SHORTEST: u32 = 256;

/// Square input edge expected by the backbone.
pub const INPUT_SIZE: u32 = 224;

/// Per-channel mean (R, G, B) of the pretraining distribution.
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation (R, G, B) of the pretraining distribution.
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Maximum upload size accepted for decoding.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Random-resized-crop area range (fraction of the source image).
const CROP_SCALE: (f64, f64) = (0.08, 1.0);

/// Random-resized-crop aspect ratio range.
const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);

/// Attempts before falling back to a ratio-clamped center crop.
const CROP_ATTEMPTS: usize = 10;

/// Batch of one normalized image, NCHW.
pub type InputTensor = Array4<f32>;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image is empty")]
    Empty,

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Cannot decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image has zero width or height")]
    ZeroDimension,
}

/// Decode any supported format and convert to 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::TooLarge {
            size: bytes.len(),
            max: MAX_IMAGE_BYTES,
        });
    }
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(PreprocessError::ZeroDimension);
    }
    Ok(rgb)
}

/// Full inference transform from encoded bytes.
pub fn preprocess(bytes: &[u8]) -> Result<InputTensor, PreprocessError> {
    let rgb = decode_rgb(bytes)?;
    Ok(eval_transform(&rgb))
}

/// Deterministic resize → center crop → normalize.
pub fn eval_transform(image: &RgbImage) -> InputTensor {
    let resized = resize_shortest_side(image, RESIZE_SHORTEST);
    let cropped = center_crop(&resized, INPUT_SIZE);
    to_normalized_tensor(&cropped)
}

/// Training transform: random resized crop, random horizontal flip, normalize.
pub fn train_transform<R: Rng + ?Sized>(image: &RgbImage, rng: &mut R) -> InputTensor {
    let mut cropped = random_resized_crop(image, INPUT_SIZE, rng);
    if rng.gen_bool(0.5) {
        cropped = imageops::flip_horizontal(&cropped);
    }
    to_normalized_tensor(&cropped)
}

/// Resize so the shorter edge equals `target`; the longer edge is truncated
/// after scaling, matching the reference training transform.
pub fn resize_shortest_side(image: &RgbImage, target: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = if w <= h {
        (target, scaled_long_edge(h, w, target))
    } else {
        (scaled_long_edge(w, h, target), target)
    };
    if (new_w, new_h) == (w, h) {
        return image.clone();
    }
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

fn scaled_long_edge(long: u32, short: u32, target: u32) -> u32 {
    ((target as u64 * long as u64) / short.max(1) as u64) as u32
}

/// Center crop to `size`×`size`. Images smaller than `size` are upscaled
/// first so the crop is always full.
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w < size || h < size {
        let upscaled = resize_shortest_side(image, size);
        return center_crop(&upscaled, size);
    }
    let left = half_offset(w - size);
    let top = half_offset(h - size);
    imageops::crop_imm(image, left, top, size, size).to_image()
}

/// `round(diff / 2)` with ties to even.
fn half_offset(diff: u32) -> u32 {
    let floor = diff / 2;
    if diff % 2 == 1 && floor % 2 == 1 {
        floor + 1
    } else {
        floor
    }
}

/// Random crop of varying area and aspect, resized to `size`×`size`.
pub fn random_resized_crop<R: Rng + ?Sized>(image: &RgbImage, size: u32, rng: &mut R) -> RgbImage {
    let (left, top, crop_w, crop_h) = sample_crop_box(image.width(), image.height(), rng);
    let crop = imageops::crop_imm(image, left, top, crop_w, crop_h).to_image();
    imageops::resize(&crop, size, size, FilterType::Triangle)
}

fn sample_crop_box<R: Rng + ?Sized>(width: u32, height: u32, rng: &mut R) -> (u32, u32, u32, u32) {
    let area = width as f64 * height as f64;
    let (log_min, log_max) = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let aspect = rng.gen_range(log_min..=log_max).exp();
        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let top = rng.gen_range(0..=height - h);
            let left = rng.gen_range(0..=width - w);
            return (left, top, w, h);
        }
    }

    // Fallback: whole image, clamped to the allowed aspect range.
    let in_ratio = width as f64 / height as f64;
    let (w, h) = if in_ratio < CROP_RATIO.0 {
        (width, ((width as f64 / CROP_RATIO.0).round() as u32).min(height))
    } else if in_ratio > CROP_RATIO.1 {
        (((height as f64 * CROP_RATIO.1).round() as u32).min(width), height)
    } else {
        (width, height)
    };
    ((width - w) / 2, (height - h) / 2, w.max(1), h.max(1))
}

/// HWC u8 → NCHW f32, scaled to [0, 1] then normalized per channel.
pub fn to_normalized_tensor(image: &RgbImage) -> InputTensor {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageOutputFormat, Rgb};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn png_bytes(image: RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn output_is_fixed_size_for_any_input() {
        for (w, h) in [(640, 480), (300, 900), (224, 224), (100, 80)] {
            let img = RgbImage::from_pixel(w, h, Rgb([120, 60, 30]));
            let tensor = preprocess(&png_bytes(img)).unwrap();
            assert_eq!(tensor.shape(), &[1, 3, 224, 224], "input {w}x{h}");
        }
    }

    #[test]
    fn shortest_side_becomes_256_and_aspect_is_kept() {
        let img = RgbImage::new(640, 480);
        let resized = resize_shortest_side(&img, RESIZE_SHORTEST);
        assert_eq!(resized.dimensions(), (341, 256));

        let tall = RgbImage::new(300, 900);
        assert_eq!(resize_shortest_side(&tall, 256).dimensions(), (256, 768));
    }

    #[test]
    fn normalization_uses_channel_constants() {
        let img = RgbImage::from_pixel(224, 224, Rgb([255, 0, 128]));
        let tensor = to_normalized_tensor(&img);
        let r = tensor[[0, 0, 10, 10]];
        let g = tensor[[0, 1, 10, 10]];
        let b = tensor[[0, 2, 10, 10]];
        assert!((r - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((g - (0.0 - 0.456) / 0.224).abs() < 1e-5);
        assert!((b - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn center_crop_takes_the_middle() {
        let mut img = RgbImage::from_pixel(256, 300, Rgb([0, 0, 0]));
        // Mark the pixel that should land at the crop origin.
        let (left, top) = (half_offset(256 - 224), half_offset(300 - 224));
        img.put_pixel(left, top, Rgb([255, 255, 255]));
        let crop = center_crop(&img, 224);
        assert_eq!(crop.dimensions(), (224, 224));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn half_offset_rounds_ties_to_even() {
        assert_eq!(half_offset(32), 16);
        assert_eq!(half_offset(1), 0);
        assert_eq!(half_offset(3), 2);
        assert_eq!(half_offset(5), 2);
        assert_eq!(half_offset(7), 4);
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let mut img = RgbImage::new(500, 400);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        let bytes = png_bytes(img);
        assert_eq!(preprocess(&bytes).unwrap(), preprocess(&bytes).unwrap());
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = preprocess(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
        assert!(matches!(preprocess(&[]).unwrap_err(), PreprocessError::Empty));
    }

    #[test]
    fn train_transform_keeps_input_size() {
        let img = RgbImage::from_pixel(320, 240, Rgb([10, 200, 90]));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let tensor = train_transform(&img, &mut rng);
            assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        }
    }

    #[test]
    fn crop_box_always_inside_image() {
        let mut rng = StdRng::seed_from_u64(42);
        for (w, h) in [(320, 240), (50, 400), (400, 50), (1, 1)] {
            for _ in 0..50 {
                let (left, top, cw, ch) = sample_crop_box(w, h, &mut rng);
                assert!(cw > 0 && ch > 0);
                assert!(left + cw <= w && top + ch <= h, "{w}x{h}: {left},{top} {cw}x{ch}");
            }
        }
    }
}

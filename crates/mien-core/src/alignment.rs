//! Per-model face alignment and tensor packing.
//!
//! Two independent paths, both pure functions of the frame and one detection:
//! - gender/age: similarity crop centered on the box, no rotation
//! - emotion: eye-leveling rotation, 1.25× square crop, grayscale, histogram
//!   equalization, `[0, 1]` scaling

use crate::geometry::{apply_affine, rotation_matrix, warp_affine, Affine2, SimilarityTransform};
use crate::types::{Keypoint, PixelBox};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array3;

/// Square crop side relative to the larger box side for emotion input.
const EMOTION_CROP_MARGIN: f32 = 1.25;

/// Eye separations at or below this length yield no rotation.
const EYE_DISTANCE_EPSILON: f32 = 1e-6;

/// Synthesized eye positions as fractions of the box, used without keypoints.
const DEFAULT_LEFT_EYE: (f32, f32) = (0.3, 0.4);
const DEFAULT_RIGHT_EYE: (f32, f32) = (0.7, 0.4);

/// BT.601 luma weights (R, G, B).
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Pixel normalization `(px - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelNormalization {
    pub mean: f32,
    pub std: f32,
}

/// Gender/age crop: map the box center to the center of a `target`×`target`
/// square at scale `target / max(w, h)`. Pixels pulled from outside the frame
/// are black.
pub fn gender_age_crop(frame: &RgbImage, bbox: &PixelBox, target: u32) -> RgbImage {
    let width = bbox.width().max(1) as f32;
    let height = bbox.height().max(1) as f32;
    let center_x = (bbox.xmin + bbox.xmax) as f32 / 2.0;
    let center_y = (bbox.ymin + bbox.ymax) as f32 / 2.0;
    let scale = target as f32 / width.max(height);
    let half = target as f32 / 2.0;

    let transform = SimilarityTransform::scale(scale)
        .then(&SimilarityTransform::translation(-center_x * scale, -center_y * scale))
        .then(&SimilarityTransform::rotation(0.0))
        .then(&SimilarityTransform::translation(half, half));

    warp_affine(frame, &transform.to_affine(), target, target)
}

/// Pack an RGB crop into a `[3, H, W]` tensor, resizing to `(width, height)`
/// first when needed.
pub fn gender_age_blob(
    crop: &RgbImage,
    width: u32,
    height: u32,
    norm: PixelNormalization,
) -> Array3<f32> {
    let resized;
    let img = if crop.dimensions() == (width, height) {
        crop
    } else {
        resized = imageops::resize(crop, width, height, FilterType::Triangle);
        &resized
    };

    let mut blob = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, px) in img.enumerate_pixels() {
        for c in 0..3 {
            blob[[c, y as usize, x as usize]] = (px.0[c] as f32 - norm.mean) / norm.std;
        }
    }
    blob
}

/// Eyes ordered left-to-right by x, or synthesized from the box.
fn eye_pair(bbox: &PixelBox, keypoints: Option<&[Keypoint]>) -> ((f32, f32), (f32, f32)) {
    match keypoints {
        Some([a, b, ..]) => {
            let a = (a.x as f32, a.y as f32);
            let b = (b.x as f32, b.y as f32);
            if b.0 < a.0 {
                (b, a)
            } else {
                (a, b)
            }
        }
        _ => {
            let (x1, y1) = (bbox.xmin as f32, bbox.ymin as f32);
            let w = bbox.width().max(1) as f32;
            let h = bbox.height().max(1) as f32;
            (
                (x1 + DEFAULT_LEFT_EYE.0 * w, y1 + DEFAULT_LEFT_EYE.1 * h),
                (x1 + DEFAULT_RIGHT_EYE.0 * w, y1 + DEFAULT_RIGHT_EYE.1 * h),
            )
        }
    }
}

/// Eye-leveling angle in degrees; 0 for coincident eyes.
pub fn eye_angle(left: (f32, f32), right: (f32, f32)) -> f32 {
    let dx = right.0 - left.0;
    let dy = right.1 - left.1;
    if dx.hypot(dy) > EYE_DISTANCE_EPSILON {
        dy.atan2(dx).to_degrees()
    } else {
        0.0
    }
}

/// Copy the rectangle `[x1, x2) × [y1, y2)` out of `matrix`-warped `frame`.
fn crop_warped(frame: &RgbImage, matrix: &Affine2, x1: i32, y1: i32, x2: i32, y2: i32) -> RgbImage {
    let mut shifted = *matrix;
    shifted[2] -= x1 as f32;
    shifted[5] -= y1 as f32;
    warp_affine(frame, &shifted, (x2 - x1) as u32, (y2 - y1) as u32)
}

/// Emotion crop: level the eyes by rotating the frame about their midpoint,
/// then take a `1.25 × max(w, h)` square around the rotated box center,
/// clamped to the frame and resized to `output_size`.
///
/// A crop that clamps away to nothing falls back to the unrotated box; if
/// that is empty too the result is a black square.
pub fn emotion_align(
    frame: &RgbImage,
    bbox: &PixelBox,
    keypoints: Option<&[Keypoint]>,
    output_size: u32,
) -> RgbImage {
    let (frame_w, frame_h) = (frame.width() as i32, frame.height() as i32);
    let (left, right) = eye_pair(bbox, keypoints);
    let angle = eye_angle(left, right);
    let eyes_center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let matrix = rotation_matrix(eyes_center, angle, 1.0);

    let face_center = (
        (bbox.xmin + bbox.xmax) as f32 / 2.0,
        (bbox.ymin + bbox.ymax) as f32 / 2.0,
    );
    let (rcx, rcy) = apply_affine(&matrix, face_center.0, face_center.1);

    let w = bbox.width().max(1) as f32;
    let h = bbox.height().max(1) as f32;
    let half = w.max(h) * EMOTION_CROP_MARGIN / 2.0;
    let rx1 = ((rcx - half).round_ties_even() as i32).max(0);
    let ry1 = ((rcy - half).round_ties_even() as i32).max(0);
    let rx2 = ((rcx + half).round_ties_even() as i32).min(frame_w);
    let ry2 = ((rcy + half).round_ties_even() as i32).min(frame_h);

    let aligned = if rx2 > rx1 && ry2 > ry1 {
        crop_warped(frame, &matrix, rx1, ry1, rx2, ry2)
    } else {
        let x1 = bbox.xmin.max(0);
        let y1 = bbox.ymin.max(0);
        let x2 = bbox.xmax.min(frame_w);
        let y2 = bbox.ymax.min(frame_h);
        if x2 <= x1 || y2 <= y1 {
            return RgbImage::new(output_size, output_size);
        }
        imageops::crop_imm(frame, x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
            .to_image()
    };

    imageops::resize(&aligned, output_size, output_size, FilterType::Triangle)
}

/// Single-channel intensity with BT.601 weights.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y).0;
        let luma = LUMA_WEIGHTS[0] * p[0] as f32
            + LUMA_WEIGHTS[1] * p[1] as f32
            + LUMA_WEIGHTS[2] * p[2] as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

fn identity_lut() -> [u8; 256] {
    std::array::from_fn(|i| i as u8)
}

/// CDF-based equalization table; uniform images map to themselves.
fn build_equalization_lut(hist: &[u32; 256], total: u32) -> [u8; 256] {
    if total == 0 {
        return identity_lut();
    }

    let mut cdf = [0u32; 256];
    let mut cumulative = 0u32;
    let mut cdf_min = None;
    for (idx, count) in hist.iter().enumerate() {
        cumulative += *count;
        cdf[idx] = cumulative;
        if cdf_min.is_none() && *count > 0 {
            cdf_min = Some(cumulative);
        }
    }

    let Some(cdf_min) = cdf_min else {
        return identity_lut();
    };
    if cdf_min == total {
        return identity_lut();
    }

    let denom = (total - cdf_min) as f32;
    std::array::from_fn(|i| {
        let numerator = cdf[i].saturating_sub(cdf_min) as f32;
        (numerator / denom * 255.0).round().clamp(0.0, 255.0) as u8
    })
}

/// Histogram-equalize a grayscale image.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let lut = build_equalization_lut(&hist, gray.width() * gray.height());

    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    out
}

/// Pack an aligned emotion crop into a `[1, H, W]` tensor: grayscale,
/// resized to `(width, height)`, equalized, scaled to `[0, 1]`.
pub fn emotion_tensor(aligned: &RgbImage, width: u32, height: u32) -> Array3<f32> {
    let gray = to_gray(aligned);
    let gray = if gray.dimensions() == (width, height) {
        gray
    } else {
        imageops::resize(&gray, width, height, FilterType::Triangle)
    };
    let equalized = equalize_histogram(&gray);

    let mut tensor = Array3::<f32>::zeros((1, height as usize, width as usize));
    for (x, y, px) in equalized.enumerate_pixels() {
        tensor[[0, y as usize, x as usize]] = px.0[0] as f32 / 255.0;
    }
    tensor
}

//! Planar geometry helpers: box overlap, similarity transforms, affine warps.
//!
//! Pure functions with no state. Affine matrices are 2×3, row-major:
//! ```text
//! | m0  m1  m2 |
//! | m3  m4  m5 |
//! ```
//! mapping a source point `(x, y)` to `(m0·x + m1·y + m2, m3·x + m4·y + m5)`.

use image::{Rgb, RgbImage};

/// Numeric floor on the IoU union denominator.
const IOU_UNION_FLOOR: f32 = 1e-6;

/// Row-major 2×3 affine matrix.
pub type Affine2 = [f32; 6];

/// Intersection-over-union of two axis-aligned boxes given as
/// `[min_a, min_b, max_a, max_b]`.
///
/// The axis order only has to agree between the two boxes, so this works for
/// both `(xmin, ymin, xmax, ymax)` and the detector's `(ymin, xmin, ymax, xmax)`.
/// Degenerate boxes produce 0 rather than NaN.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_a = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_b = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_a * inter_b;

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;

    inter / union.max(IOU_UNION_FLOOR)
}

/// 4-DOF similarity transform (uniform scale, rotation, translation).
///
/// Represents the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 }
    }

    pub fn scale(s: f32) -> Self {
        Self { a: s, b: 0.0, tx: 0.0, ty: 0.0 }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self { a: 1.0, b: 0.0, tx, ty }
    }

    /// Counter-clockwise rotation by `radians` about the origin.
    pub fn rotation(radians: f32) -> Self {
        Self {
            a: radians.cos(),
            b: radians.sin(),
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Compose: apply `self` first, then `next`.
    pub fn then(&self, next: &SimilarityTransform) -> Self {
        Self {
            a: next.a * self.a - next.b * self.b,
            b: next.b * self.a + next.a * self.b,
            tx: next.a * self.tx - next.b * self.ty + next.tx,
            ty: next.b * self.tx + next.a * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn to_affine(&self) -> Affine2 {
        [self.a, -self.b, self.tx, self.b, self.a, self.ty]
    }
}

/// Rotation about `center` by `angle_deg` degrees (positive = counter-clockwise
/// on screen), with uniform `scale`. Same convention as OpenCV's
/// `getRotationMatrix2D`.
pub fn rotation_matrix(center: (f32, f32), angle_deg: f32, scale: f32) -> Affine2 {
    let theta = angle_deg.to_radians();
    let alpha = scale * theta.cos();
    let beta = scale * theta.sin();
    let (cx, cy) = center;
    [
        alpha,
        beta,
        (1.0 - alpha) * cx - beta * cy,
        -beta,
        alpha,
        beta * cx + (1.0 - alpha) * cy,
    ]
}

/// Map a point through an affine matrix.
pub fn apply_affine(m: &Affine2, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Invert a 2×3 affine matrix. Returns `None` for singular matrices.
pub fn invert_affine(m: &Affine2) -> Option<Affine2> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let a = m[4] * inv_det;
    let b = -m[1] * inv_det;
    let d = -m[3] * inv_det;
    let e = m[0] * inv_det;
    Some([a, b, -(a * m[2] + b * m[5]), d, e, -(d * m[2] + e * m[5])])
}

/// Apply a 2×3 affine warp to an RGB frame.
///
/// Every output pixel is mapped back through the inverse matrix and sampled
/// with bilinear interpolation. Samples outside the source are 0 (black),
/// so regions the transform pulls in from beyond the frame border are zero-filled.
pub fn warp_affine(frame: &RgbImage, matrix: &Affine2, out_width: u32, out_height: u32) -> RgbImage {
    let mut output = RgbImage::new(out_width, out_height);
    let Some(inv) = invert_affine(matrix) else {
        return output;
    };

    let (src_w, src_h) = (frame.width() as i64, frame.height() as i64);
    let src = frame.as_raw();

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            src[((y * src_w + x) * 3) as usize + c] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_height {
        for ox in 0..out_width {
            let (sx, sy) = apply_affine(&inv, ox as f32, oy as f32);

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let mut px = [0u8; 3];
            for (c, out) in px.iter_mut().enumerate() {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out = val.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(ox, oy, Rgb(px));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = [0.1, 0.2, 0.5, 0.6];
        let b = [0.3, 0.1, 0.7, 0.4];
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn test_iou_partial() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [0.0, 5.0, 10.0, 15.0];
        // Overlap: 10x5 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_degenerate_is_finite() {
        let a = [5.0, 5.0, 5.0, 5.0];
        let v = iou(&a, &a);
        assert!(v.is_finite());
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_similarity_compose_order() {
        // scale by 2, then shift by (10, 0): (1, 1) -> (2, 2) -> (12, 2)
        let t = SimilarityTransform::scale(2.0).then(&SimilarityTransform::translation(10.0, 0.0));
        let (x, y) = t.apply(1.0, 1.0);
        assert!((x - 12.0).abs() < 1e-6);
        assert!((y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_rotation_quarter_turn() {
        let t = SimilarityTransform::rotation(std::f32::consts::FRAC_PI_2);
        let (x, y) = t.apply(1.0, 0.0);
        assert!(x.abs() < 1e-6);
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_affine_matches_similarity() {
        let t = SimilarityTransform::scale(0.5)
            .then(&SimilarityTransform::rotation(0.3))
            .then(&SimilarityTransform::translation(4.0, -2.0));
        let m = t.to_affine();
        let (ax, ay) = apply_affine(&m, 7.0, 3.0);
        let (sx, sy) = t.apply(7.0, 3.0);
        assert!((ax - sx).abs() < 1e-5 && (ay - sy).abs() < 1e-5);
    }

    #[test]
    fn test_invert_affine_roundtrip() {
        let m = rotation_matrix((50.0, 40.0), 17.0, 1.0);
        let inv = invert_affine(&m).unwrap();
        let (x, y) = apply_affine(&m, 12.0, 34.0);
        let (bx, by) = apply_affine(&inv, x, y);
        assert!((bx - 12.0).abs() < 1e-3 && (by - 34.0).abs() < 1e-3);
    }

    #[test]
    fn test_rotation_matrix_fixes_center() {
        let m = rotation_matrix((30.0, 20.0), 45.0, 1.0);
        let (x, y) = apply_affine(&m, 30.0, 20.0);
        assert!((x - 30.0).abs() < 1e-4 && (y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_invert_singular() {
        assert!(invert_affine(&[0.0; 6]).is_none());
    }

    #[test]
    fn test_warp_identity_preserves_pixels() {
        let mut frame = RgbImage::new(8, 6);
        frame.put_pixel(3, 2, Rgb([200, 100, 50]));
        let out = warp_affine(&frame, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 8, 6);
        assert_eq!(out.get_pixel(3, 2).0, [200, 100, 50]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_warp_zero_fills_outside() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        // Shift right by 10: everything sampled from x < 0 for the first 10 columns
        let out = warp_affine(&frame, &[1.0, 0.0, 10.0, 0.0, 1.0, 0.0], 6, 4);
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}

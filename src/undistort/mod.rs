//! Dense undistortion mapping.
//!
//! The output geometry is the axis-aligned bounding box of the source image
//! in undistorted space. [`undistort_image`] resamples the source into that
//! canvas; [`undistort_st_map`] writes the sampling coordinates themselves
//! as a normalized two-channel float raster for GPU-side remapping. Both
//! outputs must be generated from the same [`BoundingBox`] so they share
//! one offset.

use crate::camera::PinholeCamera;
use image::{Rgb, Rgb32FImage, RgbImage};
use nalgebra::Vector2;

#[derive(thiserror::Error, Debug)]
pub enum UndistortError {
    #[error("No source pixel could be mapped to undistorted space")]
    EmptyBoundingBox,
}

/// Axis-aligned bounding box of the undistorted source image.
#[derive(Clone, Debug)]
pub struct BoundingBox {
    pub min: Vector2<f64>,
    pub max: Vector2<f64>,
}

impl BoundingBox {
    /// Width of the output canvas covering the box.
    pub fn output_width(&self) -> u32 {
        (self.max.x - self.min.x + 1.0) as u32
    }

    /// Height of the output canvas covering the box.
    pub fn output_height(&self) -> u32 {
        (self.max.y - self.min.y + 1.0) as u32
    }

    /// Position of the output origin in undistorted space.
    pub fn offset(&self) -> Vector2<f64> {
        self.min
    }
}

/// Maps every source pixel into undistorted space and tracks the extrema.
///
/// Pixels whose inversion does not converge are skipped; if none converges
/// the box is empty and an error is returned.
pub fn compute_bounding_box(
    camera: &PinholeCamera,
    width: u32,
    height: u32,
) -> Result<BoundingBox, UndistortError> {
    let mut min = Vector2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Vector2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut converged = false;

    for i in 0..height {
        for j in 0..width {
            let Ok(pos) = camera.undistort_pixel(&Vector2::new(j as f64, i as f64)) else {
                continue;
            };
            min.x = min.x.min(pos.x);
            min.y = min.y.min(pos.y);
            max.x = max.x.max(pos.x);
            max.y = max.y.max(pos.y);
            converged = true;
        }
    }

    if !converged {
        return Err(UndistortError::EmptyBoundingBox);
    }
    Ok(BoundingBox { min, max })
}

/// True when `(x, y)` lies inside the bilinear sampling domain of a
/// `width` x `height` image.
fn in_sampling_domain(x: f64, y: f64, width: u32, height: u32) -> bool {
    x >= 0.0 && x <= (width - 1) as f64 && y >= 0.0 && y <= (height - 1) as f64
}

fn srgb_to_linear(v: f64) -> f32 {
    let v = v / 255.0;
    let linear = if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    };
    linear as f32
}

/// Bilinear sample of an 8-bit RGB image at a fractional position inside
/// the sampling domain.
fn sample_bilinear(source: &RgbImage, x: f64, y: f64) -> [f64; 3] {
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(source.width() - 1);
    let y1 = (y0 + 1).min(source.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = source.get_pixel(x0, y0);
    let p10 = source.get_pixel(x1, y0);
    let p01 = source.get_pixel(x0, y1);
    let p11 = source.get_pixel(x1, y1);

    let mut out = [0.0; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Resamples the source into the undistorted canvas.
///
/// Each output pixel is mapped back into the distorted source through the
/// closed-form distortion; positions outside the source stay at the black
/// background. The result is linear-light float.
pub fn undistort_image(
    camera: &PinholeCamera,
    source: &RgbImage,
    bounds: &BoundingBox,
) -> Rgb32FImage {
    let width = bounds.output_width();
    let height = bounds.output_height();
    let mut result = Rgb32FImage::new(width, height);

    for i in 0..height {
        let y = bounds.min.y + i as f64;
        for j in 0..width {
            let x = bounds.min.x + j as f64;

            let dist = camera.distort_pixel(&Vector2::new(x, y));
            if !in_sampling_domain(dist.x, dist.y, source.width(), source.height()) {
                continue;
            }

            let srgb = sample_bilinear(source, dist.x, dist.y);
            result.put_pixel(
                j,
                i,
                Rgb([
                    srgb_to_linear(srgb[0]),
                    srgb_to_linear(srgb[1]),
                    srgb_to_linear(srgb[2]),
                ]),
            );
        }
    }

    result
}

/// Writes the sampling coordinates as a normalized ST map.
///
/// Channels hold `(x / (srcW - 1), 1 - y / (srcH - 1))` of the distorted
/// sampling position; the third channel is unused and stays zero, as do
/// pixels that map outside the source. No color conversion is involved.
pub fn undistort_st_map(
    camera: &PinholeCamera,
    source_width: u32,
    source_height: u32,
    bounds: &BoundingBox,
) -> Rgb32FImage {
    let width = bounds.output_width();
    let height = bounds.output_height();
    let mut result = Rgb32FImage::new(width, height);

    for i in 0..height {
        let y = bounds.min.y + i as f64;
        for j in 0..width {
            let x = bounds.min.x + j as f64;

            let dist = camera.distort_pixel(&Vector2::new(x, y));
            if !in_sampling_domain(dist.x, dist.y, source_width, source_height) {
                continue;
            }

            let s = dist.x / (source_width - 1) as f64;
            let t = 1.0 - dist.y / (source_height - 1) as f64;
            result.put_pixel(j, i, Rgb([s as f32, t as f32, 0.0]));
        }
    }

    result
}

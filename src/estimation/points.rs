//! Round-trip-consistent point correspondences from a fitted camera.
//!
//! After the line pass the camera's closed-form map sends observed corners
//! to their undistorted positions (the line fit recovers the inverted
//! mapping). Pairing each observation with that image gives point
//! correspondences for the second fitting pass, which validates and refines
//! the inversion quality. Pairs whose round trip through the iterative
//! inverse does not land back on the observation are discarded.

use crate::board::LineWithPoints;
use crate::camera::PinholeCamera;
use crate::estimation::EstimationError;
use nalgebra::Vector2;

/// Maximum tolerated round-trip error in pixels.
const MAX_ROUND_TRIP_ERROR: f64 = 1e-3;

/// A correspondence between an observed (distorted) point and its
/// undistorted position under the fitted camera.
#[derive(Clone, Debug)]
pub struct PointPair {
    pub distorted: Vector2<f64>,
    pub undistorted: Vector2<f64>,
}

/// Derives point pairs from every observed point of the retained lines.
///
/// A pair is kept only when mapping its undistorted member back through the
/// iterative inverse reproduces the observation within
/// `MAX_ROUND_TRIP_ERROR`. Fails when no pair survives.
pub fn generate_point_pairs(
    camera: &PinholeCamera,
    lines: &[LineWithPoints],
) -> Result<Vec<PointPair>, EstimationError> {
    let mut pairs = Vec::new();

    for line in lines {
        for point in &line.points {
            // The fitted model is inverted at this stage: adding distortion
            // undistorts the observation.
            let undistorted = camera.distort_pixel(point);

            let Ok(round_trip) = camera.undistort_pixel(&undistorted) else {
                continue;
            };
            if (round_trip - point).norm() > MAX_ROUND_TRIP_ERROR {
                continue;
            }

            pairs.push(PointPair {
                distorted: *point,
                undistorted,
            });
        }
    }

    if pairs.is_empty() {
        return Err(EstimationError::NoPointPairs);
    }
    Ok(pairs)
}

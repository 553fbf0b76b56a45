//! Classic lens-distortion model with an anamorphic squeeze axis.
//!
//! Five coefficients `[delta, phi, mux, muy, q]`:
//! * `delta` - second-order radial distortion,
//! * `phi`   - asymmetry angle, the direction of the anamorphic axis,
//! * `mux`, `muy` - cylindrical squeeze along and across that axis,
//! * `q`     - fourth-order radial distortion.
//!
//! The point is rotated into the asymmetry frame, each axis is scaled by the
//! radial polynomial plus its own squeeze term, and the result is rotated
//! back. The canonical rest pose is `[0, pi/2, 0, 0, 0]`, which maps every
//! point to itself.

use nalgebra::{RealField, Vector2};

/// Applies the five-coefficient classic model to a normalized point.
pub fn distort<T: RealField>(params: &[T], p: &Vector2<T>) -> Vector2<T> {
    let delta = params[0].clone();
    let phi = params[1].clone();
    let mux = params[2].clone();
    let muy = params[3].clone();
    let q = params[4].clone();

    let cphi = phi.clone().cos();
    let sphi = phi.sin();

    // Rotate into the asymmetry frame.
    let px = cphi.clone() * p.x.clone() + sphi.clone() * p.y.clone();
    let py = cphi.clone() * p.y.clone() - sphi.clone() * p.x.clone();

    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let r4 = r2.clone() * r2.clone();
    let radial = delta * r2.clone() + q * r4;

    let sx = T::one() + radial.clone() + mux * r2.clone();
    let sy = T::one() + radial + muy * r2;

    let qx = px * sx;
    let qy = py * sy;

    // Rotate back into the sensor frame.
    Vector2::new(
        cphi.clone() * qx.clone() - sphi.clone() * qy.clone(),
        sphi * qx + cphi * qy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_rest_pose_is_identity() {
        let p = Vector2::new(0.4, -0.55);
        let q = distort(&[0.0, FRAC_PI_2, 0.0, 0.0, 0.0], &p);
        assert_relative_eq!(q.x, p.x, epsilon = 1e-14);
        assert_relative_eq!(q.y, p.y, epsilon = 1e-14);
    }

    #[test]
    fn test_pure_radial_ignores_asymmetry_angle() {
        let p = Vector2::new(0.3, 0.2);
        let a = distort(&[0.1, 0.0, 0.0, 0.0, 0.02], &p);
        let b = distort(&[0.1, 1.3, 0.0, 0.0, 0.02], &p);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
    }

    #[test]
    fn test_squeeze_follows_the_asymmetry_axis() {
        // With phi = 0 the squeeze axis is the sensor x axis.
        let p = Vector2::new(0.5, 0.0);
        let q = distort(&[0.0, 0.0, 0.2, 0.0, 0.0], &p);
        assert_relative_eq!(q.x, 0.5 * (1.0 + 0.2 * 0.25), epsilon = 1e-12);
        assert_relative_eq!(q.y, 0.0, epsilon = 1e-14);

        // A point on the perpendicular axis only sees muy.
        let p = Vector2::new(0.0, 0.5);
        let q = distort(&[0.0, 0.0, 0.2, 0.0, 0.0], &p);
        assert_relative_eq!(q.x, 0.0, epsilon = 1e-14);
        assert_relative_eq!(q.y, 0.5, epsilon = 1e-14);
    }
}

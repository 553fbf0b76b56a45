//! Anamorphic radial distortion with separate x and y polynomials.
//!
//! Four coefficients `[cx2, cy2, cx4, cy4]`. Anamorphic optics squeeze the
//! image differently along the two sensor axes, so each axis carries its own
//! second- and fourth-order radial coefficient. Seeding all four entries with
//! a single spherical `k1` estimate reduces the model to a near-isotropic
//! starting point for optimization.

use nalgebra::{RealField, Vector2};

/// Applies the four-coefficient anamorphic model to a normalized point.
pub fn distort<T: RealField>(params: &[T], p: &Vector2<T>) -> Vector2<T> {
    let cx2 = params[0].clone();
    let cy2 = params[1].clone();
    let cx4 = params[2].clone();
    let cy4 = params[3].clone();

    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let r4 = r2.clone() * r2.clone();

    let sx = T::one() + cx2 * r2.clone() + cx4 * r4.clone();
    let sy = T::one() + cy2 * r2 + cy4 * r4;

    Vector2::new(p.x.clone() * sx, p.y.clone() * sy)
}

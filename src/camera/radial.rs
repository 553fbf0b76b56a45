//! Polynomial radial distortion models.
//!
//! Both models scale a normalized image point by an even polynomial of the
//! radius. [`distort_k1`] keeps a single second-order coefficient and is the
//! model every progressive schedule can fall back to for a cheap first
//! estimate; [`distort_k3`] extends it to sixth order.
//!
//! The functions are generic over [`RealField`] so that the same expressions
//! drive both the plain `f64` camera API and the automatic differentiation
//! used by the solver residuals.

use nalgebra::{RealField, Vector2};

/// Applies single-coefficient radial distortion to a normalized point.
///
/// `params` must hold exactly one coefficient `k1`; the point is scaled by
/// `1 + k1 * r^2`.
pub fn distort_k1<T: RealField>(params: &[T], p: &Vector2<T>) -> Vector2<T> {
    let k1 = params[0].clone();

    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let scale = T::one() + k1 * r2;

    Vector2::new(p.x.clone() * scale.clone(), p.y.clone() * scale)
}

/// Applies three-coefficient radial distortion to a normalized point.
///
/// `params` must hold `[k1, k2, k3]`; the point is scaled by
/// `1 + k1 * r^2 + k2 * r^4 + k3 * r^6`.
pub fn distort_k3<T: RealField>(params: &[T], p: &Vector2<T>) -> Vector2<T> {
    let k1 = params[0].clone();
    let k2 = params[1].clone();
    let k3 = params[2].clone();

    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();

    let scale = T::one() + k1 * r2 + k2 * r4 + k3 * r6;

    Vector2::new(p.x.clone() * scale.clone(), p.y.clone() * scale)
}

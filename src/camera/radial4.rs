//! Degree-4 radial distortion with two orders of decentering.
//!
//! Six coefficients `[c2, c4, u1, v1, u3, v3]`: an even radial polynomial up
//! to fourth order plus decentering terms at second and fourth order. The
//! decentering part follows the usual tangential form, with the fourth-order
//! pair weighted by an extra `r^2`.

use nalgebra::{RealField, Vector2};

/// Applies the six-coefficient model to a normalized point.
pub fn distort<T: RealField>(params: &[T], p: &Vector2<T>) -> Vector2<T> {
    let c2 = params[0].clone();
    let c4 = params[1].clone();
    let u1 = params[2].clone();
    let v1 = params[3].clone();
    let u3 = params[4].clone();
    let v3 = params[5].clone();

    let x = p.x.clone();
    let y = p.y.clone();
    let two = T::from_f64(2.0).unwrap();

    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let r4 = r2.clone() * r2.clone();

    let radial = T::one() + c2 * r2.clone() + c4 * r4;

    // Second-order decentering.
    let tx1 = u1.clone() * (r2.clone() + two.clone() * x.clone() * x.clone())
        + two.clone() * v1.clone() * x.clone() * y.clone();
    let ty1 = two.clone() * u1 * x.clone() * y.clone()
        + v1 * (r2.clone() + two.clone() * y.clone() * y.clone());

    // Fourth-order decentering, same shape weighted by r^2.
    let tx3 = (u3.clone() * (r2.clone() + two.clone() * x.clone() * x.clone())
        + two.clone() * v3.clone() * x.clone() * y.clone())
        * r2.clone();
    let ty3 = (two.clone() * u3 * x.clone() * y.clone()
        + v3 * (r2.clone() + two * y.clone() * y.clone()))
        * r2;

    Vector2::new(x * radial.clone() + tx1 + tx3, y * radial + ty1 + ty3)
}

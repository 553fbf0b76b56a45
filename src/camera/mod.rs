//! Camera model with interchangeable parametric lens distortion.
//!
//! This module provides the [`PinholeCamera`] struct used throughout the
//! calibration pipeline together with the [`Distortion`] variants it can
//! carry:
//! - Single-coefficient radial (`RadialK1`)
//! - Three-coefficient radial (`RadialK3`)
//! - Degree-4 radial with decentering (`Radial4`)
//! - Anamorphic degree-4 (`Anamorphic4`)
//! - Classic LD with asymmetry angle (`ClassicLd`)
//!
//! Every variant exposes the same two pixel-space maps: a closed-form
//! distortion and an iteratively inverted undistortion. The closed-form
//! direction is written generically over [`RealField`] so the optimization
//! residuals can differentiate through it.

pub mod anamorphic;
pub mod classic_ld;
pub mod radial;
pub mod radial4;

use nalgebra::{Matrix2, RealField, Vector2};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Expected {expected} distortion parameters, got {got}")]
    ParameterCountMismatch { expected: usize, got: usize },
    #[error("Undistortion did not converge at ({x}, {y})")]
    UndistortionDiverged { x: f64, y: f64 },
}

/// Identifies a distortion model without carrying its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistortionKind {
    /// No distortion; a plain pinhole projection.
    None,
    RadialK1,
    RadialK3,
    Radial4,
    Anamorphic4,
    ClassicLd,
}

impl DistortionKind {
    /// Number of distortion coefficients the variant carries.
    pub fn coefficient_count(self) -> usize {
        match self {
            DistortionKind::None => 0,
            DistortionKind::RadialK1 => 1,
            DistortionKind::RadialK3 => 3,
            DistortionKind::Radial4 => 6,
            DistortionKind::Anamorphic4 => 4,
            DistortionKind::ClassicLd => 5,
        }
    }
}

/// Distortion parameters, one fixed-arity array per model variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", content = "params", rename_all = "snake_case")]
pub enum Distortion {
    None,
    RadialK1([f64; 1]),
    RadialK3([f64; 3]),
    Radial4([f64; 6]),
    Anamorphic4([f64; 4]),
    ClassicLd([f64; 5]),
}

impl Distortion {
    pub fn kind(&self) -> DistortionKind {
        match self {
            Distortion::None => DistortionKind::None,
            Distortion::RadialK1(_) => DistortionKind::RadialK1,
            Distortion::RadialK3(_) => DistortionKind::RadialK3,
            Distortion::Radial4(_) => DistortionKind::Radial4,
            Distortion::Anamorphic4(_) => DistortionKind::Anamorphic4,
            Distortion::ClassicLd(_) => DistortionKind::ClassicLd,
        }
    }

    /// The coefficients as a slice, empty for [`Distortion::None`].
    pub fn params(&self) -> &[f64] {
        match self {
            Distortion::None => &[],
            Distortion::RadialK1(p) => p,
            Distortion::RadialK3(p) => p,
            Distortion::Radial4(p) => p,
            Distortion::Anamorphic4(p) => p,
            Distortion::ClassicLd(p) => p,
        }
    }

    fn params_mut(&mut self) -> &mut [f64] {
        match self {
            Distortion::None => &mut [],
            Distortion::RadialK1(p) => p,
            Distortion::RadialK3(p) => p,
            Distortion::Radial4(p) => p,
            Distortion::Anamorphic4(p) => p,
            Distortion::ClassicLd(p) => p,
        }
    }

    /// Builds a zero-initialized parameter set for the given variant.
    pub fn zeroed(kind: DistortionKind) -> Self {
        match kind {
            DistortionKind::None => Distortion::None,
            DistortionKind::RadialK1 => Distortion::RadialK1([0.0; 1]),
            DistortionKind::RadialK3 => Distortion::RadialK3([0.0; 3]),
            DistortionKind::Radial4 => Distortion::Radial4([0.0; 6]),
            DistortionKind::Anamorphic4 => Distortion::Anamorphic4([0.0; 4]),
            DistortionKind::ClassicLd => Distortion::ClassicLd([0.0; 5]),
        }
    }
}

/// Applies the distortion identified by `kind` to a normalized image point.
///
/// `params` must have the variant's arity; the camera API guarantees this,
/// and the solver residuals pass through parameter blocks of the same size.
pub fn distort_normalized<T: RealField>(
    kind: DistortionKind,
    params: &[T],
    p: &Vector2<T>,
) -> Vector2<T> {
    match kind {
        DistortionKind::None => p.clone(),
        DistortionKind::RadialK1 => radial::distort_k1(params, p),
        DistortionKind::RadialK3 => radial::distort_k3(params, p),
        DistortionKind::Radial4 => radial4::distort(params, p),
        DistortionKind::Anamorphic4 => anamorphic::distort(params, p),
        DistortionKind::ClassicLd => classic_ld::distort(params, p),
    }
}

/// A pinhole camera with parametric lens distortion.
///
/// `scale` and `offset` play the role of focal lengths and principal point.
/// The calibration pipeline works in a normalized frame where the scale is
/// the image half-diagonal on both axes and the offset is the image center;
/// see [`PinholeCamera::normalize_frame`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    pub scale: Vector2<f64>,
    pub offset: Vector2<f64>,
    pub distortion: Distortion,
}

impl PinholeCamera {
    pub fn new(
        width: u32,
        height: u32,
        scale: Vector2<f64>,
        offset: Vector2<f64>,
        distortion: Distortion,
    ) -> Result<Self, CameraModelError> {
        let camera = PinholeCamera {
            width,
            height,
            scale,
            offset,
            distortion,
        };
        camera.validate_params()?;
        Ok(camera)
    }

    pub fn kind(&self) -> DistortionKind {
        self.distortion.kind()
    }

    /// The distortion coefficients of the active variant.
    pub fn params(&self) -> &[f64] {
        self.distortion.params()
    }

    /// Overwrites the distortion coefficients.
    ///
    /// Fails with [`CameraModelError::ParameterCountMismatch`] when the slice
    /// length does not match the active variant's arity.
    pub fn set_params(&mut self, params: &[f64]) -> Result<(), CameraModelError> {
        let expected = self.kind().coefficient_count();
        if params.len() != expected {
            return Err(CameraModelError::ParameterCountMismatch {
                expected,
                got: params.len(),
            });
        }
        self.distortion.params_mut().copy_from_slice(params);
        Ok(())
    }

    /// Forces the normalized calibration frame for the given image size:
    /// scale = half-diagonal on both axes, offset = image center.
    pub fn normalize_frame(&mut self, width: u32, height: u32) {
        let hw = width as f64 / 2.0;
        let hh = height as f64 / 2.0;
        let d = (hw * hw + hh * hh).sqrt();

        self.width = width;
        self.height = height;
        self.scale = Vector2::new(d, d);
        self.offset = Vector2::new(hw, hh);
    }

    /// Pixel coordinates to normalized image coordinates.
    pub fn ima2cam(&self, p: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            (p.x - self.offset.x) / self.scale.x,
            (p.y - self.offset.y) / self.scale.y,
        )
    }

    /// Normalized image coordinates to pixel coordinates.
    pub fn cam2ima(&self, p: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            p.x * self.scale.x + self.offset.x,
            p.y * self.scale.y + self.offset.y,
        )
    }

    /// Closed-form distortion in pixel space.
    pub fn distort_pixel(&self, p: &Vector2<f64>) -> Vector2<f64> {
        let n = self.ima2cam(p);
        let d = distort_normalized(self.kind(), self.params(), &n);
        self.cam2ima(&d)
    }

    /// Inverts [`PinholeCamera::distort_pixel`] by Newton iteration.
    ///
    /// The Jacobian is evaluated by central differences, which keeps a single
    /// implementation valid for all distortion variants. Returns
    /// [`CameraModelError::UndistortionDiverged`] when the iteration does not
    /// settle or the Jacobian becomes singular.
    pub fn undistort_pixel(&self, p: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        const EPS: f64 = 1e-8;
        const STEP: f64 = 1e-4;
        const MAX_ITERATIONS: u32 = 100;

        let mut point = *p;

        for _ in 0..MAX_ITERATIONS {
            let error = self.distort_pixel(&point) - p;
            if error.norm() < EPS {
                return Ok(point);
            }

            let dx = (self.distort_pixel(&Vector2::new(point.x + STEP, point.y))
                - self.distort_pixel(&Vector2::new(point.x - STEP, point.y)))
                / (2.0 * STEP);
            let dy = (self.distort_pixel(&Vector2::new(point.x, point.y + STEP))
                - self.distort_pixel(&Vector2::new(point.x, point.y - STEP)))
                / (2.0 * STEP);

            let jacobian = Matrix2::new(dx.x, dy.x, dx.y, dy.y);
            let Some(inverse) = jacobian.try_inverse() else {
                return Err(CameraModelError::UndistortionDiverged { x: p.x, y: p.y });
            };

            let delta = inverse * error;
            point -= delta;

            if delta.norm() < EPS {
                return Ok(point);
            }
        }

        Err(CameraModelError::UndistortionDiverged { x: p.x, y: p.y })
    }

    /// Validates the pinhole part of the parameters.
    pub fn validate_params(&self) -> Result<(), CameraModelError> {
        if self.scale.x <= 0.0 || self.scale.y <= 0.0 {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !self.offset.x.is_finite() || !self.offset.y.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn normalized_camera(distortion: Distortion) -> PinholeCamera {
        let mut camera = PinholeCamera {
            width: 0,
            height: 0,
            scale: Vector2::new(1.0, 1.0),
            offset: Vector2::new(0.0, 0.0),
            distortion,
        };
        camera.normalize_frame(1920, 1080);
        camera
    }

    #[test]
    fn test_normalize_frame() {
        let camera = normalized_camera(Distortion::None);
        let d = (960.0_f64 * 960.0 + 540.0 * 540.0).sqrt();
        assert_relative_eq!(camera.scale.x, d, epsilon = 1e-12);
        assert_relative_eq!(camera.scale.y, d, epsilon = 1e-12);
        assert_relative_eq!(camera.offset.x, 960.0, epsilon = 1e-12);
        assert_relative_eq!(camera.offset.y, 540.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pixel_maps_are_identity_without_distortion() {
        let camera = normalized_camera(Distortion::None);
        let p = Vector2::new(123.0, 456.0);
        let d = camera.distort_pixel(&p);
        assert_relative_eq!(d.x, p.x, epsilon = 1e-9);
        assert_relative_eq!(d.y, p.y, epsilon = 1e-9);
        let u = camera.undistort_pixel(&p).unwrap();
        assert_relative_eq!(u.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(u.y, p.y, epsilon = 1e-6);
    }

    #[test]
    fn test_distort_undistort_round_trip() {
        let cameras = [
            normalized_camera(Distortion::RadialK1([-0.08])),
            normalized_camera(Distortion::RadialK3([0.05, -0.01, 0.002])),
            normalized_camera(Distortion::Radial4([0.04, -0.008, 0.001, -0.002, 0.0, 0.0])),
            normalized_camera(Distortion::Anamorphic4([0.03, 0.05, -0.004, -0.006])),
            normalized_camera(Distortion::ClassicLd([0.06, FRAC_PI_2, 0.01, -0.01, -0.003])),
        ];

        for camera in &cameras {
            for &(x, y) in &[(200.0, 150.0), (960.0, 540.0), (1700.0, 900.0)] {
                let p = Vector2::new(x, y);
                let distorted = camera.distort_pixel(&p);
                let recovered = camera.undistort_pixel(&distorted).unwrap();
                assert_relative_eq!(recovered.x, p.x, epsilon = 1e-5);
                assert_relative_eq!(recovered.y, p.y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_set_params_checks_arity() {
        let mut camera = normalized_camera(Distortion::RadialK3([0.0; 3]));
        assert!(camera.set_params(&[0.1, 0.2, 0.3]).is_ok());
        assert!(matches!(
            camera.set_params(&[0.1]),
            Err(CameraModelError::ParameterCountMismatch { expected: 3, got: 1 })
        ));
    }

    #[test]
    fn test_validate_params_rejects_bad_scale() {
        let camera = PinholeCamera {
            width: 100,
            height: 100,
            scale: Vector2::new(-1.0, 1.0),
            offset: Vector2::new(50.0, 50.0),
            distortion: Distortion::None,
        };
        assert!(matches!(
            camera.validate_params(),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
    }

    #[test]
    fn test_camera_serde_round_trip() {
        let camera = normalized_camera(Distortion::Anamorphic4([0.1, 0.2, 0.3, 0.4]));
        let json = serde_json::to_string(&camera).unwrap();
        let back: PinholeCamera = serde_json::from_str(&json).unwrap();
        assert_eq!(back.distortion, camera.distortion);
        assert_eq!(back.width, camera.width);
        assert_relative_eq!(back.scale.x, camera.scale.x, epsilon = 1e-15);
    }
}

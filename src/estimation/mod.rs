//! Constrained distortion estimation on top of the `tiny_solver` framework.
//!
//! The entry point is [`estimate`]: one constrained Levenberg-Marquardt solve
//! over the camera's scale, offset and distortion coefficients, plus the
//! per-line `(angle, dist)` parameters when the observations are
//! correspondence lines. Which parameters take part in a solve is controlled
//! by two flags and a per-coefficient [`LockMask`]; locked entries are pinned
//! with `Problem::fix_variable` so the solver never moves them.
//!
//! The progressive schedules that chain these solves live in [`fitter`];
//! [`points`] derives round-trip-consistent point correspondences from a
//! fitted camera.

pub mod fitter;
pub mod points;

pub use fitter::fit_distortion;
pub use points::{generate_point_pairs, PointPair};

use crate::board::LineWithPoints;
use crate::camera::{distort_normalized, CameraModelError, DistortionKind, PinholeCamera};
use nalgebra::{DVector, RealField, Vector2};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer, Problem};

#[derive(thiserror::Error, Debug)]
pub enum EstimationError {
    #[error("Camera distortion model is incompatible with calibration")]
    IncompatibleModel,
    #[error("Lock mask has {got} entries, the model has {expected} coefficients")]
    LockMaskMismatch { expected: usize, got: usize },
    #[error("No observations to estimate from")]
    NoObservations,
    #[error("No point pair survived the round-trip filter")]
    NoPointPairs,
    #[error("Optimization failed to converge")]
    SolverFailed,
    #[error(transparent)]
    Camera(#[from] CameraModelError),
}

/// Residual statistics of the most recent successful solve, in pixels.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl Statistics {
    fn from_errors(errors: &[f64]) -> Statistics {
        if errors.is_empty() {
            return Statistics::default();
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("residuals are finite"));
        let median = if sorted.len() % 2 == 0 {
            let mid = sorted.len() / 2;
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[sorted.len() / 2]
        };

        Statistics {
            mean,
            stddev: variance.sqrt(),
            median,
        }
    }
}

/// Per-coefficient lock flags, validated against the model arity.
#[derive(Clone, Debug)]
pub struct LockMask {
    locks: Vec<bool>,
}

impl LockMask {
    /// Builds a mask for the given variant; `true` holds a coefficient
    /// fixed. Fails unless `locks` has exactly one entry per coefficient.
    pub fn new(kind: DistortionKind, locks: &[bool]) -> Result<Self, EstimationError> {
        let expected = kind.coefficient_count();
        if locks.len() != expected {
            return Err(EstimationError::LockMaskMismatch {
                expected,
                got: locks.len(),
            });
        }
        Ok(LockMask {
            locks: locks.to_vec(),
        })
    }

    pub fn all_locked(kind: DistortionKind) -> Self {
        LockMask {
            locks: vec![true; kind.coefficient_count()],
        }
    }

    pub fn all_free(kind: DistortionKind) -> Self {
        LockMask {
            locks: vec![false; kind.coefficient_count()],
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.locks.iter().copied()
    }
}

/// Observation set for one solve: correspondence lines (whose parameters
/// are refined in place) or point pairs.
pub enum Observations<'a> {
    Lines(&'a mut [LineWithPoints]),
    Points(&'a [PointPair]),
}

impl Observations<'_> {
    pub fn is_empty(&self) -> bool {
        match self {
            Observations::Lines(lines) => lines.is_empty(),
            Observations::Points(pairs) => pairs.is_empty(),
        }
    }
}

/// Applies the camera mapping with solver-managed parameter blocks.
fn distort_pixel_generic<T: RealField>(
    kind: DistortionKind,
    scale: &DVector<T>,
    offset: &DVector<T>,
    distortion: &DVector<T>,
    p: &Vector2<T>,
) -> Vector2<T> {
    let nx = (p.x.clone() - offset[0].clone()) / scale[0].clone();
    let ny = (p.y.clone() - offset[1].clone()) / scale[1].clone();
    let d = distort_normalized(kind, distortion.as_slice(), &Vector2::new(nx, ny));
    Vector2::new(
        d.x.clone() * scale[0].clone() + offset[0].clone(),
        d.y.clone() * scale[1].clone() + offset[1].clone(),
    )
}

/// Distance of the mapped line points from their line, one residual per
/// point. Parameter blocks: `[scale, offset, distortion, line]`.
#[derive(Clone, Debug)]
struct LineCost {
    kind: DistortionKind,
    points: Vec<Vector2<f64>>,
}

impl<T: RealField> Factor<T> for LineCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let scale = &params[0];
        let offset = &params[1];
        let distortion = &params[2];
        let line = &params[3];

        let angle = line[0].clone();
        let dist = line[1].clone();
        let ca = angle.clone().cos();
        let sa = angle.sin();

        let mut residuals = DVector::zeros(self.points.len());
        for (i, pt) in self.points.iter().enumerate() {
            let p = Vector2::new(
                T::from_f64(pt.x).unwrap(),
                T::from_f64(pt.y).unwrap(),
            );
            let u = distort_pixel_generic(self.kind, scale, offset, distortion, &p);
            residuals[i] = ca.clone() * u.x.clone() + sa.clone() * u.y.clone() - dist.clone();
        }
        residuals
    }
}

/// Reprojection of the undistorted member of each pair onto its distorted
/// observation, two residuals per pair. Parameter blocks:
/// `[scale, offset, distortion]`.
#[derive(Clone, Debug)]
struct PointCost {
    kind: DistortionKind,
    pairs: Vec<PointPair>,
}

impl<T: RealField> Factor<T> for PointCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let scale = &params[0];
        let offset = &params[1];
        let distortion = &params[2];

        let mut residuals = DVector::zeros(self.pairs.len() * 2);
        for (i, pair) in self.pairs.iter().enumerate() {
            let p = Vector2::new(
                T::from_f64(pair.undistorted.x).unwrap(),
                T::from_f64(pair.undistorted.y).unwrap(),
            );
            let d = distort_pixel_generic(self.kind, scale, offset, distortion, &p);
            residuals[2 * i] = d.x.clone() - T::from_f64(pair.distorted.x).unwrap();
            residuals[2 * i + 1] = d.y.clone() - T::from_f64(pair.distorted.y).unwrap();
        }
        residuals
    }
}

/// Runs one constrained solve and updates `camera`, `statistics` and the
/// line parameters in place.
///
/// `lock_scale` pins the focal scale to the current (normalized) value,
/// `lock_center` pins the principal point, and `locks` pins individual
/// distortion coefficients. Per-line parameters are nuisance parameters and
/// are always free. A solve in which every parameter is fixed skips the
/// solver and only refreshes the statistics.
pub fn estimate(
    camera: &mut PinholeCamera,
    statistics: &mut Statistics,
    observations: &mut Observations<'_>,
    lock_scale: bool,
    lock_center: bool,
    locks: &LockMask,
) -> Result<(), EstimationError> {
    let kind = camera.kind();
    if kind == DistortionKind::None {
        return Err(EstimationError::IncompatibleModel);
    }
    if locks.len() != kind.coefficient_count() {
        return Err(EstimationError::LockMaskMismatch {
            expected: kind.coefficient_count(),
            got: locks.len(),
        });
    }
    if observations.is_empty() {
        return Err(EstimationError::NoObservations);
    }

    let camera_fully_locked = lock_scale && lock_center && locks.iter().all(|l| l);
    let has_line_parameters = matches!(observations, Observations::Lines(_));

    if !camera_fully_locked || has_line_parameters {
        solve(camera, observations, lock_scale, lock_center, locks)?;
    }

    *statistics = compute_statistics(camera, observations);
    Ok(())
}

fn solve(
    camera: &mut PinholeCamera,
    observations: &mut Observations<'_>,
    lock_scale: bool,
    lock_center: bool,
    locks: &LockMask,
) -> Result<(), EstimationError> {
    let kind = camera.kind();

    let mut problem = Problem::new();
    let mut initial = HashMap::new();
    initial.insert(
        "scale".to_string(),
        DVector::from_vec(vec![camera.scale.x, camera.scale.y]),
    );
    initial.insert(
        "offset".to_string(),
        DVector::from_vec(vec![camera.offset.x, camera.offset.y]),
    );
    initial.insert(
        "distortion".to_string(),
        DVector::from_vec(camera.params().to_vec()),
    );

    match &*observations {
        Observations::Lines(lines) => {
            for (i, line) in lines.iter().enumerate() {
                let key = format!("line_{i}");
                initial.insert(key.clone(), DVector::from_vec(vec![line.angle, line.dist]));
                problem.add_residual_block(
                    line.points.len(),
                    &["scale", "offset", "distortion", key.as_str()],
                    Box::new(LineCost {
                        kind,
                        points: line.points.clone(),
                    }),
                    None,
                );
            }
        }
        Observations::Points(pairs) => {
            problem.add_residual_block(
                pairs.len() * 2,
                &["scale", "offset", "distortion"],
                Box::new(PointCost {
                    kind,
                    pairs: pairs.to_vec(),
                }),
                None,
            );
        }
    }

    if lock_scale {
        problem.fix_variable("scale", 0);
        problem.fix_variable("scale", 1);
    }
    if lock_center {
        problem.fix_variable("offset", 0);
        problem.fix_variable("offset", 1);
    }
    for (i, locked) in locks.iter().enumerate() {
        if locked {
            problem.fix_variable("distortion", i);
        }
    }

    let optimizer = LevenbergMarquardtOptimizer::default();
    let solution = optimizer
        .optimize(&problem, &initial, None)
        .ok_or(EstimationError::SolverFailed)?;

    let scale = solution.get("scale").ok_or(EstimationError::SolverFailed)?;
    camera.scale = Vector2::new(scale[0], scale[1]);
    let offset = solution.get("offset").ok_or(EstimationError::SolverFailed)?;
    camera.offset = Vector2::new(offset[0], offset[1]);
    let distortion = solution
        .get("distortion")
        .ok_or(EstimationError::SolverFailed)?;
    camera.set_params(distortion.as_slice())?;

    if let Observations::Lines(lines) = observations {
        for (i, line) in lines.iter_mut().enumerate() {
            let block = solution
                .get(&format!("line_{i}"))
                .ok_or(EstimationError::SolverFailed)?;
            line.angle = block[0];
            line.dist = block[1];
        }
    }

    camera.validate_params()?;
    Ok(())
}

/// Residual magnitudes in pixels for the current camera and observation
/// parameters.
fn compute_statistics(camera: &PinholeCamera, observations: &Observations<'_>) -> Statistics {
    let mut errors = Vec::new();

    match observations {
        Observations::Lines(lines) => {
            for line in lines.iter() {
                let ca = line.angle.cos();
                let sa = line.angle.sin();
                for pt in &line.points {
                    let u = camera.distort_pixel(pt);
                    errors.push((ca * u.x + sa * u.y - line.dist).abs());
                }
            }
        }
        Observations::Points(pairs) => {
            for pair in pairs.iter() {
                errors.push((camera.distort_pixel(&pair.undistorted) - pair.distorted).norm());
            }
        }
    }

    Statistics::from_errors(&errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Distortion;
    use approx::assert_relative_eq;

    fn normalized_camera(distortion: Distortion) -> PinholeCamera {
        let mut camera = PinholeCamera {
            width: 0,
            height: 0,
            scale: Vector2::new(1.0, 1.0),
            offset: Vector2::new(0.0, 0.0),
            distortion,
        };
        camera.normalize_frame(2000, 1500);
        camera
    }

    /// Straight grid lines spanning a 2000x1500 image, 20 points each.
    fn straight_lines() -> Vec<LineWithPoints> {
        let mut lines = Vec::new();
        for r in 0..12 {
            let y = 100.0 + r as f64 * 120.0;
            let mut line = LineWithPoints {
                horizontal: true,
                index: r,
                angle: std::f64::consts::FRAC_PI_4,
                dist: 1.0,
                points: Vec::new(),
            };
            for c in 0..20 {
                line.points.push(Vector2::new(50.0 + c as f64 * 100.0, y));
            }
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_lock_mask_arity_is_enforced() {
        assert!(LockMask::new(DistortionKind::RadialK3, &[true, false, true]).is_ok());
        assert!(matches!(
            LockMask::new(DistortionKind::RadialK3, &[true]),
            Err(EstimationError::LockMaskMismatch { expected: 3, got: 1 })
        ));

        let mut camera = normalized_camera(Distortion::RadialK3([0.0; 3]));
        let mut stats = Statistics::default();
        let wrong = LockMask::all_free(DistortionKind::RadialK1);
        let mut lines = straight_lines();
        let result = estimate(
            &mut camera,
            &mut stats,
            &mut Observations::Lines(&mut lines),
            true,
            true,
            &wrong,
        );
        assert!(matches!(
            result,
            Err(EstimationError::LockMaskMismatch { expected: 3, got: 1 })
        ));
    }

    #[test]
    fn test_estimate_rejects_undistorted_model() {
        let mut camera = normalized_camera(Distortion::None);
        let mut stats = Statistics::default();
        let mut lines = straight_lines();
        let result = estimate(
            &mut camera,
            &mut stats,
            &mut Observations::Lines(&mut lines),
            true,
            true,
            &LockMask::all_locked(DistortionKind::None),
        );
        assert!(matches!(result, Err(EstimationError::IncompatibleModel)));
    }

    #[test]
    fn test_estimate_rejects_empty_observations() {
        let mut camera = normalized_camera(Distortion::RadialK1([0.0]));
        let mut stats = Statistics::default();
        let result = estimate(
            &mut camera,
            &mut stats,
            &mut Observations::Points(&[]),
            true,
            true,
            &LockMask::all_locked(DistortionKind::RadialK1),
        );
        assert!(matches!(result, Err(EstimationError::NoObservations)));
    }

    #[test]
    fn test_line_only_solve_recovers_line_parameters() {
        let mut camera = normalized_camera(Distortion::RadialK1([0.0]));
        let mut stats = Statistics::default();
        let mut lines = straight_lines();

        // Camera fully locked: the solve only refines the line parameters
        // away from their arbitrary seed.
        estimate(
            &mut camera,
            &mut stats,
            &mut Observations::Lines(&mut lines),
            true,
            true,
            &LockMask::all_locked(DistortionKind::RadialK1),
        )
        .unwrap();

        // Horizontal rows obey sin(angle) * y = dist.
        for line in &lines {
            let y = line.points[0].y;
            assert!(line.angle.sin().abs() > 0.9999, "angle off: {}", line.angle);
            assert!((line.angle.sin() * y - line.dist).abs() < 1e-2);
        }
        assert!(stats.mean < 1e-2, "mean error too high: {}", stats.mean);
    }

    #[test]
    fn test_fully_locked_point_solve_only_reports_statistics() {
        let camera = normalized_camera(Distortion::RadialK1([0.02]));
        let pairs: Vec<PointPair> = (0..30)
            .map(|i| {
                let p = Vector2::new(100.0 + 50.0 * i as f64, 700.0);
                PointPair {
                    distorted: camera.distort_pixel(&p),
                    undistorted: p,
                }
            })
            .collect();

        let mut fitted = camera.clone();
        let mut stats = Statistics::default();
        estimate(
            &mut fitted,
            &mut stats,
            &mut Observations::Points(&pairs),
            true,
            true,
            &LockMask::all_locked(DistortionKind::RadialK1),
        )
        .unwrap();

        // Parameters untouched, statistics reflect a perfect fit.
        assert_relative_eq!(fitted.params()[0], 0.02, epsilon = 1e-15);
        assert!(stats.mean < 1e-9);
        assert!(stats.median < 1e-9);
    }

    #[test]
    fn test_point_solve_recovers_distortion() {
        let truth = normalized_camera(Distortion::RadialK1([-0.05]));
        let mut pairs = Vec::new();
        for i in 0..15 {
            for j in 0..20 {
                let p = Vector2::new(60.0 + j as f64 * 100.0, 60.0 + i as f64 * 100.0);
                pairs.push(PointPair {
                    distorted: truth.distort_pixel(&p),
                    undistorted: p,
                });
            }
        }

        let mut camera = normalized_camera(Distortion::RadialK1([0.0]));
        let mut stats = Statistics::default();
        estimate(
            &mut camera,
            &mut stats,
            &mut Observations::Points(&pairs),
            true,
            true,
            &LockMask::all_free(DistortionKind::RadialK1),
        )
        .unwrap();

        assert_relative_eq!(camera.params()[0], -0.05, epsilon = 1e-4);
        assert!(stats.stddev < 1e-3);
    }
}

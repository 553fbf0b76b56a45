//! Progressive, per-model fitting schedules.
//!
//! Fitting all distortion coefficients at once from a cold start tends to
//! diverge, so every model variant runs a fixed hand-tuned sequence of
//! constrained solves that unlocks parameters progressively: first only the
//! per-line parameters, then the leading radial coefficient, then the
//! principal point, then the remaining coefficients. Each stage starts from
//! the previous stage's camera state.
//!
//! A failed stage aborts the whole fit immediately. There is no rollback:
//! the camera keeps whatever the last successful stage produced, and the
//! statistics describe that stage.

use crate::camera::{Distortion, DistortionKind, PinholeCamera};
use crate::estimation::{estimate, EstimationError, LockMask, Observations, Statistics};
use log::debug;
use std::f64::consts::FRAC_PI_2;

/// One entry of a fitting schedule. The focal scale stays locked in every
/// stage to preserve the normalized calibration frame.
struct Stage {
    lock_center: bool,
    locks: &'static [bool],
}

const RADIAL_K1_SCHEDULE: &[Stage] = &[
    // Lines only.
    Stage { lock_center: true, locks: &[true] },
    // Relax the distortion coefficient.
    Stage { lock_center: true, locks: &[false] },
    // Relax the principal point.
    Stage { lock_center: false, locks: &[false] },
];

const RADIAL_K3_SCHEDULE: &[Stage] = &[
    Stage { lock_center: true, locks: &[true, true, true] },
    Stage { lock_center: true, locks: &[false, true, true] },
    Stage { lock_center: false, locks: &[false, true, true] },
    Stage { lock_center: false, locks: &[false, false, false] },
];

const RADIAL4_SCHEDULE: &[Stage] = &[
    Stage { lock_center: true, locks: &[true; 6] },
    Stage { lock_center: true, locks: &[false, true, true, true, true, true] },
    Stage { lock_center: false, locks: &[false, true, true, true, true, true] },
    Stage { lock_center: false, locks: &[false; 6] },
];

const CLASSIC_LD_SCHEDULE: &[Stage] = &[
    Stage { lock_center: true, locks: &[true; 5] },
    Stage { lock_center: true, locks: &[false, true, true, true, true] },
    Stage { lock_center: false, locks: &[false, true, true, true, true] },
    // The asymmetry angle and the quartic term stay pinned while the
    // squeeze coefficients settle.
    Stage { lock_center: false, locks: &[false, true, false, false, true] },
    Stage { lock_center: false, locks: &[false; 5] },
];

/// Fits the camera's distortion coefficients with the schedule of its
/// variant.
///
/// Works for line observations (first calibration pass) and point pairs
/// (inversion-validation pass) alike. Returns
/// [`EstimationError::IncompatibleModel`] for a camera without a distortion
/// model.
pub fn fit_distortion(
    camera: &mut PinholeCamera,
    statistics: &mut Statistics,
    observations: &mut Observations<'_>,
) -> Result<(), EstimationError> {
    match camera.kind() {
        DistortionKind::None => Err(EstimationError::IncompatibleModel),
        DistortionKind::RadialK1 => run_schedule(camera, statistics, observations, RADIAL_K1_SCHEDULE),
        DistortionKind::RadialK3 => run_schedule(camera, statistics, observations, RADIAL_K3_SCHEDULE),
        DistortionKind::Radial4 => run_schedule(camera, statistics, observations, RADIAL4_SCHEDULE),
        DistortionKind::Anamorphic4 => fit_anamorphic4(camera, statistics, observations),
        DistortionKind::ClassicLd => {
            // Canonical rest pose; the asymmetry angle starts perpendicular.
            camera.set_params(&[0.0, FRAC_PI_2, 0.0, 0.0, 0.0])?;
            run_schedule(camera, statistics, observations, CLASSIC_LD_SCHEDULE)
        }
    }
}

fn run_schedule(
    camera: &mut PinholeCamera,
    statistics: &mut Statistics,
    observations: &mut Observations<'_>,
    schedule: &[Stage],
) -> Result<(), EstimationError> {
    for (index, stage) in schedule.iter().enumerate() {
        let locks = LockMask::new(camera.kind(), stage.locks)?;
        estimate(
            camera,
            statistics,
            observations,
            true,
            stage.lock_center,
            &locks,
        )?;
        debug!(
            "stage {}/{}: mean {:.6} stddev {:.6}",
            index + 1,
            schedule.len(),
            statistics.mean,
            statistics.stddev
        );
    }
    Ok(())
}

/// Runs the full single-coefficient fit on an auxiliary camera sharing the
/// frame, then seeds all four anamorphic coefficients with the recovered
/// value. Returns that value.
pub fn warm_start_anamorphic4(
    camera: &mut PinholeCamera,
    statistics: &mut Statistics,
    observations: &mut Observations<'_>,
) -> Result<f64, EstimationError> {
    let mut simple = PinholeCamera {
        width: camera.width,
        height: camera.height,
        scale: camera.scale,
        offset: camera.offset,
        distortion: Distortion::RadialK1([0.0]),
    };
    run_schedule(&mut simple, statistics, observations, RADIAL_K1_SCHEDULE)?;

    let k1 = simple.params()[0];
    camera.set_params(&[k1, k1, k1, k1])?;
    Ok(k1)
}

fn fit_anamorphic4(
    camera: &mut PinholeCamera,
    statistics: &mut Statistics,
    observations: &mut Observations<'_>,
) -> Result<(), EstimationError> {
    warm_start_anamorphic4(camera, statistics, observations)?;

    let locks = LockMask::all_free(DistortionKind::Anamorphic4);
    estimate(camera, statistics, observations, true, false, &locks)
}

//! Distortion Tools Library
//!
//! A Rust library for checkerboard-based lens distortion calibration.
//! One view at a time, the pipeline:
//! - extracts and topologically validates checkerboard correspondence lines,
//! - fits a parametric distortion model with a progressive, per-model
//!   schedule of constrained solves,
//! - derives forward/inverse-consistent point pairs and refits against them
//!   to validate the inversion,
//! - produces an undistorted raster and an ST map from a dense remapping.
//!
//! Supported distortion models: single- and three-coefficient radial,
//! degree-4 radial with decentering, anamorphic degree-4, and the classic
//! LD model with an asymmetry angle. The nonlinear solves run on the
//! tiny-solver optimization framework.

pub mod board;
pub mod camera;
pub mod dataset;
pub mod detect;
pub mod estimation;
pub mod pipeline;
pub mod undistort;

// Re-export commonly used types
pub use camera::{CameraModelError, Distortion, DistortionKind, PinholeCamera};

pub use board::{
    build_lines, Board, BoardAssembler, BoardExtractor, Corner, CornerDetector, ExtractError,
    Extraction, LineWithPoints,
};

pub use estimation::{
    estimate, fit_distortion, generate_point_pairs, EstimationError, LockMask, Observations,
    PointPair, Statistics,
};

pub use undistort::{
    compute_bounding_box, undistort_image, undistort_st_map, BoundingBox, UndistortError,
};

pub use dataset::{DatasetError, SceneDataset, View};

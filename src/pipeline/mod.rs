//! The per-view calibration pipeline.
//!
//! For every view of the scene dataset: read and aspect-correct the image,
//! extract the checkerboard lines, run the progressive fit against them,
//! derive round-trip point pairs, run the fit a second time against the
//! pairs to validate the inversion, and write the undistorted raster plus
//! the ST map. A failing view is logged and skipped; only dataset load and
//! save failures abort the run.

use crate::board::{build_lines, BoardAssembler, BoardExtractor, CornerDetector, ExtractError};
use crate::dataset::{DatasetError, SceneDataset, View};
use crate::detect::{ChessCornerDetector, GridBoardAssembler};
use crate::estimation::{
    fit_distortion, generate_point_pairs, EstimationError, Observations, Statistics,
};
use crate::undistort::{compute_bounding_box, undistort_image, undistort_st_map, UndistortError};
use image::imageops::FilterType;
use image::RgbImage;
use log::{error, info};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A per-view failure; the run continues with the next view.
#[derive(thiserror::Error, Debug)]
pub enum ViewError {
    #[error("Failed to read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to write image {path}: {source}")]
    WriteImage {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
}

/// Runs the calibration over the whole dataset with the default detector
/// and assembler.
///
/// `output` names the dataset document to write; the per-view rasters are
/// placed in its directory.
pub fn run(input: &Path, output: &Path) -> Result<(), PipelineError> {
    let extractor = BoardExtractor::new(
        ChessCornerDetector::default(),
        GridBoardAssembler::default(),
    );
    run_with(input, output, &extractor)
}

/// Like [`run`], with caller-provided extraction collaborators.
pub fn run_with<D: CornerDetector, A: BoardAssembler>(
    input: &Path,
    output: &Path,
    extractor: &BoardExtractor<D, A>,
) -> Result<(), PipelineError> {
    let mut dataset = SceneDataset::load(input)?;

    let output_dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&output_dir).map_err(|source| PipelineError::OutputDir {
        path: output_dir.clone(),
        source,
    })?;

    for (index, view) in dataset.views.iter_mut().enumerate() {
        info!("Processing view {} ({})", index, view.image.display());
        if let Err(e) = process_view(view, &output_dir, extractor) {
            error!("Skipping view {index}: {e}");
        }
    }

    dataset.save(output)?;
    Ok(())
}

/// Calibrates one view and writes its output rasters.
///
/// On success the fitted camera is stored back into the view; on failure the
/// camera keeps whatever the last successful fitting stage produced.
pub fn process_view<D: CornerDetector, A: BoardAssembler>(
    view: &mut View,
    output_dir: &Path,
    extractor: &BoardExtractor<D, A>,
) -> Result<(), ViewError> {
    let decoded = image::open(&view.image)
        .map_err(|source| ViewError::ReadImage {
            path: view.image.clone(),
            source,
        })?
        .to_rgb8();
    let input = aspect_corrected(decoded, view.aspect_ratio());

    // Keep an aspect-corrected copy of the source next to the outputs.
    let file_name = view
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "view.png".to_string());
    let copy_path = output_dir.join(&file_name);
    input
        .save(&copy_path)
        .map_err(|source| ViewError::WriteImage {
            path: copy_path,
            source,
        })?;

    let camera = &mut view.camera;
    camera.normalize_frame(input.width(), input.height());

    let extraction = extractor.extract(&input)?;
    let mut lines = build_lines(&extraction);

    let mut statistics = Statistics::default();
    fit_distortion(camera, &mut statistics, &mut Observations::Lines(&mut lines))?;
    info!("Result quality of calibration:");
    info!(
        "Mean of error (stddev): {} ({})",
        statistics.mean, statistics.stddev
    );
    info!("Median of error: {}", statistics.median);

    let pairs = generate_point_pairs(camera, &lines)?;

    // The inversion pass starts from the normalized frame again.
    camera.normalize_frame(input.width(), input.height());
    fit_distortion(camera, &mut statistics, &mut Observations::Points(&pairs))?;
    info!("Result quality of inversion:");
    info!(
        "Mean of error (stddev): {} ({})",
        statistics.mean, statistics.stddev
    );
    info!("Median of error: {}", statistics.median);

    let bounds = compute_bounding_box(camera, input.width(), input.height())?;
    let undistorted = undistort_image(camera, &input, &bounds);
    let st_map = undistort_st_map(camera, input.width(), input.height(), &bounds);

    let stem = view
        .image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "view".to_string());

    let undistorted_path = output_dir.join(format!("{stem}_undistorted.exr"));
    undistorted
        .save(&undistorted_path)
        .map_err(|source| ViewError::WriteImage {
            path: undistorted_path,
            source,
        })?;

    let st_map_path = output_dir.join(format!("{stem}_stmap.exr"));
    st_map
        .save(&st_map_path)
        .map_err(|source| ViewError::WriteImage {
            path: st_map_path,
            source,
        })?;

    Ok(())
}

/// Rescales the image height when the pixel aspect ratio is not square.
fn aspect_corrected(image: RgbImage, ratio: f64) -> RgbImage {
    if ratio == 1.0 {
        return image;
    }
    let width = image.width();
    let height = (image.height() as f64 / ratio).round().max(1.0) as u32;
    image::imageops::resize(&image, width, height, FilterType::CatmullRom)
}

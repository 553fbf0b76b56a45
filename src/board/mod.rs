//! Checkerboard extraction and topological validation.
//!
//! Corner detection and board assembly are delegated to external
//! collaborators behind the [`CornerDetector`] and [`BoardAssembler`] traits
//! (the `detect` module ships default implementations). This module owns the
//! steps around them: filtering the reserved center region, validating the
//! assembled grid geometry, and retrying assembly while the geometry looks
//! broken.

pub mod lines;

pub use lines::{build_lines, LineWithPoints, MIN_POINTS_PER_LINE};

use image::RgbImage;
use log::debug;
use nalgebra::Vector2;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Minimum number of raw detections for an image to be considered usable.
pub const MIN_CORNERS: usize = 20;

/// Half-size of the reserved square around the image center. Corners inside
/// it are discarded before assembly (the region holds a marker or gap, not
/// checkerboard texture).
const CENTER_EXCLUSION_HALF_WINDOW: f64 = 100.0;

/// Upper bound on re-running board assembly while grid geometry defects
/// remain.
const MAX_ASSEMBLY_ATTEMPTS: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Detected only {found} corners, need at least {MIN_CORNERS}")]
    TooFewCorners { found: usize },
    #[error("No usable board could be assembled")]
    NoBoards,
}

/// A sub-pixel checkerboard corner as produced by the detector.
///
/// `v1` and `v2` are the two local edge orientations of the saddle pattern;
/// `score` is the detector response. Consumed read-only.
#[derive(Clone, Debug)]
pub struct Corner {
    pub position: Vector2<f64>,
    pub v1: Vector2<f64>,
    pub v2: Vector2<f64>,
    pub score: f64,
}

/// A grid of corner indices describing one physical checkerboard instance.
///
/// Cells are stored row-major; `-1` marks a missing corner.
#[derive(Clone, Debug)]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<i32>,
}

impl Board {
    /// Creates a board with every cell marked missing.
    pub fn new(width: usize, height: usize) -> Self {
        Board {
            width,
            height,
            cells: vec![-1; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Corner index at `(row, col)`, `-1` if the cell is empty.
    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.cells[row * self.width + col]
    }

    pub fn set(&mut self, row: usize, col: usize, index: i32) {
        self.cells[row * self.width + col] = index;
    }
}

/// External sub-pixel corner detector. An empty result means detection
/// failed.
pub trait CornerDetector {
    fn detect(&self, image: &RgbImage) -> Vec<Corner>;
}

/// External board assembler, turning loose corners into index grids.
pub trait BoardAssembler {
    fn assemble(&self, image: &RgbImage, corners: &[Corner]) -> Vec<Board>;
}

/// Result of a successful extraction: the filtered corners and the boards
/// indexing into them.
#[derive(Debug)]
pub struct Extraction {
    pub corners: Vec<Corner>,
    pub boards: Vec<Board>,
}

/// Drives detection, filtering, assembly and geometric validation.
pub struct BoardExtractor<D, A> {
    detector: D,
    assembler: A,
}

impl<D: CornerDetector, A: BoardAssembler> BoardExtractor<D, A> {
    pub fn new(detector: D, assembler: A) -> Self {
        BoardExtractor {
            detector,
            assembler,
        }
    }

    /// Extracts validated boards from an 8-bit RGB image.
    ///
    /// Assembly is retried up to [`MAX_ASSEMBLY_ATTEMPTS`] times while the
    /// grid geometry shows defects, stopping early once a defect-free pass
    /// is seen. The last assembled set is kept either way.
    pub fn extract(&self, image: &RgbImage) -> Result<Extraction, ExtractError> {
        let corners = self.detector.detect(image);
        if corners.len() < MIN_CORNERS {
            return Err(ExtractError::TooFewCorners {
                found: corners.len(),
            });
        }

        let hw = image.width() as f64 / 2.0;
        let hh = image.height() as f64 / 2.0;
        let filtered: Vec<Corner> = corners
            .into_iter()
            .filter(|c| {
                let x = (c.position.x - hw).abs();
                let y = (c.position.y - hh).abs();
                x >= CENTER_EXCLUSION_HALF_WINDOW || y >= CENTER_EXCLUSION_HALF_WINDOW
            })
            .collect();

        let mut boards = Vec::new();
        for attempt in 0..MAX_ASSEMBLY_ATTEMPTS {
            boards = self.assembler.assemble(image, &filtered);

            let defects: usize = boards
                .iter()
                .map(|b| count_grid_defects(b, &filtered))
                .sum();
            if defects == 0 {
                break;
            }
            debug!(
                "board geometry has {} defective cells after attempt {}",
                defects,
                attempt + 1
            );
        }

        if boards.is_empty() {
            return Err(ExtractError::NoBoards);
        }

        Ok(Extraction {
            corners: filtered,
            boards,
        })
    }
}

/// Counts geometry defects over the interior cells of a board.
///
/// For every cell whose right and below neighbors are present, the two edge
/// vectors are formed; a degenerate edge (norm below `1e-6`) or an angle
/// between the normalized edges deviating from 90 degrees by more than 45
/// degrees counts as one defect.
pub fn count_grid_defects(board: &Board, corners: &[Corner]) -> usize {
    let mut defects = 0;

    for i in 0..board.height().saturating_sub(1) {
        for j in 0..board.width().saturating_sub(1) {
            let idx = board.get(i, j);
            if idx < 0 {
                continue;
            }
            let idx_right = board.get(i, j + 1);
            if idx_right < 0 {
                continue;
            }
            let idx_below = board.get(i + 1, j);
            if idx_below < 0 {
                continue;
            }

            let p = corners[idx as usize].position;
            let px = corners[idx_right as usize].position - p;
            let py = corners[idx_below as usize].position - p;

            let norm_x = px.norm();
            if norm_x < 1e-6 {
                defects += 1;
                continue;
            }
            let norm_y = py.norm();
            if norm_y < 1e-6 {
                defects += 1;
                continue;
            }

            let cos_angle = (px / norm_x).dot(&(py / norm_y));
            let deviation = (cos_angle.clamp(-1.0, 1.0).acos() - FRAC_PI_2).abs();
            if deviation > FRAC_PI_4 {
                defects += 1;
            }
        }
    }

    defects
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Detector returning a fixed corner set regardless of image content.
    struct FixedDetector(pub Vec<Corner>);

    impl CornerDetector for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Vec<Corner> {
            self.0.clone()
        }
    }

    /// Assembler indexing all corners into a single dense grid, row-major.
    struct DenseGridAssembler {
        pub rows: usize,
        pub cols: usize,
        pub calls: Cell<usize>,
    }

    impl BoardAssembler for DenseGridAssembler {
        fn assemble(&self, _image: &RgbImage, corners: &[Corner]) -> Vec<Board> {
            self.calls.set(self.calls.get() + 1);
            assert_eq!(corners.len(), self.rows * self.cols);
            let mut board = Board::new(self.cols, self.rows);
            for i in 0..self.rows {
                for j in 0..self.cols {
                    board.set(i, j, (i * self.cols + j) as i32);
                }
            }
            vec![board]
        }
    }

    fn corner_at(x: f64, y: f64) -> Corner {
        Corner {
            position: Vector2::new(x, y),
            v1: Vector2::new(1.0, 0.0),
            v2: Vector2::new(0.0, 1.0),
            score: 1.0,
        }
    }

    /// Regular grid of corners with the given spacing and origin.
    fn grid_corners(
        rows: usize,
        cols: usize,
        origin: (f64, f64),
        spacing: f64,
    ) -> Vec<Corner> {
        let mut corners = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                corners.push(corner_at(
                    origin.0 + j as f64 * spacing,
                    origin.1 + i as f64 * spacing,
                ));
            }
        }
        corners
    }

    fn dense_board(rows: usize, cols: usize) -> Board {
        let mut board = Board::new(cols, rows);
        for i in 0..rows {
            for j in 0..cols {
                board.set(i, j, (i * cols + j) as i32);
            }
        }
        board
    }

    #[test]
    fn test_too_few_corners_fails() {
        let corners = grid_corners(3, 6, (10.0, 10.0), 30.0);
        assert_eq!(corners.len(), 18);
        let extractor = BoardExtractor::new(
            FixedDetector(corners),
            DenseGridAssembler {
                rows: 3,
                cols: 6,
                calls: Cell::new(0),
            },
        );
        let image = RgbImage::new(640, 480);
        assert!(matches!(
            extractor.extract(&image),
            Err(ExtractError::TooFewCorners { found: 18 })
        ));
    }

    #[test]
    fn test_center_window_corners_are_discarded() {
        // 5x5 grid away from the center plus one corner sitting right on
        // the image center.
        let mut corners = grid_corners(5, 5, (30.0, 30.0), 40.0);
        corners.push(corner_at(320.0, 240.0));

        let extractor = BoardExtractor::new(
            FixedDetector(corners),
            DenseGridAssembler {
                rows: 5,
                cols: 5,
                calls: Cell::new(0),
            },
        );
        let image = RgbImage::new(640, 480);
        let extraction = extractor.extract(&image).unwrap();
        assert_eq!(extraction.corners.len(), 25);
        assert!(extraction
            .corners
            .iter()
            .all(|c| (c.position.x - 320.0).abs() >= 100.0
                || (c.position.y - 240.0).abs() >= 100.0));
    }

    #[test]
    fn test_regular_grid_has_no_defects() {
        let corners = grid_corners(6, 8, (0.0, 0.0), 25.0);
        let board = dense_board(6, 8);
        assert_eq!(count_grid_defects(&board, &corners), 0);
    }

    #[test]
    fn test_sheared_cell_counts_as_defect() {
        let mut corners = grid_corners(3, 3, (0.0, 0.0), 100.0);
        // Drag the right neighbor of cell (0, 0) almost onto the downward
        // edge, so the two edges are far from perpendicular.
        corners[1].position = Vector2::new(10.0, 95.0);
        let board = dense_board(3, 3);
        assert!(count_grid_defects(&board, &corners) > 0);
    }

    #[test]
    fn test_degenerate_edge_counts_as_defect() {
        let mut corners = grid_corners(3, 3, (0.0, 0.0), 100.0);
        corners[1].position = corners[0].position;
        let board = dense_board(3, 3);
        assert!(count_grid_defects(&board, &corners) > 0);
    }

    #[test]
    fn test_assembly_retries_are_bounded() {
        // A grid with one sheared cell never validates, so assembly must be
        // re-run exactly MAX_ASSEMBLY_ATTEMPTS times and the last result
        // still comes back.
        let mut corners = grid_corners(5, 5, (400.0, 400.0), 50.0);
        corners[1].position = Vector2::new(402.0, 448.0);

        let assembler = DenseGridAssembler {
            rows: 5,
            cols: 5,
            calls: Cell::new(0),
        };
        let extractor = BoardExtractor::new(FixedDetector(corners), assembler);
        let image = RgbImage::new(2000, 2000);
        let extraction = extractor.extract(&image).unwrap();
        assert_eq!(extraction.boards.len(), 1);
        assert_eq!(extractor.assembler.calls.get(), 10);
    }

    #[test]
    fn test_clean_grid_assembles_once() {
        let corners = grid_corners(5, 5, (400.0, 400.0), 50.0);
        let assembler = DenseGridAssembler {
            rows: 5,
            cols: 5,
            calls: Cell::new(0),
        };
        let extractor = BoardExtractor::new(FixedDetector(corners), assembler);
        let image = RgbImage::new(2000, 2000);
        extractor.extract(&image).unwrap();
        assert_eq!(extractor.assembler.calls.get(), 1);
    }
}

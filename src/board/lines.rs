//! Conversion of board grids into ordered correspondence lines.

use crate::board::Extraction;
use nalgebra::Vector2;
use std::f64::consts::FRAC_PI_4;

/// Lines with fewer observed points than this are dropped; they are too
/// short to constrain the joint line/distortion estimate.
pub const MIN_POINTS_PER_LINE: usize = 10;

/// An ordered sequence of corner positions from one grid row or column.
///
/// `angle` and `dist` parameterize the line as
/// `cos(angle) * x + sin(angle) * y = dist`. They are seeded arbitrarily and
/// refined jointly with the camera during fitting; the solver updates them
/// in place.
#[derive(Clone, Debug)]
pub struct LineWithPoints {
    pub horizontal: bool,
    pub index: usize,
    pub angle: f64,
    pub dist: f64,
    pub points: Vec<Vector2<f64>>,
}

impl LineWithPoints {
    fn new(horizontal: bool, index: usize) -> Self {
        LineWithPoints {
            horizontal,
            index,
            angle: FRAC_PI_4,
            dist: 1.0,
            points: Vec::new(),
        }
    }
}

/// Builds one line per grid row and one per grid column of every board.
///
/// Points are listed in grid order, skipping missing cells. Lines with
/// fewer than [`MIN_POINTS_PER_LINE`] points are dropped.
pub fn build_lines(extraction: &Extraction) -> Vec<LineWithPoints> {
    let mut lines = Vec::new();

    for board in &extraction.boards {
        for i in 0..board.height() {
            let mut line = LineWithPoints::new(true, i);
            for j in 0..board.width() {
                let idx = board.get(i, j);
                if idx < 0 {
                    continue;
                }
                line.points.push(extraction.corners[idx as usize].position);
            }
            if line.points.len() < MIN_POINTS_PER_LINE {
                continue;
            }
            lines.push(line);
        }

        for j in 0..board.width() {
            let mut line = LineWithPoints::new(false, j);
            for i in 0..board.height() {
                let idx = board.get(i, j);
                if idx < 0 {
                    continue;
                }
                line.points.push(extraction.corners[idx as usize].position);
            }
            if line.points.len() < MIN_POINTS_PER_LINE {
                continue;
            }
            lines.push(line);
        }
    }

    lines
}

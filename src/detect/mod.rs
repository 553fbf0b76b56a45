//! Default collaborator implementations for the extraction seams.
//!
//! [`ChessCornerDetector`] wraps the ChESS detector from the
//! `chess-corners` crate; [`GridBoardAssembler`] turns the loose corners
//! into index grids. Both can be swapped out through the
//! [`CornerDetector`](crate::board::CornerDetector) and
//! [`BoardAssembler`](crate::board::BoardAssembler) traits.

pub mod assemble;

pub use assemble::GridBoardAssembler;

use crate::board::{Corner, CornerDetector};
use chess_corners::{find_chess_corners_image, ChessConfig, ThresholdMode};
use image::RgbImage;
use nalgebra::Vector2;

/// Sub-pixel corner detector backed by `chess-corners`.
pub struct ChessCornerDetector {
    config: ChessConfig,
}

impl Default for ChessCornerDetector {
    fn default() -> Self {
        let mut config = ChessConfig::single_scale();
        config.threshold_mode = ThresholdMode::Relative;
        config.threshold_value = 0.2;
        config.nms_radius = 2;
        ChessCornerDetector { config }
    }
}

impl ChessCornerDetector {
    pub fn new(config: ChessConfig) -> Self {
        ChessCornerDetector { config }
    }
}

impl CornerDetector for ChessCornerDetector {
    fn detect(&self, image: &RgbImage) -> Vec<Corner> {
        let gray = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();

        find_chess_corners_image(&gray, &self.config)
            .unwrap_or_default()
            .iter()
            .map(|c| {
                let angle = c.axes[0].angle as f64;
                let v1 = Vector2::new(angle.cos(), angle.sin());
                // The saddle pattern has two local edge directions; the
                // detector reports one, the other is its perpendicular.
                let v2 = Vector2::new(-v1.y, v1.x);
                Corner {
                    position: Vector2::new(c.x as f64, c.y as f64),
                    v1,
                    v2,
                    score: c.response as f64,
                }
            })
            .collect()
    }
}

//! Scene dataset: the JSON document the pipeline reads and writes.
//!
//! A dataset lists the views to calibrate, each with an image path, optional
//! pixel-aspect-ratio metadata and a camera descriptor. The fitted camera
//! parameters are written back into the same document.

use crate::camera::PinholeCamera;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write dataset {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed dataset {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One view to calibrate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct View {
    /// Path to the checkerboard image, absolute or relative to the working
    /// directory.
    pub image: PathBuf,

    /// Pixel aspect ratio metadata. Absent or non-positive values fall back
    /// to square pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_aspect_ratio: Option<f64>,

    pub camera: PinholeCamera,
}

impl View {
    /// The effective pixel aspect ratio, defaulting to 1.0.
    pub fn aspect_ratio(&self) -> f64 {
        match self.pixel_aspect_ratio {
            Some(ratio) if ratio > 0.0 => ratio,
            _ => 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneDataset {
    pub views: Vec<View>,
}

impl SceneDataset {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let raw = fs::read_to_string(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| DatasetError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| DatasetError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| DatasetError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Distortion;
    use nalgebra::Vector2;

    fn sample_view(ratio: Option<f64>) -> View {
        View {
            image: PathBuf::from("checker.png"),
            pixel_aspect_ratio: ratio,
            camera: PinholeCamera {
                width: 1920,
                height: 1080,
                scale: Vector2::new(1101.0, 1101.0),
                offset: Vector2::new(960.0, 540.0),
                distortion: Distortion::RadialK3([0.01, 0.0, 0.0]),
            },
        }
    }

    #[test]
    fn test_aspect_ratio_defaults() {
        assert_eq!(sample_view(None).aspect_ratio(), 1.0);
        assert_eq!(sample_view(Some(-2.0)).aspect_ratio(), 1.0);
        assert_eq!(sample_view(Some(2.0)).aspect_ratio(), 2.0);
    }

    #[test]
    fn test_dataset_json_round_trip() {
        let dataset = SceneDataset {
            views: vec![sample_view(None), sample_view(Some(1.5))],
        };

        let json = serde_json::to_string(&dataset).unwrap();
        let back: SceneDataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.views.len(), 2);
        assert_eq!(back.views[0].image, PathBuf::from("checker.png"));
        assert_eq!(back.views[1].pixel_aspect_ratio, Some(1.5));
        assert_eq!(
            back.views[0].camera.distortion,
            Distortion::RadialK3([0.01, 0.0, 0.0])
        );
    }

    #[test]
    fn test_missing_dataset_is_an_error() {
        assert!(matches!(
            SceneDataset::load(Path::new("/nonexistent/scene.json")),
            Err(DatasetError::Read { .. })
        ));
    }
}

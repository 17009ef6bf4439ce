//! The face-analysis contract the command layer talks to.
//!
//! Two capabilities: `verify` decides whether two images show the same
//! person, `extract_faces` lists the faces found in one image. Errors are
//! a discriminated enum so callers never need to inspect message text.

use crate::detector::{DetectorError, SCRFD_CONFIDENCE_THRESHOLD};
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, DetectorBackend, DistanceMetric, RecognitionModel};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face analysis unavailable: {0}")]
    Unavailable(String),
    #[error("Face could not be detected in {}. Please confirm that the picture is a face photo.", .path.display())]
    NoFaceDetected { path: PathBuf },
    #[error("could not load image {}: {source}", .path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Model choice shared by both capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backends {
    pub detector: DetectorBackend,
    pub model: RecognitionModel,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    pub backends: Backends,
    /// Fail with [`AnalyzerError::NoFaceDetected`] when either image has no face.
    pub enforce_detection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub detector: DetectorBackend,
    /// Fail with [`AnalyzerError::NoFaceDetected`] instead of returning an empty list.
    pub enforce_detection: bool,
}

/// Outcome of a successful `verify` call.
#[derive(Debug, Clone)]
pub struct Verification {
    pub verified: bool,
    pub distance: f64,
    /// Decision threshold the backend applied, if it has one.
    pub threshold: Option<f64>,
    pub model: RecognitionModel,
    pub detector: DetectorBackend,
    pub metric: DistanceMetric,
    /// Faces that produced the winning distance. `None` means the whole image was used.
    pub facial_areas: (Option<BoundingBox>, Option<BoundingBox>),
    pub elapsed: Duration,
}

/// A face found by `extract_faces`.
#[derive(Debug, Clone)]
pub struct ExtractedFace {
    pub facial_area: BoundingBox,
    pub confidence: f32,
    /// Facial area cropped out of the source image.
    pub face: RgbImage,
}

/// Face verification and detection capabilities.
pub trait FaceAnalyzer {
    fn verify(
        &mut self,
        image_a: &Path,
        image_b: &Path,
        options: &VerifyOptions,
    ) -> Result<Verification, AnalyzerError>;

    fn extract_faces(
        &mut self,
        image: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<ExtractedFace>, AnalyzerError>;
}

/// Settings for [`crate::OnnxAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub detector: DetectorBackend,
    pub recognition_model: RecognitionModel,
    pub distance_metric: DistanceMetric,
    /// Minimum SCRFD score for a detection to count as a face.
    pub detection_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector: DetectorBackend::default(),
            recognition_model: RecognitionModel::default(),
            distance_metric: DistanceMetric::default(),
            detection_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            intra_threads: 2,
        }
    }
}

impl AnalyzerConfig {
    pub fn backends(&self) -> Backends {
        Backends {
            detector: self.detector,
            model: self.recognition_model,
            metric: self.distance_metric,
        }
    }

    pub fn detector_path(&self, detector: DetectorBackend) -> PathBuf {
        self.model_dir.join(detector.file_name())
    }

    pub fn recognizer_path(&self, model: RecognitionModel) -> PathBuf {
        self.model_dir.join(model.file_name())
    }
}

/// `$XDG_DATA_HOME/facematch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_face_message_keeps_known_wording() {
        let err = AnalyzerError::NoFaceDetected { path: PathBuf::from("/tmp/selfie.jpg") };
        let msg = err.to_string();
        assert!(msg.starts_with("Face could not be detected in /tmp/selfie.jpg"), "{msg}");
    }

    #[test]
    fn test_config_default_backends() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.backends(), Backends::default());
        assert_eq!(config.detection_threshold, 0.5);
        assert!(config.model_dir.ends_with("facematch/models"));
    }

    #[test]
    fn test_model_paths() {
        let config = AnalyzerConfig {
            model_dir: PathBuf::from("/opt/models"),
            ..AnalyzerConfig::default()
        };
        assert_eq!(
            config.detector_path(DetectorBackend::Scrfd500m),
            PathBuf::from("/opt/models/det_500m.onnx")
        );
        assert_eq!(
            config.recognizer_path(RecognitionModel::Arcface),
            PathBuf::from("/opt/models/w600k_r50.onnx")
        );
    }
}

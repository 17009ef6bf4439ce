//! Compare and detect operations, and the flat JSON records they produce.
//!
//! Neither operation returns an error: every analyzer failure is folded
//! into a record with `success: false`.

use crate::analyzer::{AnalyzerError, Backends, ExtractOptions, FaceAnalyzer, VerifyOptions};
use serde::Serialize;
use std::path::Path;

/// Fallback threshold reported when the analyzer does not report one.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

pub const NO_FACE_MESSAGE: &str = "No face detected in one or both images";
pub const INVALID_ARGUMENTS_MESSAGE: &str = "Invalid arguments. Use --help for usage information";
pub const UNAVAILABLE_MESSAGE: &str =
    "Face analysis models not installed. Set FACEMATCH_MODEL_DIR to a directory containing the detector and recognition ONNX files";

/// Message fragments that mark a no-face failure in free-form error text.
const NO_FACE_MARKERS: [&str; 2] = ["Face could not be detected", "No face detected"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub success: bool,
    #[serde(rename = "match")]
    pub matched: bool,
    pub confidence: f64,
    pub distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparisonResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            matched: false,
            confidence: 0.0,
            distance: 1.0,
            threshold: None,
            error: Some(error.into()),
        }
    }

    /// Fixed document printed when the analyzer cannot be loaded at startup.
    pub fn unavailable() -> Self {
        Self::failed(UNAVAILABLE_MESSAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub success: bool,
    pub face_detected: bool,
    pub num_faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidArguments {
    pub success: bool,
    pub error: String,
}

impl Default for InvalidArguments {
    fn default() -> Self {
        Self {
            success: false,
            error: INVALID_ARGUMENTS_MESSAGE.to_string(),
        }
    }
}

/// Whatever a single invocation prints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Comparison(ComparisonResult),
    Detection(DetectionResult),
    InvalidArguments(InvalidArguments),
}

impl Outcome {
    pub fn success(&self) -> bool {
        match self {
            Self::Comparison(r) => r.success,
            Self::Detection(r) => r.success,
            Self::InvalidArguments(r) => r.success,
        }
    }

    /// Single-line JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// How a failed analyzer call is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    NoFaceDetected,
    Processing(String),
}

impl Failure {
    /// Classify by variant first. Other variants fall back to matching the
    /// message text, which silently degrades if that wording ever changes.
    pub fn classify(err: &AnalyzerError) -> Self {
        if let AnalyzerError::NoFaceDetected { .. } = err {
            return Self::NoFaceDetected;
        }
        let message = err.to_string();
        if NO_FACE_MARKERS.iter().any(|marker| message.contains(marker)) {
            Self::NoFaceDetected
        } else {
            Self::Processing(message)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NoFaceDetected => NO_FACE_MESSAGE,
            Self::Processing(message) => message,
        }
    }
}

/// `max(0, 1 - distance)`.
pub fn confidence(distance: f64) -> f64 {
    (1.0 - distance).max(0.0)
}

/// Compare a profile image against a selfie.
///
/// Detection is enforced. `threshold` is only reported back when the
/// analyzer has no threshold of its own; it never changes the decision.
pub fn compare_faces<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    profile: &Path,
    selfie: &Path,
    threshold: f64,
    backends: Backends,
) -> ComparisonResult {
    let options = VerifyOptions {
        backends,
        enforce_detection: true,
    };

    match analyzer.verify(profile, selfie, &options) {
        Ok(verification) => {
            let distance = verification.distance;
            tracing::debug!(
                facial_areas = ?verification.facial_areas,
                model = %verification.model,
                detector = %verification.detector,
                metric = %verification.metric,
                "comparison succeeded"
            );
            ComparisonResult {
                success: true,
                matched: verification.verified,
                confidence: confidence(distance),
                distance,
                threshold: Some(verification.threshold.unwrap_or(threshold)),
                error: None,
            }
        }
        Err(err) => {
            let failure = Failure::classify(&err);
            tracing::warn!(error = %err, ?failure, "comparison failed");
            ComparisonResult::failed(failure.message())
        }
    }
}

/// Count the faces in one image. Zero faces is a successful outcome.
pub fn detect_face<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    image: &Path,
    backends: Backends,
) -> DetectionResult {
    let options = ExtractOptions {
        detector: backends.detector,
        enforce_detection: false,
    };

    match analyzer.extract_faces(image, &options) {
        Ok(faces) => DetectionResult {
            success: true,
            face_detected: !faces.is_empty(),
            num_faces: faces.len(),
            error: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "detection failed");
            DetectionResult {
                success: false,
                face_detected: false,
                num_faces: 0,
                error: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{ExtractedFace, Verification};
    use crate::detector::DetectorError;
    use crate::types::BoundingBox;
    use image::RgbImage;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Canned analyzer that records the options it was called with.
    #[derive(Default)]
    struct StubAnalyzer {
        verify_result: Option<Result<(f64, bool, Option<f64>), AnalyzerError>>,
        faces: Option<Result<usize, AnalyzerError>>,
        last_verify: Option<VerifyOptions>,
        last_extract: Option<ExtractOptions>,
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn verify(
            &mut self,
            _a: &Path,
            _b: &Path,
            options: &VerifyOptions,
        ) -> Result<Verification, AnalyzerError> {
            self.last_verify = Some(*options);
            let (distance, verified, threshold) = self.verify_result.take().expect("verify not primed")?;
            Ok(Verification {
                verified,
                distance,
                threshold,
                model: options.backends.model,
                detector: options.backends.detector,
                metric: options.backends.metric,
                facial_areas: (None, None),
                elapsed: Duration::from_millis(5),
            })
        }

        fn extract_faces(
            &mut self,
            _image: &Path,
            options: &ExtractOptions,
        ) -> Result<Vec<ExtractedFace>, AnalyzerError> {
            self.last_extract = Some(*options);
            let count = self.faces.take().expect("extract not primed")?;
            Ok((0..count)
                .map(|i| {
                    let area = BoundingBox {
                        x: i as f32 * 10.0,
                        y: 0.0,
                        width: 8.0,
                        height: 8.0,
                        confidence: 0.9,
                        landmarks: None,
                    };
                    ExtractedFace { confidence: 0.9, face: RgbImage::new(8, 8), facial_area: area }
                })
                .collect())
        }
    }

    fn compare(stub: &mut StubAnalyzer) -> ComparisonResult {
        compare_faces(stub, Path::new("profile.jpg"), Path::new("selfie.jpg"), DEFAULT_THRESHOLD, Backends::default())
    }

    fn as_json<T: Serialize>(value: &T) -> Value {
        serde_json::to_value(value).unwrap()
    }

    #[test]
    fn test_compare_match() {
        let mut stub = StubAnalyzer { verify_result: Some(Ok((0.25, true, Some(0.593)))), ..Default::default() };
        let result = compare(&mut stub);

        assert!(result.success);
        assert!(result.matched);
        assert_eq!(result.distance, 0.25);
        assert_eq!(result.confidence, 0.75);
        assert_eq!(result.threshold, Some(0.593));
        assert_eq!(result.error, None);
        assert!(stub.last_verify.unwrap().enforce_detection);
    }

    #[test]
    fn test_compare_echoes_model_threshold_verbatim() {
        let backends = Backends::default();
        let threshold = backends.model.threshold(backends.metric);
        let mut stub = StubAnalyzer { verify_result: Some(Ok((0.25, true, Some(threshold)))), ..Default::default() };
        let line = Outcome::Comparison(compare(&mut stub)).to_json().unwrap();

        assert_eq!(
            line,
            r#"{"success":true,"match":true,"confidence":0.75,"distance":0.25,"threshold":0.593}"#
        );
    }

    #[test]
    fn test_compare_self_confidence_stays_in_range() {
        use crate::types::Embedding;

        for seed in 1..200u32 {
            let values: Vec<f32> = (0..128u32)
                .map(|i| ((i.wrapping_mul(seed).wrapping_add(17 * seed) % 97) as f32 - 48.0) / 13.0)
                .collect();
            let embedding = Embedding { values, model_version: None };
            let distance = embedding.cosine_distance(&embedding);

            let mut stub = StubAnalyzer { verify_result: Some(Ok((distance, true, Some(0.593)))), ..Default::default() };
            let result = compare(&mut stub);
            assert!(result.distance >= 0.0, "seed {seed}: distance {}", result.distance);
            assert!(result.confidence <= 1.0, "seed {seed}: confidence {}", result.confidence);
        }
    }

    #[test]
    fn test_compare_no_match_keeps_success() {
        let mut stub = StubAnalyzer { verify_result: Some(Ok((0.8, false, Some(0.593)))), ..Default::default() };
        let result = compare(&mut stub);
        assert!(result.success);
        assert!(!result.matched);
        assert!((result.confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_compare_confidence_floors_at_zero() {
        let mut stub = StubAnalyzer { verify_result: Some(Ok((1.4, false, Some(0.593)))), ..Default::default() };
        let result = compare(&mut stub);
        assert!(result.success);
        assert_eq!(result.confidence, 0.0);
        assert!((result.distance - 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_compare_threshold_falls_back_to_argument() {
        let mut stub = StubAnalyzer { verify_result: Some(Ok((0.1, true, None))), ..Default::default() };
        let result = compare_faces(&mut stub, Path::new("a"), Path::new("b"), 0.42, Backends::default());
        assert_eq!(result.threshold, Some(0.42));
    }

    #[test]
    fn test_compare_threshold_argument_does_not_decide() {
        // Analyzer says no match; a permissive CLI threshold must not flip it.
        let mut stub = StubAnalyzer { verify_result: Some(Ok((0.7, false, Some(0.593)))), ..Default::default() };
        let result = compare_faces(&mut stub, Path::new("a"), Path::new("b"), 0.99, Backends::default());
        assert!(!result.matched);
        assert_eq!(result.threshold, Some(0.593));
    }

    #[test]
    fn test_compare_no_face() {
        let err = AnalyzerError::NoFaceDetected { path: PathBuf::from("selfie.jpg") };
        let mut stub = StubAnalyzer { verify_result: Some(Err(err)), ..Default::default() };
        let result = compare(&mut stub);

        assert_eq!(
            as_json(&result),
            json!({
                "success": false,
                "error": "No face detected in one or both images",
                "match": false,
                "confidence": 0.0,
                "distance": 1.0,
            })
        );
    }

    #[test]
    fn test_compare_generic_failure_keeps_raw_message() {
        let err = AnalyzerError::Detector(DetectorError::InferenceFailed("scores stride 8: shape".into()));
        let expected = err.to_string();
        let mut stub = StubAnalyzer { verify_result: Some(Err(err)), ..Default::default() };
        let result = compare(&mut stub);

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(expected.as_str()));
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.distance, 1.0);
        assert_eq!(result.threshold, None);
    }

    #[test]
    fn test_classify_falls_back_to_message_text() {
        let err = AnalyzerError::Unavailable("upstream said: No face detected".into());
        assert_eq!(Failure::classify(&err), Failure::NoFaceDetected);

        let err = AnalyzerError::Unavailable("disk on fire".into());
        assert_eq!(
            Failure::classify(&err),
            Failure::Processing("face analysis unavailable: disk on fire".into())
        );
    }

    #[test]
    fn test_detect_zero_faces_is_success() {
        let mut stub = StubAnalyzer { faces: Some(Ok(0)), ..Default::default() };
        let result = detect_face(&mut stub, Path::new("wall.jpg"), Backends::default());

        assert_eq!(as_json(&result), json!({ "success": true, "face_detected": false, "num_faces": 0 }));
        assert!(!stub.last_extract.unwrap().enforce_detection);
    }

    #[test]
    fn test_detect_counts_faces() {
        let mut stub = StubAnalyzer { faces: Some(Ok(3)), ..Default::default() };
        let result = detect_face(&mut stub, Path::new("group.jpg"), Backends::default());
        assert!(result.success);
        assert!(result.face_detected);
        assert_eq!(result.num_faces, 3);
    }

    #[test]
    fn test_detect_failure() {
        let err = AnalyzerError::ImageLoad {
            path: PathBuf::from("missing.jpg"),
            source: image::ImageError::IoError(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
        };
        let expected = err.to_string();
        let mut stub = StubAnalyzer { faces: Some(Err(err)), ..Default::default() };
        let result = detect_face(&mut stub, Path::new("missing.jpg"), Backends::default());

        assert_eq!(
            as_json(&result),
            json!({ "success": false, "face_detected": false, "num_faces": 0, "error": expected })
        );
    }

    #[test]
    fn test_outcome_renders_single_line() {
        let outcome = Outcome::InvalidArguments(InvalidArguments::default());
        let line = outcome.to_json().unwrap();
        assert!(!line.contains('\n'));
        assert!(!outcome.success());
        assert_eq!(
            serde_json::from_str::<Value>(&line).unwrap(),
            json!({ "success": false, "error": "Invalid arguments. Use --help for usage information" })
        );
    }

    #[test]
    fn test_unavailable_document_shape() {
        let value = as_json(&Outcome::Comparison(ComparisonResult::unavailable()));
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["match"], json!(false));
        assert_eq!(value["distance"], json!(1.0));
        assert!(value.get("threshold").is_none());
        assert!(value["error"].as_str().unwrap().starts_with("Face analysis models not installed"));
    }
}

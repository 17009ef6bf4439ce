//! ONNX Runtime backend for [`FaceAnalyzer`].

use crate::analyzer::{
    AnalyzerConfig, AnalyzerError, ExtractOptions, ExtractedFace, FaceAnalyzer, Verification,
    VerifyOptions,
};
use crate::detector::FaceDetector;
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, DetectorBackend, DistanceMetric, Embedding, RecognitionModel};
use image::{imageops, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// One embedded face; `None` area means the whole image was embedded.
type Representation = (Option<BoundingBox>, Embedding);

/// SCRFD + SFace/ArcFace sessions, loaded from a model directory.
///
/// The configured detector and recognizer are loaded eagerly so a missing
/// model surfaces at startup. Other variants are loaded on first use and kept.
pub struct OnnxAnalyzer {
    config: AnalyzerConfig,
    detectors: HashMap<DetectorBackend, FaceDetector>,
    recognizers: HashMap<RecognitionModel, FaceRecognizer>,
}

impl OnnxAnalyzer {
    pub fn load(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let mut analyzer = Self {
            config,
            detectors: HashMap::new(),
            recognizers: HashMap::new(),
        };

        let (detector, model) = (analyzer.config.detector, analyzer.config.recognition_model);
        analyzer
            .detector(detector)
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;
        analyzer
            .recognizer(model)
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;

        Ok(analyzer)
    }

    fn detector(&mut self, backend: DetectorBackend) -> Result<&mut FaceDetector, AnalyzerError> {
        if !self.detectors.contains_key(&backend) {
            let path = self.config.detector_path(backend);
            let detector = FaceDetector::load(
                &path,
                self.config.detection_threshold,
                self.config.intra_threads,
            )?;
            self.detectors.insert(backend, detector);
        }
        self.detectors
            .get_mut(&backend)
            .ok_or_else(|| AnalyzerError::Unavailable(format!("detector {backend} not loaded")))
    }

    fn recognizer(&mut self, model: RecognitionModel) -> Result<&mut FaceRecognizer, AnalyzerError> {
        if !self.recognizers.contains_key(&model) {
            let path = self.config.recognizer_path(model);
            let recognizer = FaceRecognizer::load(model, &path, self.config.intra_threads)?;
            self.recognizers.insert(model, recognizer);
        }
        self.recognizers
            .get_mut(&model)
            .ok_or_else(|| AnalyzerError::Unavailable(format!("recognizer {model} not loaded")))
    }

    /// Embed every face in an image, or the whole image when none is found
    /// and detection is not enforced.
    fn represent(
        &mut self,
        path: &Path,
        options: &VerifyOptions,
    ) -> Result<Vec<Representation>, AnalyzerError> {
        let image = load_rgb(path)?;
        let faces = self.detector(options.backends.detector)?.detect(&image)?;
        let recognizer = self.recognizer(options.backends.model)?;

        if faces.is_empty() {
            if options.enforce_detection {
                return Err(AnalyzerError::NoFaceDetected { path: path.to_path_buf() });
            }
            tracing::debug!(path = %path.display(), "no face found; embedding whole image");
            return Ok(vec![(None, recognizer.extract_unaligned(&image)?)]);
        }

        faces
            .into_iter()
            .map(|face| {
                let embedding = recognizer.extract(&image, &face)?;
                Ok::<_, AnalyzerError>((Some(face), embedding))
            })
            .collect()
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn verify(
        &mut self,
        image_a: &Path,
        image_b: &Path,
        options: &VerifyOptions,
    ) -> Result<Verification, AnalyzerError> {
        let started = Instant::now();
        let backends = options.backends;

        let reps_a = self.represent(image_a, options)?;
        let reps_b = self.represent(image_b, options)?;

        let (distance, area_a, area_b) = closest_pair(&reps_a, &reps_b, backends.metric)
            .ok_or_else(|| AnalyzerError::NoFaceDetected { path: image_a.to_path_buf() })?;

        let threshold = backends.model.threshold(backends.metric);
        let verification = Verification {
            verified: backends.model.verifies(distance, backends.metric),
            distance,
            threshold: Some(threshold),
            model: backends.model,
            detector: backends.detector,
            metric: backends.metric,
            facial_areas: (area_a.clone(), area_b.clone()),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            distance,
            threshold,
            verified = verification.verified,
            pairs = reps_a.len() * reps_b.len(),
            elapsed_ms = verification.elapsed.as_millis() as u64,
            "verify done"
        );

        Ok(verification)
    }

    fn extract_faces(
        &mut self,
        image: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<ExtractedFace>, AnalyzerError> {
        let rgb = load_rgb(image)?;
        let faces = self.detector(options.detector)?.detect(&rgb)?;

        if faces.is_empty() && options.enforce_detection {
            return Err(AnalyzerError::NoFaceDetected { path: image.to_path_buf() });
        }

        tracing::info!(path = %image.display(), faces = faces.len(), "extract_faces done");

        Ok(faces
            .into_iter()
            .map(|facial_area| ExtractedFace {
                confidence: facial_area.confidence,
                face: crop_face(&rgb, &facial_area),
                facial_area,
            })
            .collect())
    }
}

/// Smallest distance over every cross pair, with the areas that produced it.
/// Ties keep the earliest pair.
fn closest_pair<'a>(
    reps_a: &'a [Representation],
    reps_b: &'a [Representation],
    metric: DistanceMetric,
) -> Option<(f64, &'a Option<BoundingBox>, &'a Option<BoundingBox>)> {
    let mut best: Option<(f64, &Option<BoundingBox>, &Option<BoundingBox>)> = None;
    for (area_a, emb_a) in reps_a {
        for (area_b, emb_b) in reps_b {
            let distance = emb_a.distance(emb_b, metric);
            if best.map_or(true, |(d, _, _)| distance < d) {
                best = Some((distance, area_a, area_b));
            }
        }
    }
    best
}

fn load_rgb(path: &Path) -> Result<RgbImage, AnalyzerError> {
    let image = image::open(path).map_err(|source| AnalyzerError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Crop a facial area, clamped to the image bounds (at least 1×1).
fn crop_face(image: &RgbImage, area: &BoundingBox) -> RgbImage {
    let (w, h) = image.dimensions();
    let x0 = (area.x.max(0.0) as u32).min(w.saturating_sub(1));
    let y0 = (area.y.max(0.0) as u32).min(h.saturating_sub(1));
    let x1 = ((area.x + area.width).ceil().max(0.0) as u32).clamp(x0 + 1, w.max(1));
    let y1 = ((area.y + area.height).ceil().max(0.0) as u32).clamp(y0 + 1, h.max(1));
    imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Backends;
    use image::Rgb;

    fn area(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 0.9, landmarks: None }
    }

    fn rep(x: f32, values: &[f32]) -> Representation {
        (Some(area(x, 0.0, 10.0, 10.0)), Embedding { values: values.to_vec(), model_version: None })
    }

    #[test]
    fn test_closest_pair_takes_minimum_over_all_pairs() {
        let a = [rep(1.0, &[1.0, 0.0]), rep(2.0, &[0.0, 1.0])];
        let b = [rep(10.0, &[-1.0, 0.0]), rep(20.0, &[0.1, 1.0]), rep(30.0, &[1.0, 1.0])];

        let (distance, area_a, area_b) = closest_pair(&a, &b, DistanceMetric::Cosine).unwrap();
        assert_eq!(area_a.as_ref().map(|f| f.x), Some(2.0));
        assert_eq!(area_b.as_ref().map(|f| f.x), Some(20.0));
        let expected = a[1].1.cosine_distance(&b[1].1);
        assert_eq!(distance, expected);
        assert!(distance < a[0].1.cosine_distance(&b[2].1));
    }

    #[test]
    fn test_closest_pair_respects_metric() {
        let a = [rep(1.0, &[1.0, 0.0])];
        let b = [rep(10.0, &[10.0, 0.0]), rep(20.0, &[0.9, 0.1])];

        let (_, _, cosine) = closest_pair(&a, &b, DistanceMetric::Cosine).unwrap();
        assert_eq!(cosine.as_ref().map(|f| f.x), Some(10.0));
        let (_, _, euclidean) = closest_pair(&a, &b, DistanceMetric::Euclidean).unwrap();
        assert_eq!(euclidean.as_ref().map(|f| f.x), Some(20.0));
    }

    #[test]
    fn test_closest_pair_keeps_first_on_tie() {
        let a = [rep(1.0, &[1.0, 0.0])];
        let b = [rep(10.0, &[2.0, 0.0]), rep(20.0, &[3.0, 0.0])];
        let (distance, _, area_b) = closest_pair(&a, &b, DistanceMetric::Cosine).unwrap();
        assert_eq!(distance, 0.0);
        assert_eq!(area_b.as_ref().map(|f| f.x), Some(10.0));
    }

    #[test]
    fn test_closest_pair_empty_side() {
        let a = [rep(1.0, &[1.0, 0.0])];
        assert!(closest_pair(&a, &[], DistanceMetric::Cosine).is_none());
        assert!(closest_pair(&[], &a, DistanceMetric::Cosine).is_none());
    }

    #[test]
    fn test_closest_pair_whole_image_fallback_has_no_area() {
        let a = [(None, Embedding { values: vec![1.0, 2.0], model_version: None })];
        let b = [rep(5.0, &[1.0, 2.0])];
        let (distance, area_a, area_b) = closest_pair(&a, &b, DistanceMetric::EuclideanL2).unwrap();
        assert!(distance.abs() < 1e-9);
        assert!(area_a.is_none());
        assert!(area_b.is_some());
    }

    #[test]
    fn test_pair_at_threshold_verifies() {
        let model = RecognitionModel::Sface;
        let metric = DistanceMetric::Euclidean;
        let threshold = model.threshold(metric);
        let origin = [rep(1.0, &[0.0, 0.0])];

        let (near, _, _) = closest_pair(&origin, &[rep(2.0, &[3.0, 4.0])], metric).unwrap();
        assert_eq!(near, 5.0);
        assert!(model.verifies(near, metric));

        assert!(model.verifies(threshold, metric));
        assert!(!model.verifies(threshold + 1e-9, metric));

        let (far, _, _) = closest_pair(&origin, &[rep(3.0, &[11.0, 0.0])], metric).unwrap();
        assert!(!model.verifies(far, metric));
    }

    #[test]
    fn test_crop_face_inside() {
        let mut image = RgbImage::new(100, 80);
        image.put_pixel(20, 10, Rgb([255, 0, 0]));
        let crop = crop_face(&image, &area(20.0, 10.0, 30.0, 40.0));
        assert_eq!(crop.dimensions(), (30, 40));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_crop_face_clamped_to_bounds() {
        let image = RgbImage::new(100, 80);
        let crop = crop_face(&image, &area(-15.0, 60.0, 50.0, 50.0));
        assert_eq!(crop.dimensions(), (35, 20));
    }

    #[test]
    fn test_crop_face_degenerate_area() {
        let image = RgbImage::new(10, 10);
        let crop = crop_face(&image, &area(500.0, 500.0, 0.0, 0.0));
        assert_eq!(crop.dimensions(), (1, 1));
    }

    #[test]
    fn test_load_rgb_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jpg");
        let err = load_rgb(&path).unwrap_err();
        assert!(matches!(err, AnalyzerError::ImageLoad { .. }));
        assert!(err.to_string().contains("absent.jpg"));
    }

    #[test]
    fn test_load_rgb_converts_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(4, 3, image::Luma([77])).save(&path).unwrap();
        let rgb = load_rgb(&path).unwrap();
        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }

    #[test]
    fn test_load_without_models_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyzerConfig {
            model_dir: dir.path().to_path_buf(),
            ..AnalyzerConfig::default()
        };
        let err = OnnxAnalyzer::load(config).err().expect("no models on disk");
        match err {
            AnalyzerError::Unavailable(msg) => assert!(msg.contains("det_500m.onnx"), "{msg}"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert_eq!(Backends::default().detector.file_name(), "det_500m.onnx");
    }
}

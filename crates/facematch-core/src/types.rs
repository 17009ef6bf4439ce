use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (128-dimensional for SFace, 512 for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "sface_2021dec").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity, clamped to [-1, 1]. Higher = more similar.
    ///
    /// Accumulates in f64 so the result prints without f32 widening noise.
    pub fn similarity(&self, other: &Embedding) -> f64 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { (dot / denom).clamp(-1.0, 1.0) } else { 0.0 }
    }

    /// Cosine distance in [0, 2]: `1 - similarity`.
    pub fn cosine_distance(&self, other: &Embedding) -> f64 {
        (1.0 - self.similarity(other)).max(0.0)
    }

    /// Euclidean distance between the raw embedding values.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean distance after L2-normalizing both embeddings.
    pub fn euclidean_l2_distance(&self, other: &Embedding) -> f64 {
        let norm = |values: &[f32]| values.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>().sqrt();
        let (norm_a, norm_b) = (norm(&self.values), norm(&other.values));
        let unit = |x: f32, n: f64| if n > 0.0 { f64::from(x) / n } else { f64::from(x) };

        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (unit(a, norm_a) - unit(b, norm_b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Copy of this embedding scaled to unit length. Zero vectors are returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }

    /// Distance under the given metric.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f64 {
        match metric {
            DistanceMetric::Cosine => self.cosine_distance(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => self.euclidean_l2_distance(other),
        }
    }
}

/// Distance metric used to compare two embeddings during verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "euclidean_l2" => Ok(Self::EuclideanL2),
            _ => Err(UnknownVariant::new("distance metric", s)),
        }
    }
}

/// Face-embedding network used for verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionModel {
    /// OpenCV zoo SFace: small and fast, 128-dim output.
    #[default]
    Sface,
    /// InsightFace ArcFace w600k_r50: heavier, 512-dim output.
    Arcface,
}

impl RecognitionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sface => "sface",
            Self::Arcface => "arcface",
        }
    }

    /// ONNX file name looked up in the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Sface => "face_recognition_sface_2021dec.onnx",
            Self::Arcface => "w600k_r50.onnx",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            Self::Sface => "sface_2021dec",
            Self::Arcface => "w600k_r50",
        }
    }

    pub fn embedding_dim(&self) -> usize {
        match self {
            Self::Sface => 128,
            Self::Arcface => 512,
        }
    }

    /// Per-channel `(mean, std)` applied to 0..255 RGB input.
    pub fn normalization(&self) -> (f32, f32) {
        match self {
            // SFace consumes raw pixel values.
            Self::Sface => (0.0, 1.0),
            Self::Arcface => (127.5, 127.5),
        }
    }

    /// Whether raw network outputs are scaled to unit length before use.
    ///
    /// w600k_r50 emits vectors with norms in the 20s, so a raw euclidean
    /// threshold would depend on the norm. SFace's euclidean threshold is
    /// calibrated on its raw outputs.
    pub fn normalizes_output(&self) -> bool {
        matches!(self, Self::Arcface)
    }

    /// Decision threshold: distances at or below it verify as the same identity.
    ///
    /// SFace values are the OpenCV zoo / DeepFace calibration on raw outputs.
    /// ArcFace cosine and euclidean_l2 follow DeepFace; both are scale
    /// invariant. Its euclidean threshold equals euclidean_l2 because the
    /// embeddings are already unit length (see [`Self::normalizes_output`]).
    pub fn threshold(&self, metric: DistanceMetric) -> f64 {
        match (self, metric) {
            (Self::Sface, DistanceMetric::Cosine) => 0.593,
            (Self::Sface, DistanceMetric::Euclidean) => 10.734,
            (Self::Sface, DistanceMetric::EuclideanL2) => 1.055,
            (Self::Arcface, DistanceMetric::Cosine) => 0.68,
            (Self::Arcface, DistanceMetric::Euclidean | DistanceMetric::EuclideanL2) => 1.13,
        }
    }

    /// Distances at or below the threshold verify; the boundary itself counts.
    pub fn verifies(&self, distance: f64, metric: DistanceMetric) -> bool {
        distance <= self.threshold(metric)
    }
}

impl fmt::Display for RecognitionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecognitionModel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sface" => Ok(Self::Sface),
            "arcface" => Ok(Self::Arcface),
            _ => Err(UnknownVariant::new("recognition model", s)),
        }
    }
}

/// SCRFD detector variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// SCRFD-500MF with keypoints: the fast one.
    #[default]
    #[serde(rename = "scrfd_500m")]
    Scrfd500m,
    /// SCRFD-10GF with keypoints: slower, more accurate on small faces.
    #[serde(rename = "scrfd_10g")]
    Scrfd10g,
}

impl DetectorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrfd500m => "scrfd_500m",
            Self::Scrfd10g => "scrfd_10g",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Scrfd500m => "det_500m.onnx",
            Self::Scrfd10g => "det_10g.onnx",
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorBackend {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrfd_500m" => Ok(Self::Scrfd500m),
            "scrfd_10g" => Ok(Self::Scrfd10g),
            _ => Err(UnknownVariant::new("detector", s)),
        }
    }
}

/// Parse failure for one of the named-variant enums above.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

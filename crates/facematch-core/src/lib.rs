//! facematch-core — Face verification and detection engine.
//!
//! SCRFD finds faces, a similarity transform aligns them, and SFace or
//! ArcFace turns them into embeddings, all on ONNX Runtime. The
//! [`commands`] module folds analyzer results into the flat records the
//! `face_compare` binary prints.

pub mod alignment;
pub mod analyzer;
pub mod commands;
pub mod detector;
pub mod onnx;
pub mod recognizer;
pub mod types;

pub use analyzer::{
    default_model_dir, AnalyzerConfig, AnalyzerError, Backends, ExtractOptions, ExtractedFace,
    FaceAnalyzer, Verification, VerifyOptions,
};
pub use commands::{ComparisonResult, DetectionResult, InvalidArguments, Outcome};
pub use detector::FaceDetector;
pub use onnx::OnnxAnalyzer;
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, DetectorBackend, DistanceMetric, Embedding, RecognitionModel};

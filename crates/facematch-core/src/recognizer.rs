//! Face-embedding extraction via ONNX Runtime.
//!
//! Runs SFace or ArcFace on 112×112 RGB crops. Crops come either from
//! landmark alignment or, when no face was found and detection is not
//! enforced, from the whole image resized.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding, RecognitionModel};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding network wrapper.
pub struct FaceRecognizer {
    session: Session,
    model: RecognitionModel,
}

impl FaceRecognizer {
    /// Load the ONNX file for `model` from the given path.
    pub fn load(
        model: RecognitionModel,
        model_path: &Path,
        intra_threads: usize,
    ) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            %model,
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, model })
    }

    /// Extract an embedding for a detected face, aligning it first.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        self.embed(&aligned)
    }

    /// Extract an embedding from the whole image, squashed to the input size.
    pub fn extract_unaligned(&mut self, image: &RgbImage) -> Result<Embedding, RecognizerError> {
        let resized = imageops::resize(image, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle);
        self.embed(&resized)
    }

    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(crop, self.model);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.model.embedding_dim();
        if raw_data.len() != expected {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {expected}-dim embedding from {}, got {}",
                self.model,
                raw_data.len()
            )));
        }

        Ok(finish_embedding(raw_data.to_vec(), self.model))
    }
}

/// Wrap raw network output, scaling it to unit length for models whose
/// thresholds assume that.
fn finish_embedding(values: Vec<f32>, model: RecognitionModel) -> Embedding {
    let embedding = Embedding {
        values,
        model_version: Some(model.version().to_string()),
    };
    if model.normalizes_output() {
        embedding.l2_normalized()
    } else {
        embedding
    }
}

/// Convert a 112×112 RGB crop into a normalized NCHW float tensor.
fn preprocess(crop: &RgbImage, model: RecognitionModel) -> Array4<f32> {
    let (mean, std) = model.normalization();
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in crop.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 - mean) / std;
        }
    }

    tensor
}

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::{ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use image::ImageReader;
use rollcall_core::{EmbedError, Embedding, FaceEmbedder};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// SCRFD detection followed by ArcFace embedding, one embedding per face.
pub struct OnnxFaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEmbedder {
    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, LoadError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect_and_embed(&mut self, image: &Path) -> Result<Vec<Embedding>, EmbedError> {
        let decode_error = |reason: String| EmbedError::Decode {
            path: image.display().to_string(),
            reason,
        };
        let decoded = ImageReader::open(image)
            .map_err(|e| decode_error(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| decode_error(e.to_string()))?
            .decode()
            .map_err(|e| decode_error(e.to_string()))?;
        let rgb = decoded.to_rgb8();

        let faces = self
            .detector
            .detect(&rgb)
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.recognizer.extract(&rgb, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::warn!(confidence = face.confidence, "face without landmarks skipped");
                }
                Err(e) => return Err(EmbedError::Inference(e.to_string())),
            }
        }

        tracing::debug!(
            path = %image.display(),
            faces = faces.len(),
            embeddings = embeddings.len(),
            "image embedded"
        );
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_detector_first() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxFaceEmbedder::load(dir.path()).err().unwrap();
        assert!(matches!(err, LoadError::Detector(DetectorError::ModelNotFound(_))));
        assert!(err.to_string().contains(SCRFD_MODEL_FILE));
    }
}

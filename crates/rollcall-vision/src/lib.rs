//! Face detection and embedding for Rollcall.
//!
//! SCRFD finds faces and their landmarks, each face is aligned to the ArcFace
//! template, and ArcFace turns it into a 512-dim embedding.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetector};
pub use embedder::{LoadError, OnnxFaceEmbedder};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::BoundingBox;

use std::path::PathBuf;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Cosine similarity at which two ArcFace embeddings count as the same person.
pub const ARCFACE_COSINE_THRESHOLD: f32 = 0.40;

/// Euclidean distance between unit vectors whose cosine similarity is
/// `cosine`: `‖a - b‖² = 2 - 2·cos`.
pub fn cosine_to_distance(cosine: f32) -> f32 {
    (2.0 - 2.0 * cosine.clamp(-1.0, 1.0)).sqrt()
}

/// Match tolerance for this crate's L2-normalized embeddings.
pub fn default_tolerance() -> f32 {
    cosine_to_distance(ARCFACE_COSINE_THRESHOLD)
}

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}

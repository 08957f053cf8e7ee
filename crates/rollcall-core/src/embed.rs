use crate::types::Embedding;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("cannot decode image {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("embedding extraction failed: {0}")]
    Inference(String),
}

/// Face detection + embedding capability.
///
/// Returns one embedding per detected face, strongest detection first. An
/// image without faces yields an empty list, not an error.
pub trait FaceEmbedder: Send {
    fn detect_and_embed(&mut self, image: &Path) -> Result<Vec<Embedding>, EmbedError>;
}

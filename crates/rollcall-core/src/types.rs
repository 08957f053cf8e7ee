use serde::{Deserialize, Serialize};

/// Face embedding vector produced by the embedding capability.
///
/// Immutable once created: the only way to get one is [`Embedding::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimensionality come from different models and
    /// are never comparable, so their distance is `f32::INFINITY`.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A known person in the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Unique key within a gallery.
    pub name: String,
    pub roll_number: String,
    pub embedding: Embedding,
}

/// Outcome of classifying one query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest gallery identity (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Name of the accepted identity (if any).
    pub name: Option<String>,
}

impl MatchResult {
    pub fn unrecognized(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            name: None,
        }
    }
}

//! Gallery of known identities and its on-disk blob.

use crate::fsutil;
use crate::types::{Embedding, Identity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery blob {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Ordered set of identities, at most one per name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an identity unless the name is already present.
    ///
    /// Returns `false` when an earlier entry with the same name was kept.
    pub fn insert(&mut self, identity: Identity) -> bool {
        if self.contains(&identity.name) {
            return false;
        }
        self.identities.push(identity);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.iter().any(|i| i.name == name)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Roll number registered for `name`, or `""` when unknown.
    pub fn roll_number(&self, name: &str) -> &str {
        self.identities
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.roll_number.as_str())
            .unwrap_or("")
    }

    /// Name → roll number mapping for the ledger.
    pub fn roll_lookup(&self) -> HashMap<String, String> {
        self.identities
            .iter()
            .map(|i| (i.name.clone(), i.roll_number.clone()))
            .collect()
    }
}

/// Serialized shape of the gallery: parallel `encodings`/`names` plus a roll-number map.
#[derive(Debug, Serialize, Deserialize)]
struct GalleryBlob {
    encodings: Vec<Embedding>,
    names: Vec<String>,
    roll_numbers: BTreeMap<String, String>,
}

impl From<&Gallery> for GalleryBlob {
    fn from(gallery: &Gallery) -> Self {
        Self {
            encodings: gallery.identities.iter().map(|i| i.embedding.clone()).collect(),
            names: gallery.identities.iter().map(|i| i.name.clone()).collect(),
            roll_numbers: gallery
                .identities
                .iter()
                .map(|i| (i.name.clone(), i.roll_number.clone()))
                .collect(),
        }
    }
}

/// File-backed persistence for a [`Gallery`].
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the persisted gallery in full.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let blob = GalleryBlob::from(gallery);
        let bytes = serde_json::to_vec(&blob)?;
        fsutil::write_atomically(&self.path, &bytes)?;
        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery saved"
        );
        Ok(())
    }

    /// Load the persisted gallery. A missing blob is the cold-start state and
    /// yields an empty gallery.
    pub fn load(&self) -> Result<Gallery, GalleryError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery yet; starting empty");
                return Ok(Gallery::new());
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| GalleryError::Corrupt {
            path: self.path.display().to_string(),
            reason,
        };

        let blob: GalleryBlob = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if blob.encodings.len() != blob.names.len() {
            return Err(corrupt(format!(
                "{} encodings for {} names",
                blob.encodings.len(),
                blob.names.len()
            )));
        }

        let mut gallery = Gallery::new();
        for (name, embedding) in blob.names.into_iter().zip(blob.encodings) {
            let roll_number = blob.roll_numbers.get(&name).cloned().unwrap_or_default();
            gallery.insert(Identity {
                name,
                roll_number,
                embedding,
            });
        }

        tracing::debug!(path = %self.path.display(), identities = gallery.len(), "gallery loaded");
        Ok(gallery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, roll: &str, values: Vec<f32>) -> Identity {
        Identity {
            name: name.into(),
            roll_number: roll.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_insert_first_wins() {
        let mut gallery = Gallery::new();
        assert!(gallery.insert(identity("Alice", "1", vec![1.0, 0.0])));
        assert!(!gallery.insert(identity("Alice", "9", vec![0.0, 1.0])));
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.roll_number("Alice"), "1");
        assert_eq!(gallery.identities()[0].embedding.values(), &[1.0, 0.0]);
    }

    #[test]
    fn test_roll_number_unknown_is_empty() {
        let gallery = Gallery::new();
        assert_eq!(gallery.roll_number("Nobody"), "");
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("model.json"));
        let gallery = store.load().unwrap();
        assert!(gallery.is_empty());
        // cold-start load must not create the blob
        assert!(!store.path().exists());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("model.json"));

        let mut gallery = Gallery::new();
        gallery.insert(identity("Bob", "2", vec![0.25, -0.5, 1.0]));
        gallery.insert(identity("Alice", "1", vec![0.1, 0.2, 0.3]));
        gallery.insert(identity("Carol", "", vec![-1.0, 0.0, 0.0]));

        store.save(&gallery).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, gallery);

        // idempotent
        assert_eq!(store.load().unwrap(), loaded);
    }

    #[test]
    fn test_save_replaces_previous_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("model.json"));

        let mut first = Gallery::new();
        first.insert(identity("Alice", "1", vec![1.0]));
        first.insert(identity("Bob", "2", vec![2.0]));
        store.save(&first).unwrap();

        let mut second = Gallery::new();
        second.insert(identity("Carol", "3", vec![3.0]));
        store.save(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("Carol"));
        assert!(!loaded.contains("Alice"));
    }

    #[test]
    fn test_blob_layout() {
        let mut gallery = Gallery::new();
        gallery.insert(identity("Alice", "1", vec![0.5]));
        let json = serde_json::to_value(GalleryBlob::from(&gallery)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "encodings": [[0.5]],
                "names": ["Alice"],
                "roll_numbers": {"Alice": "1"},
            })
        );
    }

    #[test]
    fn test_load_mismatched_lengths_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"encodings": [[1.0], [2.0]], "names": ["Alice"], "roll_numbers": {}}"#,
        )
        .unwrap();
        let err = GalleryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, GalleryError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"\x80\x04pickle").unwrap();
        let err = GalleryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, GalleryError::Corrupt { .. }), "got {err:?}");
    }
}

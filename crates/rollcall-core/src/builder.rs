//! Builds a gallery from a parsed roster.

use crate::embed::FaceEmbedder;
use crate::gallery::Gallery;
use crate::resolver::{cache_file_name, ImageResolver};
use crate::roster::RosterRow;
use crate::types::Identity;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a roster row did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    BlankName,
    Resolution(String),
    Embedding(String),
    NoFace,
    DuplicateName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BlankName => write!(f, "blank name"),
            SkipReason::Resolution(e) => write!(f, "image unavailable: {e}"),
            SkipReason::Embedding(e) => write!(f, "embedding failed: {e}"),
            SkipReason::NoFace => write!(f, "no face found"),
            SkipReason::DuplicateName => write!(f, "duplicate name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: usize,
    pub name: String,
    pub reason: SkipReason,
}

/// Result of one training pass.
#[derive(Debug)]
pub struct BuildReport {
    pub gallery: Gallery,
    pub rows: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Turns roster rows into a fresh gallery.
///
/// Reference photos are cached under `image_dir` as `<name>.jpg`; a cached
/// photo is reused instead of being downloaded again.
pub struct GalleryBuilder<'a> {
    image_dir: &'a Path,
    embedder: &'a mut dyn FaceEmbedder,
    resolver: &'a dyn ImageResolver,
}

impl<'a> GalleryBuilder<'a> {
    pub fn new(
        image_dir: &'a Path,
        embedder: &'a mut dyn FaceEmbedder,
        resolver: &'a dyn ImageResolver,
    ) -> Self {
        Self {
            image_dir,
            embedder,
            resolver,
        }
    }

    pub fn build(&mut self, roster: &[RosterRow]) -> BuildReport {
        let mut gallery = Gallery::new();
        let mut skipped = Vec::new();

        for row in roster {
            match self.process_row(row, &gallery) {
                Ok(identity) => {
                    tracing::debug!(line = row.line, name = %identity.name, "identity enrolled");
                    gallery.insert(identity);
                }
                Err(reason) => {
                    tracing::warn!(line = row.line, name = %row.name, %reason, "skipping roster row");
                    skipped.push(SkippedRow {
                        line: row.line,
                        name: row.name.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            rows = roster.len(),
            enrolled = gallery.len(),
            skipped = skipped.len(),
            "gallery built"
        );

        BuildReport {
            gallery,
            rows: roster.len(),
            skipped,
        }
    }

    fn process_row(&mut self, row: &RosterRow, gallery: &Gallery) -> Result<Identity, SkipReason> {
        if row.name.is_empty() {
            return Err(SkipReason::BlankName);
        }
        // first occurrence of a name wins
        if gallery.contains(&row.name) {
            return Err(SkipReason::DuplicateName);
        }

        let image = self.resolve_image(row)?;

        let embeddings = self
            .embedder
            .detect_and_embed(&image)
            .map_err(|e| SkipReason::Embedding(e.to_string()))?;
        let embedding = embeddings.into_iter().next().ok_or(SkipReason::NoFace)?;

        Ok(Identity {
            name: row.name.clone(),
            roll_number: row.roll_number.clone(),
            embedding,
        })
    }

    fn resolve_image(&self, row: &RosterRow) -> Result<PathBuf, SkipReason> {
        let cached = self.image_dir.join(cache_file_name(&row.name));
        if cached.is_file() {
            tracing::debug!(name = %row.name, path = %cached.display(), "using cached image");
            return Ok(cached);
        }

        self.resolver
            .fetch(&row.image_url, &cached)
            .map_err(|e| SkipReason::Resolution(e.to_string()))?;

        if !cached.is_file() {
            return Err(SkipReason::Resolution(format!(
                "resolver produced no file at {}",
                cached.display()
            )));
        }
        Ok(cached)
    }
}

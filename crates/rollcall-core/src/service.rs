//! The three operator operations: train, recognize, view attendance.
//!
//! `AttendanceService` owns the in-memory gallery together with its store,
//! so the copy served to the matcher is always the one last persisted.

use crate::builder::{GalleryBuilder, SkippedRow};
use crate::embed::{EmbedError, FaceEmbedder};
use crate::gallery::{Gallery, GalleryError, GalleryStore};
use crate::ledger::{AttendanceLedger, LedgerError, LedgerState};
use crate::matcher::{Matcher, NearestMatcher};
use crate::resolver::ImageResolver;
use crate::roster::{parse_roster, RosterError};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ROSTER_EXTENSIONS: &[&str] = &["xlsx"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("malformed roster: {0}")]
    MalformedInput(String),
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Embedding(EmbedError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RosterError> for ServiceError {
    fn from(e: RosterError) -> Self {
        ServiceError::MalformedInput(e.to_string())
    }
}

impl From<EmbedError> for ServiceError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Decode { .. } => ServiceError::UnsupportedMedia(e.to_string()),
            other => ServiceError::Embedding(other),
        }
    }
}

/// Where the service keeps its files.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub gallery_path: PathBuf,
    pub ledger_path: PathBuf,
    pub image_dir: PathBuf,
    /// Scratch directory for uploaded query images.
    pub upload_dir: PathBuf,
}

impl StorageLayout {
    /// Standard layout under one data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self {
            gallery_path: data_dir.join("model.json"),
            ledger_path: data_dir.join("attendance.xlsx"),
            image_dir: data_dir.join("images"),
            upload_dir: data_dir.join("uploads"),
        }
    }
}

#[derive(Debug)]
pub struct TrainSummary {
    pub rows: usize,
    pub enrolled: usize,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug)]
pub struct RecognizeOutcome {
    pub faces_detected: usize,
    pub recognized_names: BTreeSet<String>,
    pub ledger: LedgerState,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub identities: usize,
    pub ledger: LedgerState,
    pub tolerance: f32,
}

pub struct AttendanceService {
    layout: StorageLayout,
    store: GalleryStore,
    gallery: Gallery,
    ledger: AttendanceLedger,
    embedder: Box<dyn FaceEmbedder>,
    resolver: Box<dyn ImageResolver>,
    matcher: Box<dyn Matcher + Send>,
    tolerance: f32,
}

impl AttendanceService {
    /// Create the storage directories and load whatever gallery is persisted.
    pub fn open(
        layout: StorageLayout,
        tolerance: f32,
        embedder: Box<dyn FaceEmbedder>,
        resolver: Box<dyn ImageResolver>,
    ) -> Result<Self, ServiceError> {
        for dir in [
            layout.gallery_path.parent(),
            layout.ledger_path.parent(),
            Some(layout.image_dir.as_path()),
            Some(layout.upload_dir.as_path()),
        ]
        .into_iter()
        .flatten()
        .filter(|d| !d.as_os_str().is_empty())
        {
            std::fs::create_dir_all(dir)?;
        }

        let store = GalleryStore::new(&layout.gallery_path);
        let gallery = store.load()?;
        tracing::info!(
            gallery = %layout.gallery_path.display(),
            identities = gallery.len(),
            tolerance,
            "attendance service ready"
        );

        Ok(Self {
            ledger: AttendanceLedger::new(&layout.ledger_path),
            layout,
            store,
            gallery,
            embedder,
            resolver,
            matcher: Box::new(NearestMatcher),
            tolerance,
        })
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            identities: self.gallery.len(),
            ledger: self.ledger.state(),
            tolerance: self.tolerance,
        }
    }

    /// Rebuild the gallery from an uploaded roster workbook.
    ///
    /// The new gallery replaces the old one in memory and on disk; nothing of
    /// the previous gallery survives.
    pub fn train(&mut self, roster: &[u8], filename: Option<&str>) -> Result<TrainSummary, ServiceError> {
        if let Some(name) = filename {
            if !has_extension(name, ROSTER_EXTENSIONS) {
                return Err(ServiceError::MalformedInput(format!(
                    "{name}: expected an .xlsx workbook"
                )));
            }
        }

        let rows = parse_roster(roster)?;
        let report = GalleryBuilder::new(&self.layout.image_dir, self.embedder.as_mut(), self.resolver.as_ref())
            .build(&rows);

        self.store.save(&report.gallery)?;
        self.gallery = report.gallery;

        Ok(TrainSummary {
            rows: report.rows,
            enrolled: self.gallery.len(),
            skipped: report.skipped,
        })
    }

    /// Recognize the faces in an uploaded snapshot and rewrite the ledger.
    pub fn recognize(&mut self, image: &[u8], filename: Option<&str>) -> Result<RecognizeOutcome, ServiceError> {
        self.recognize_at(image, filename, chrono::Local::now().naive_local())
    }

    pub fn recognize_at(
        &mut self,
        image: &[u8],
        filename: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<RecognizeOutcome, ServiceError> {
        let extension = check_image(image, filename)?;

        // Dropping the handle removes the file, on error paths too.
        let mut upload = tempfile::Builder::new()
            .prefix("snapshot-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(&self.layout.upload_dir)?;
        upload.write_all(image)?;
        upload.flush()?;

        let embeddings = self.embedder.detect_and_embed(upload.path())?;
        drop(upload);

        let recognized_names = self.matcher.recognize(&embeddings, &self.gallery, self.tolerance);
        tracing::info!(
            faces = embeddings.len(),
            recognized = recognized_names.len(),
            "snapshot processed"
        );

        let ledger = self
            .ledger
            .update(&recognized_names, &self.gallery.roll_lookup(), now)?;

        Ok(RecognizeOutcome {
            faces_detected: embeddings.len(),
            recognized_names,
            ledger,
        })
    }

    /// Bytes of the current attendance workbook.
    pub fn view_attendance(&self) -> Result<Vec<u8>, ServiceError> {
        self.ledger.read().map_err(|e| match e {
            LedgerError::NotFound(_) => ServiceError::NotFound("Attendance file not found".into()),
            other => other.into(),
        })
    }
}

fn has_extension(filename: &str, allowed: &[&str]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// Reject anything that is not a JPEG or PNG before it reaches the embedder.
/// Returns the extension to stage the upload under.
fn check_image(bytes: &[u8], filename: Option<&str>) -> Result<&'static str, ServiceError> {
    if let Some(name) = filename {
        if !has_extension(name, IMAGE_EXTENSIONS) {
            return Err(ServiceError::UnsupportedMedia(format!(
                "{name}: expected .jpg, .jpeg or .png"
            )));
        }
    }
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => Ok("jpg"),
        Ok(image::ImageFormat::Png) => Ok("png"),
        Ok(other) => Err(ServiceError::UnsupportedMedia(format!(
            "{other:?} images are not accepted"
        ))),
        Err(_) => Err(ServiceError::UnsupportedMedia("content is not an image".into())),
    }
}

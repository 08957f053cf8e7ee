//! rollcall-core: face gallery, matching and attendance ledger.
//!
//! Builds an embedding gallery from a roster workbook, matches snapshot
//! embeddings against it, and keeps an xlsx attendance file holding the most
//! recent recognition result.

pub mod builder;
pub mod embed;
mod fsutil;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod resolver;
pub mod roster;
pub mod service;
mod sheet;
pub mod types;

pub use builder::{BuildReport, GalleryBuilder, SkipReason, SkippedRow};
pub use embed::{EmbedError, FaceEmbedder};
pub use gallery::{Gallery, GalleryError, GalleryStore};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, LedgerState};
pub use matcher::{Matcher, NearestMatcher, DEFAULT_TOLERANCE};
pub use resolver::{HttpImageResolver, ImageResolver, ResolutionError};
pub use roster::{parse_roster, RosterError, RosterRow};
pub use service::{AttendanceService, RecognizeOutcome, ServiceError, ServiceStatus, StorageLayout, TrainSummary};
pub use types::{Embedding, Identity, MatchResult};

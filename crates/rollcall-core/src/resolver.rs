//! Fetching roster reference photos.

use crate::fsutil;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("row has no image url")]
    EmptyUrl,
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("download of {0} returned an empty body")]
    EmptyBody(String),
    #[error("cannot store image: {0}")]
    Io(#[from] std::io::Error),
}

/// Places the image behind `url` at `dest`.
pub trait ImageResolver: Send {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), ResolutionError>;
}

/// Downloads images over HTTP(S) with a blocking client.
///
/// Must be constructed and used off the async runtime (the daemon builds it
/// on the engine thread).
pub struct HttpImageResolver {
    client: reqwest::blocking::Client,
}

impl HttpImageResolver {
    pub fn new(timeout: Duration) -> Result<Self, ResolutionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rollcall/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ImageResolver for HttpImageResolver {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), ResolutionError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ResolutionError::EmptyUrl);
        }
        let url = direct_download_url(url);

        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes()?;
        if body.is_empty() {
            return Err(ResolutionError::EmptyBody(url));
        }

        fsutil::write_atomically(dest, &body)?;
        tracing::debug!(%url, dest = %dest.display(), bytes = body.len(), "image downloaded");
        Ok(())
    }
}

/// Rewrite Google Drive share links (`/file/d/<id>/view`) to their direct
/// download form. Other URLs pass through unchanged.
pub fn direct_download_url(url: &str) -> String {
    if !url.contains("drive.google.com") {
        return url.to_string();
    }
    let id = url
        .split_once("/d/")
        .and_then(|(_, rest)| rest.split(['/', '?', '#']).next())
        .filter(|id| !id.is_empty());
    match id {
        Some(id) => format!("https://drive.google.com/uc?export=download&id={id}"),
        None => url.to_string(),
    }
}

/// File name under the image cache for a roster name.
///
/// Letters and digits in any script are kept. When anything else had to be
/// replaced, a short digest of the raw name is appended so distinct names
/// never share a cached photo.
pub fn cache_file_name(name: &str) -> String {
    let name = name.trim();
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // never let a name resolve to "." or ".." style paths
    let stem = stem.trim_start_matches('.');
    if !stem.is_empty() && stem == name {
        return format!("{stem}.jpg");
    }

    let digest = Sha256::digest(name.as_bytes());
    let tag: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    let stem = if stem.is_empty() { "_" } else { stem };
    format!("{stem}-{tag}.jpg")
}

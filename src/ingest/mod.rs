//! Upload ingestion.
//!
//! The upload store is the producer side of the pipeline. It is responsible
//! for:
//! - Accepting PNG uploads only (by name and by content)
//! - Persisting each upload under a collision-free `captured_image_<n>.png`
//! - Enqueuing the stored path for the workers
//!
//! The store MUST NOT:
//! - Classify or actuate anything itself
//! - Report classification outcomes to the uploader
//! - Backfill images that were on disk before startup

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::ImageFormat;
use regex::Regex;
use thiserror::Error;

use crate::queue::{EnqueueError, WorkQueue};

const IMAGE_PREFIX: &str = "captured_image_";
const MAX_NAME_ATTEMPTS: u32 = 64;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No selected file")]
    MissingFilename,
    #[error("Only PNG images are allowed")]
    NotPng,
    #[error("Uploaded file is not a valid PNG image")]
    InvalidImage,
    #[error("Error saving file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image saved but not queued: {0}")]
    Queue(#[from] EnqueueError),
}

impl UploadError {
    /// True when the uploader sent something unacceptable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::MissingFilename | UploadError::NotPng | UploadError::InvalidImage
        )
    }
}

/// Directory of uploaded images.
#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Open the store, creating the directory when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create upload dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One past the highest `captured_image_<n>.png` present, or 1.
    pub fn next_image_number(&self) -> std::io::Result<u64> {
        let mut highest = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(n) = entry.file_name().to_str().and_then(parse_image_number) {
                highest = highest.max(n);
            }
        }
        Ok(highest + 1)
    }

    /// Validate and persist an upload. Returns the stored path.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, UploadError> {
        validate_upload(filename, bytes)?;

        let mut number = self.next_image_number()?;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(format!("{IMAGE_PREFIX}{number}.png"));
            // create_new keeps concurrent uploads from overwriting each other.
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    file.sync_all()?;
                    log::info!("stored upload {:?} as {}", filename, path.display());
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    number += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(UploadError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not find a free image name",
        )))
    }

    /// Save the upload and hand it to the workers.
    ///
    /// A queue rejection leaves the stored file in place.
    pub fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        queue: &WorkQueue,
    ) -> Result<PathBuf, UploadError> {
        let path = self.save(filename, bytes)?;
        queue.enqueue_path(path.clone())?;
        log::debug!("queued {} (depth {})", path.display(), queue.len());
        Ok(path)
    }
}

fn validate_upload(filename: &str, bytes: &[u8]) -> Result<(), UploadError> {
    if filename.trim().is_empty() {
        return Err(UploadError::MissingFilename);
    }
    if !filename.to_lowercase().ends_with(".png") {
        return Err(UploadError::NotPng);
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok(()),
        _ => Err(UploadError::InvalidImage),
    }
}

fn parse_image_number(name: &str) -> Option<u64> {
    static IMAGE_NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = IMAGE_NAME_RE.get_or_init(|| {
        Regex::new(r"^captured_image_(\d+)\.png$").expect("static image name pattern")
    });
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn parses_only_captured_image_names() {
        assert_eq!(parse_image_number("captured_image_7.png"), Some(7));
        assert_eq!(parse_image_number("captured_image_12.png"), Some(12));
        assert_eq!(parse_image_number("captured_image_x.png"), None);
        assert_eq!(parse_image_number("captured_image_3.png.bak"), None);
        assert_eq!(parse_image_number("photo.png"), None);
    }

    #[test]
    fn numbering_continues_after_highest_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();
        assert_eq!(store.next_image_number().unwrap(), 1);

        std::fs::write(dir.path().join("captured_image_2.png"), b"x").unwrap();
        std::fs::write(dir.path().join("captured_image_9.png"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(store.next_image_number().unwrap(), 10);

        let path = store.save("snap.PNG", PNG_MAGIC).unwrap();
        assert_eq!(path, dir.path().join("captured_image_10.png"));
        assert_eq!(std::fs::read(&path).unwrap(), PNG_MAGIC);
    }

    #[test]
    fn rejects_invalid_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.save("", PNG_MAGIC),
            Err(UploadError::MissingFilename)
        ));
        assert!(matches!(
            store.save("photo.jpg", PNG_MAGIC),
            Err(UploadError::NotPng)
        ));
        assert!(matches!(
            store.save("photo.png", b"GIF89a not a png"),
            Err(UploadError::InvalidImage)
        ));
        assert_eq!(store.next_image_number().unwrap(), 1);
    }

    #[test]
    fn ingest_enqueues_stored_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads")).unwrap();
        let queue = WorkQueue::unbounded();

        let path = store.ingest("cam.png", PNG_MAGIC, &queue).unwrap();
        let item = queue
            .dequeue(std::time::Duration::from_millis(10))
            .expect("queued item");
        assert_eq!(item.path(), path);
    }
}

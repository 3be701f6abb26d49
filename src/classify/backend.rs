use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier unreachable: {0}")]
    Transport(String),
    #[error("classifier returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),
}

/// Image bytes handed to a classifier.
#[derive(Clone, Debug)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, mime_type: &'static str) -> Self {
        Self { bytes, mime_type }
    }

    /// Read an image from disk, inferring the mime type from its extension.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            bytes,
            mime_type: mime_type_for(path),
        })
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// External vision capability.
///
/// Implementations may block for a full network round-trip. They are shared
/// across workers, so `classify` takes `&self`.
pub trait Classifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Ask for a label describing `image`.
    fn classify(&self, image: &ImageData, instruction: &str) -> Result<String, ClassificationError>;
}

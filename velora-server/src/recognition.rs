//! Plate recognition collaborator
//!
//! Vision/OCR runs in an external service and is treated as unreliable:
//! the recorder invokes it with a bounded timeout and a failure never
//! blocks fine creation (the fine is issued with plate "UNKNOWN").

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use velora_core::PlateRead;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("No recognizer configured")]
    Unavailable,

    #[error("Recognition failed: {0}")]
    Failed(String),
}

/// Capability boundary to the external recognition service
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<PlateRead, RecognitionError>;
}

/// Recognizer used when no external service is wired in.
///
/// Always fails, which downstream treats as "plate unknown".
pub struct NullRecognizer;

#[async_trait]
impl PlateRecognizer for NullRecognizer {
    async fn recognize(&self, _image: &Path) -> Result<PlateRead, RecognitionError> {
        Err(RecognitionError::Unavailable)
    }
}

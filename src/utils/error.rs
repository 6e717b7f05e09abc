use std::path::PathBuf;
use thiserror::Error;

/// Whole-pipeline failures. Per-fragment and per-field misses never show up
/// here: a bad fragment is dropped and an unresolved field is simply absent.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Could not read image at {0}")]
    ImageDecode(String),

    #[error("OCR failed to detect any text.")]
    NoTextDetected,

    #[error("Could not determine document type (not a KTP or SIM).")]
    UnsupportedDocument,

    #[error("Text recognition failed: {0}")]
    Recognition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocumentError {
    /// HTTP-style status code reported in the public response.
    pub fn status_code(&self) -> u16 {
        match self {
            DocumentError::BadRequest(_) => 400,
            DocumentError::FileNotFound(_) => 404,
            DocumentError::ImageDecode(_) => 404,
            DocumentError::NoTextDetected => 500,
            DocumentError::UnsupportedDocument => 400,
            DocumentError::Recognition(_) | DocumentError::Io(_) | DocumentError::Json(_) => 500,
        }
    }

    /// Message surfaced to callers. Internal failures are wrapped so the
    /// caller can tell them apart from extraction outcomes.
    pub fn public_message(&self) -> String {
        match self {
            DocumentError::Recognition(_) | DocumentError::Io(_) | DocumentError::Json(_) => {
                format!("An internal server error occurred: {}", self)
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(DocumentError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(DocumentError::FileNotFound(PathBuf::from("a.jpg")).status_code(), 404);
        assert_eq!(DocumentError::NoTextDetected.status_code(), 500);
        assert_eq!(DocumentError::UnsupportedDocument.status_code(), 400);
        assert_eq!(DocumentError::Recognition("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_internal_errors_are_wrapped() {
        let msg = DocumentError::Recognition("engine crashed".into()).public_message();
        assert!(msg.starts_with("An internal server error occurred"));
        assert_eq!(
            DocumentError::NoTextDetected.public_message(),
            "OCR failed to detect any text."
        );
    }
}

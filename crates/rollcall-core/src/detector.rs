//! Boundary to the external face detector / embedding extractor.
//!
//! The engine never looks at pixels. A [`Detector`] turns raw input bytes
//! into zero or more faces, each carrying a bounding box and a feature
//! vector.

use crate::types::DetectedFace;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    /// The detector could not be brought up. Unrecoverable for a session.
    #[error("detector initialization failed: {0}")]
    InitFailed(String),
    #[error("invalid input image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

impl DetectorError {
    /// Whether this failure should take a running session to `Error`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InitFailed(_))
    }
}

/// Face detector collaborator.
///
/// `prepare` is called once before the first `detect`, and again after a
/// failed `prepare`. Both calls are bounded by the implementation's own
/// timeout policy; the engine does not retry.
pub trait Detector: Send {
    fn prepare(&mut self) -> Result<(), DetectorError> {
        Ok(())
    }

    fn detect(&mut self, image: &[u8]) -> Result<Vec<DetectedFace>, DetectorError>;
}

#[derive(Deserialize)]
struct FacePayload {
    faces: Vec<DetectedFace>,
}

/// Detector for input that already carries extracted faces.
///
/// Used when embedding extraction runs in another process: each "image"
/// is a JSON document `{"faces": [{"bbox": {...}, "embedding": [...]}]}`.
#[derive(Debug, Default)]
pub struct PayloadDetector;

impl Detector for PayloadDetector {
    fn detect(&mut self, image: &[u8]) -> Result<Vec<DetectedFace>, DetectorError> {
        let payload: FacePayload = serde_json::from_slice(image)
            .map_err(|e| DetectorError::InvalidImage(format!("face payload: {e}")))?;
        Ok(payload.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_detector_parses_faces() {
        let json = br#"{"faces": [
            {"bbox": {"x1": 1.0, "y1": 2.0, "x2": 30.0, "y2": 40.0}, "embedding": [0.1, 0.2]}
        ]}"#;
        let faces = PayloadDetector.detect(json).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.x2, 30.0);
        assert_eq!(faces[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_payload_detector_empty_faces() {
        assert!(PayloadDetector.detect(br#"{"faces": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_payload_detector_rejects_garbage() {
        let err = PayloadDetector.detect(b"\x89PNG").unwrap_err();
        assert!(matches!(err, DetectorError::InvalidImage(_)));
        assert!(!err.is_fatal());
    }
}

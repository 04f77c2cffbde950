use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors about the shape of incoming biometric input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("no faces detected")]
    NoFacesDetected,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding has zero norm or non-finite values")]
    DegenerateVector,
}

/// Axis-aligned face bounding box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// L2-normalized face embedding.
///
/// Construction always normalizes, so similarity between two embeddings
/// is a plain dot product.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalize `values` to unit length.
    ///
    /// Rejects empty, all-zero and non-finite vectors.
    pub fn normalized(values: Vec<f32>) -> Result<Self, InputError> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return Err(InputError::DegenerateVector);
        }
        // Scale by the largest component first so the sum of squares can
        // neither overflow nor underflow.
        let max = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if max == 0.0 {
            return Err(InputError::DegenerateVector);
        }
        let norm = values.iter().map(|v| (v / max) * (v / max)).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(InputError::DegenerateVector);
        }
        Ok(Self {
            values: values.into_iter().map(|v| (v / max) / norm).collect(),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]; both sides are unit length.
    ///
    /// Always processes all dimensions.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum::<f32>()
            .clamp(-1.0, 1.0)
    }
}

/// One face reported by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Raw feature vector; normalized by the engine before matching.
    pub embedding: Vec<f32>,
}

/// Attendance status stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Late => "late",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown attendance status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for AttendanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "late" => Ok(Self::Late),
            "absent" => Ok(Self::Absent),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0]).unwrap();
        assert!((e.values()[0] - 0.6).abs() < 1e-6);
        assert!((e.values()[1] - 0.8).abs() < 1e-6);
        assert!((e.dot(&e) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_rejects_zero_vector() {
        assert_eq!(
            Embedding::normalized(vec![0.0, 0.0]),
            Err(InputError::DegenerateVector)
        );
    }

    #[test]
    fn test_normalized_extreme_magnitudes() {
        let big = Embedding::normalized(vec![1e20, 1e20]).unwrap();
        assert!((big.values()[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((big.dot(&big) - 1.0).abs() < 1e-6);

        let tiny = Embedding::normalized(vec![1e-25, 0.0]).unwrap();
        assert_eq!(tiny.values(), &[1.0, 0.0]);
    }

    #[test]
    fn test_normalized_rejects_nan() {
        assert_eq!(
            Embedding::normalized(vec![f32::NAN, 1.0]),
            Err(InputError::DegenerateVector)
        );
    }

    #[test]
    fn test_dot_orthogonal_and_opposite() {
        let a = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let b = Embedding::normalized(vec![0.0, 2.0]).unwrap();
        let c = Embedding::normalized(vec![-5.0, 0.0]).unwrap();
        assert!(a.dot(&b).abs() < 1e-6);
        assert!((a.dot(&c) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [AttendanceStatus::Present, AttendanceStatus::Late, AttendanceStatus::Absent] {
            assert_eq!(status.as_str().parse::<AttendanceStatus>().unwrap(), status);
        }
        assert!("tardy".parse::<AttendanceStatus>().is_err());
    }
}

//! Model-side data types: modality tags, dense matrices, normalization
//! statistics, the linear classifier and the persisted artifacts.

pub mod artifact;
pub mod classifier;
pub mod codec;
pub mod normalizer;
pub mod store;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use artifact::{Dataset, DistanceMetric, EarModel, ModelArtifact, Template, VoiceModel};
pub use classifier::{ClassOrigin, ClassWeights, LinearClassifier};
pub use normalizer::FeatureStats;
pub use store::ArtifactStore;

/// Biometric modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Voice,
    Ear,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Voice => "voice",
            Modality::Ear => "ear",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Modality::Voice),
            "ear" => Some(Modality::Ear),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dense row-major matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        let m = Self { rows, cols, data };
        m.check()?;
        Ok(m)
    }

    /// Shape consistency, used after decoding untrusted payloads
    pub fn check(&self) -> Result<()> {
        let expected = self
            .rows
            .checked_mul(self.cols)
            .ok_or_else(|| EngineError::Format("matrix shape overflows".to_string()))?;
        if self.data.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// `self · x`, where `x` has `cols` entries
    pub fn mul_vec(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.cols {
            return Err(EngineError::DimensionMismatch {
                expected: self.cols,
                got: x.len(),
            });
        }
        Ok((0..self.rows)
            .map(|r| self.row(r).iter().zip(x).map(|(a, b)| a * b).sum())
            .collect())
    }
}

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Per-dimension z-score statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl FeatureStats {
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.mean.len() != self.std.len() {
            return Err(EngineError::DimensionMismatch {
                expected: self.mean.len(),
                got: self.std.len(),
            });
        }
        if self.std.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(EngineError::Format(
                "standard deviations must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// `(x - mean) / std`; a zero std leaves the centred value unscaled
    pub fn normalize(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.dim() {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim(),
                got: x.len(),
            });
        }

        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| {
                let centred = v - m;
                if *s == 0.0 {
                    centred
                } else {
                    centred / s
                }
            })
            .collect())
    }
}

use super::GrayImage;
use crate::error::{EngineError, Result};
use crate::model::Matrix;
use serde::{Deserialize, Serialize};

/// Pretrained PCA + LDA projection for fixed-size ear images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarProjection {
    pub width: usize,
    pub height: usize,
    /// Mean image in [0, 1], `width * height` entries
    pub pca_mean: Vec<f64>,
    /// `components x (width * height)`
    pub pca: Matrix,
    /// `output_dim x components`
    pub lda: Matrix,
}

impl EarProjection {
    pub fn input_dim(&self) -> usize {
        self.width * self.height
    }

    pub fn output_dim(&self) -> usize {
        self.lda.rows
    }

    /// Shape consistency of all three stages
    pub fn validate(&self) -> Result<()> {
        self.pca.check()?;
        self.lda.check()?;

        let d = self.input_dim();
        if d == 0 {
            return Err(EngineError::Format("ear projection has zero input size".to_string()));
        }
        if self.pca_mean.len() != d {
            return Err(EngineError::DimensionMismatch {
                expected: d,
                got: self.pca_mean.len(),
            });
        }
        if self.pca.cols != d {
            return Err(EngineError::DimensionMismatch {
                expected: d,
                got: self.pca.cols,
            });
        }
        if self.lda.cols != self.pca.rows {
            return Err(EngineError::DimensionMismatch {
                expected: self.pca.rows,
                got: self.lda.cols,
            });
        }
        Ok(())
    }

    pub fn project(&self, image: &GrayImage) -> Result<Vec<f64>> {
        if image.width != self.width || image.height != self.height {
            return Err(EngineError::DimensionMismatch {
                expected: self.input_dim(),
                got: image.width * image.height,
            });
        }

        let centred: Vec<f64> = image
            .to_unit()
            .iter()
            .zip(&self.pca_mean)
            .map(|(x, m)| x - m)
            .collect();

        let reduced = self.pca.mul_vec(&centred)?;
        self.lda.mul_vec(&reduced)
    }
}

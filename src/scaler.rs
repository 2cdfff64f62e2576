//! Fitted standardization statistics.
//!
//! Maps raw feature vectors into the space the classifier was fit on:
//! `(x - mean[i]) / scale[i]` per feature. Pure functions over the fitted
//! arrays; no shared mutable state.

use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

/// Per-feature center/scale statistics, aligned 1:1 with the schema order.
///
/// `scale[i] == 0` is a degenerate artifact and is rejected when the bundle
/// is loaded, so scoring-time division is always well-defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerParams {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    fn check_len(&self, actual: usize) -> Result<(), ScoreError> {
        if actual != self.len() {
            return Err(ScoreError::DimensionMismatch {
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Standardize one raw vector.
    pub fn normalize(&self, raw: &[f64]) -> Result<Vec<f64>, ScoreError> {
        self.check_len(raw.len())?;
        Ok(raw
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (&m, &s))| (x - m) / s)
            .collect())
    }

    /// Invert [`normalize`](Self::normalize).
    pub fn denormalize(&self, normalized: &[f64]) -> Result<Vec<f64>, ScoreError> {
        self.check_len(normalized.len())?;
        Ok(normalized
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&z, (&m, &s))| z * s + m)
            .collect())
    }

    /// Standardize a batch of rows sharing one schema, in place.
    pub fn normalize_matrix(&self, rows: &mut [Vec<f64>]) -> Result<(), ScoreError> {
        for row in rows.iter_mut() {
            self.check_len(row.len())?;
            for (x, (&m, &s)) in row.iter_mut().zip(self.mean.iter().zip(&self.scale)) {
                *x = (*x - m) / s;
            }
        }
        Ok(())
    }
}

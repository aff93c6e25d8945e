//! Training criterion on estimated source amplitudes

use ndarray::{Array1, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use ss_core::{SepError, SepResult};

/// How per-sample losses combine over the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

/// Squared error summed over (bins, frames), averaged over sources
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Loss {
    reduction: Reduction,
}

impl L2Loss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Loss of each batch element, `(B,)`
    pub fn per_sample(
        &self,
        estimate: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
    ) -> SepResult<Array1<f32>> {
        if estimate.dim() != target.dim() {
            return Err(SepError::invalid_shape(
                format!("{:?}", target.shape()),
                estimate.shape(),
            ));
        }
        if estimate.is_empty() {
            return Err(SepError::invalid_shape(
                "non-empty (B, n_sources, bins, frames)",
                estimate.shape(),
            ));
        }

        let squared = (&estimate - &target).mapv(|e| e * e);
        let per_source = squared.sum_axis(Axis(3)).sum_axis(Axis(2));
        per_source
            .mean_axis(Axis(1))
            .ok_or_else(|| SepError::ProcessingFailed("empty source axis".into()))
    }

    /// Batch-reduced loss
    pub fn forward(
        &self,
        estimate: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
    ) -> SepResult<f32> {
        let losses = self.per_sample(estimate, target)?;
        match self.reduction {
            Reduction::Sum => Ok(losses.sum()),
            Reduction::Mean => losses
                .mean()
                .ok_or_else(|| SepError::ProcessingFailed("empty batch".into())),
        }
    }
}

//! Mask reconstruction from embeddings and attractors
//!
//! `logits[b, s, n] = Σ_k attractors[b, s, k] · embedding[b, k, n]`, then a
//! nonlinearity chosen once at construction:
//! - `Sigmoid`: independent masks in (0, 1), clamped to the nearest
//!   representable values inside the interval once f32 saturates
//! - `Softmax`: masks summing to one across sources at every bin
//! - `Identity`: raw similarities

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array4, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use ss_core::{SepError, SepResult, sigmoid, softmax_inplace};

use crate::attractor::{check_dim, check_embedding, flatten_bins, stack_batch};

/// Smallest sigmoid mask value (sigmoid goes subnormal, then 0, below about -87)
const SIGMOID_MIN: f32 = f32::MIN_POSITIVE;
/// Largest f32 below one (sigmoid rounds to 1 above about 17)
const SIGMOID_MAX: f32 = 1.0 - f32::EPSILON / 2.0;

/// Mask nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskNonlinear {
    #[default]
    Sigmoid,
    /// Softmax over the source axis
    Softmax,
    Identity,
}

impl MaskNonlinear {
    pub fn name(&self) -> &'static str {
        match self {
            MaskNonlinear::Sigmoid => "sigmoid",
            MaskNonlinear::Softmax => "softmax",
            MaskNonlinear::Identity => "identity",
        }
    }

    /// Whether masks across sources sum to one
    pub fn sums_to_one(&self) -> bool {
        matches!(self, MaskNonlinear::Softmax)
    }
}

impl FromStr for MaskNonlinear {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sigmoid" => Ok(MaskNonlinear::Sigmoid),
            "softmax" => Ok(MaskNonlinear::Softmax),
            "identity" | "none" => Ok(MaskNonlinear::Identity),
            other => Err(SepError::config(format!("unknown mask nonlinearity `{}`", other))),
        }
    }
}

impl fmt::Display for MaskNonlinear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Embeddings + attractors -> per-source masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskReconstructor {
    nonlinear: MaskNonlinear,
}

impl MaskReconstructor {
    pub fn new(nonlinear: MaskNonlinear) -> Self {
        Self { nonlinear }
    }

    /// Resolve the nonlinearity by name; unknown names fail here
    pub fn from_name(name: &str) -> SepResult<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn nonlinear(&self) -> MaskNonlinear {
        self.nonlinear
    }

    /// `embedding (B, K, bins, frames)` + `attractors (B, n_sources, K)`
    /// -> `masks (B, n_sources, bins, frames)`
    pub fn forward(
        &self,
        embedding: ArrayView4<'_, f32>,
        attractors: ArrayView3<'_, f32>,
    ) -> SepResult<Array4<f32>> {
        check_embedding(&embedding)?;
        let (batch_size, embed_dim, n_bins, n_frames) = embedding.dim();
        let (attr_batch, n_sources, attr_dim) = attractors.dim();
        check_dim("batch size", batch_size, attr_batch)?;
        check_dim("embedding dimension", embed_dim, attr_dim)?;
        if n_sources == 0 {
            return Err(SepError::config("attractor set is empty"));
        }

        let embedding = flatten_bins(embedding)?;
        let samples: Vec<_> = attractors.outer_iter().zip(embedding.outer_iter()).collect();
        let logits: Vec<Array2<f32>> = samples
            .into_par_iter()
            .map(|(attr, emb)| attr.dot(&emb))
            .collect();
        let mut masks = stack_batch(&logits)?;

        match self.nonlinear {
            MaskNonlinear::Sigmoid => {
                masks.mapv_inplace(|x| sigmoid(x).clamp(SIGMOID_MIN, SIGMOID_MAX))
            }
            MaskNonlinear::Softmax => softmax_inplace(&mut masks, Axis(1)),
            MaskNonlinear::Identity => {}
        }

        masks
            .into_shape_with_order((batch_size, n_sources, n_bins, n_frames))
            .map_err(|e| SepError::ProcessingFailed(format!("reshape failed: {}", e)))
    }
}

/// Multiply `(B, bins, frames)` mixture amplitudes by
/// `(B, n_sources, bins, frames)` masks.
pub fn apply_masks(
    mixture: ArrayView3<'_, f32>,
    masks: ArrayView4<'_, f32>,
) -> SepResult<Array4<f32>> {
    let (batch_size, n_bins, n_frames) = mixture.dim();
    let (mask_batch, _, mask_bins, mask_frames) = masks.dim();
    check_dim("batch size", batch_size, mask_batch)?;
    check_dim("frequency bins", n_bins, mask_bins)?;
    check_dim("time frames", n_frames, mask_frames)?;

    Ok(&masks * &mixture.insert_axis(Axis(1)))
}

//! Attractor estimation
//!
//! An attractor is the centroid, in embedding space, of the time-frequency
//! bins that belong to one source. Two ways to get them:
//! - supervised: weighted centroids of ground-truth assignment weights
//!   (`estimate_attractors`)
//! - unsupervised: fixed-iteration clustering of the embeddings
//!   (`AttractorClustering`)
//!
//! Embeddings are `(batch, K, bins, frames)`, assignments are
//! `(batch, n_sources, bins, frames)`, attractors are `(batch, n_sources, K)`.

mod clustering;
mod config;

pub use clustering::AttractorClustering;
pub use config::{Assignment, ClusterInit, ClusteringConfig};

use ndarray::{Array2, Array3, ArrayView2, ArrayView4, Axis};
use rayon::prelude::*;

use ss_core::{SepError, SepResult};

/// Weighted centroids for a single batch element.
///
/// `weights` is `(n_sources, N)`, `embedding` is `(K, N)`; the result is
/// `(n_sources, K)` with row `s` equal to
/// `Σ_n w[s,n]·e[:,n] / (Σ_n w[s,n] + eps)`.
pub fn weighted_centroids(
    weights: ArrayView2<'_, f32>,
    embedding: ArrayView2<'_, f32>,
    eps: f32,
) -> Array2<f32> {
    let numerator = weights.dot(&embedding.t());
    let denominator = weights.sum_axis(Axis(1)).mapv(|w| w + eps);
    numerator / &denominator.insert_axis(Axis(1))
}

/// Supervised attractors from ground-truth assignment weights.
///
/// A source whose weights are all zero in a sample gets the zero vector.
/// `eps` must be positive and finite.
pub fn estimate_attractors(
    embedding: ArrayView4<'_, f32>,
    assignment: ArrayView4<'_, f32>,
    eps: f32,
) -> SepResult<Array3<f32>> {
    check_embedding(&embedding)?;
    let (batch_size, _, n_bins, n_frames) = embedding.dim();
    let (assign_batch, n_sources, assign_bins, assign_frames) = assignment.dim();

    if n_sources == 0 {
        return Err(SepError::config("assignment has no sources"));
    }
    if !(eps.is_finite() && eps > 0.0) {
        return Err(SepError::config(format!(
            "`eps` must be a positive finite value, got {}",
            eps
        )));
    }
    check_dim("batch size", batch_size, assign_batch)?;
    check_dim("frequency bins", n_bins, assign_bins)?;
    check_dim("time frames", n_frames, assign_frames)?;

    let embedding = flatten_bins(embedding)?;
    let assignment = flatten_bins(assignment)?;

    let zero_weight = assignment
        .sum_axis(Axis(2))
        .iter()
        .filter(|&&w| w <= 0.0)
        .count();
    if zero_weight > 0 {
        log::debug!(
            "{} (sample, source) pairs have zero assignment weight",
            zero_weight
        );
    }

    let pairs: Vec<_> = assignment
        .outer_iter()
        .zip(embedding.outer_iter())
        .collect();
    let attractors: Vec<Array2<f32>> = pairs
        .into_par_iter()
        .map(|(weights, emb)| weighted_centroids(weights, emb, eps))
        .collect();

    stack_batch(&attractors)
}

/// `(B, C, F, T)` -> `(B, C, F*T)`, bins major
pub(crate) fn flatten_bins(x: ArrayView4<'_, f32>) -> SepResult<Array3<f32>> {
    let (b, c, f, t) = x.dim();
    x.to_shape((b, c, f * t))
        .map(|cow| cow.into_owned())
        .map_err(|e| SepError::ProcessingFailed(format!("reshape failed: {}", e)))
}

/// Stack per-sample results along a new batch axis
pub(crate) fn stack_batch(items: &[Array2<f32>]) -> SepResult<Array3<f32>> {
    let views: Vec<_> = items.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map_err(|e| SepError::ProcessingFailed(format!("stack failed: {}", e)))
}

pub(crate) fn check_embedding(embedding: &ArrayView4<'_, f32>) -> SepResult<()> {
    let (batch_size, embed_dim, n_bins, n_frames) = embedding.dim();
    if batch_size == 0 || embed_dim == 0 || n_bins * n_frames == 0 {
        return Err(SepError::invalid_shape(
            "(batch >= 1, K >= 1, bins >= 1, frames >= 1)",
            embedding.shape(),
        ));
    }
    Ok(())
}

pub(crate) fn check_dim(what: &'static str, expected: usize, got: usize) -> SepResult<()> {
    if expected != got {
        return Err(SepError::ShapeMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

//! # ss-ml
//!
//! Attractor-based source separation over spectrogram embeddings.
//!
//! ## Building blocks
//!
//! - **transform**: `Segment1d` / `OverlapAdd1d` chunking of long sequences
//! - **attractor**: supervised centroids and fixed-iteration clustering
//! - **mask**: attractor/embedding similarities to per-source masks
//! - **d2net**: densely-connected dilated convolution block
//! - **danet**: deep attractor network pipeline
//!
//! ## Training and evaluation support
//!
//! - **spectrogram**: STFT front end (realfft)
//! - **ideal_mask**: IBM / IRM / WFM targets and silence thresholding
//! - **criterion**: L2 loss on estimated amplitudes
//! - **metrics**: SDR and SDR improvement
//!
//! ## Tensor layout
//!
//! Batch first, `f32` throughout:
//! - embeddings `(B, K, bins, frames)`
//! - assignments and masks `(B, n_sources, bins, frames)`
//! - attractors `(B, n_sources, K)`

pub mod attractor;
pub mod criterion;
pub mod d2net;
pub mod danet;
pub mod ideal_mask;
pub mod mask;
pub mod metrics;
pub mod spectrogram;
pub mod transform;

pub use attractor::{
    Assignment, AttractorClustering, ClusterInit, ClusteringConfig, estimate_attractors,
    weighted_centroids,
};
pub use criterion::{L2Loss, Reduction};
pub use d2net::{D2Block, D2BlockSpec};
pub use danet::{D2Embedding, Danet, DanetConfig, DanetOutput, EmbeddingNetwork};
pub use ideal_mask::{IdealMask, apply_threshold_weight, ideal_mask, threshold_weight};
pub use mask::{MaskNonlinear, MaskReconstructor, apply_masks};
pub use metrics::{sdr, sdr_improvement};
pub use spectrogram::{Stft, StftConfig, WindowFn, from_magnitude_phase, magnitude_phase};
pub use transform::{OverlapAdd1d, Segment1d, pad_for_overlap_add, pad_for_segment, unpad};

pub use ss_core::{SepError, SepResult};

/// Training-recipe defaults
pub mod defaults {
    /// STFT length
    pub const FFT_SIZE: usize = 256;

    /// Embedding dimension K
    pub const EMBED_DIM: usize = 20;

    /// Clustering iterations at inference
    pub const ITER_CLUSTERING: usize = 10;

    /// Silence threshold for the supervised weight, in dB
    pub const THRESHOLD_DB: f32 = 40.0;
}

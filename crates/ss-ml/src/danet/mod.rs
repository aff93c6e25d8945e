//! Deep attractor network
//!
//! Amplitude spectrogram -> embeddings -> attractors -> masks.
//! During training the attractors are weighted centroids of the ideal
//! assignment; at inference they come from clustering.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ss_ml::danet::{Danet, DanetConfig, D2Embedding};
//! use ss_ml::d2net::D2BlockSpec;
//!
//! let config = DanetConfig::default();
//! let net = D2Embedding::new(&D2BlockSpec::default(), config.embed_dim, 0)?;
//! let danet = Danet::new(net, config)?;
//!
//! let output = danet.forward_clustering(mixture_amplitude.view())?;
//! let estimated = apply_masks(mixture_amplitude.view(), output.masks.view())?;
//! ```

mod config;
mod embedding;

pub use config::DanetConfig;
pub use embedding::D2Embedding;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};

use ss_core::{SepError, SepResult};

use crate::attractor::{AttractorClustering, check_dim, estimate_attractors};
use crate::ideal_mask::apply_threshold_weight;
use crate::mask::{MaskReconstructor, apply_masks};
use crate::spectrogram::{Stft, from_magnitude_phase, magnitude_phase};

/// Maps an amplitude spectrogram to per-bin embeddings
pub trait EmbeddingNetwork: Send + Sync {
    /// `(B, bins, frames)` -> `(B, K, bins, frames)`
    fn embed(&self, amplitude: ArrayView3<'_, f32>) -> SepResult<Array4<f32>>;

    /// Embedding dimension K
    fn embed_dim(&self) -> usize;

    /// Network name for logs
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Masks plus the attractors that produced them
#[derive(Debug, Clone)]
pub struct DanetOutput {
    /// `(B, n_sources, bins, frames)`
    pub masks: Array4<f32>,
    /// `(B, n_sources, K)`
    pub attractors: Array3<f32>,
}

/// Deep attractor network around an embedding network
pub struct Danet<E: EmbeddingNetwork> {
    network: E,
    config: DanetConfig,
    clustering: AttractorClustering,
    reconstructor: MaskReconstructor,
}

impl<E: EmbeddingNetwork> Danet<E> {
    pub fn new(network: E, config: DanetConfig) -> SepResult<Self> {
        config.validate()?;
        check_dim("embedding dimension", config.embed_dim, network.embed_dim())?;

        let clustering = AttractorClustering::new(config.clustering_config())?;
        let reconstructor = MaskReconstructor::new(config.mask_nonlinear);

        log::info!(
            "DANet: {} sources, K={}, mask {}, {} clustering iterations, network {}",
            config.n_sources,
            config.embed_dim,
            config.mask_nonlinear,
            config.iter_clustering,
            network.name()
        );

        Ok(Self {
            network,
            config,
            clustering,
            reconstructor,
        })
    }

    pub fn config(&self) -> &DanetConfig {
        &self.config
    }

    pub fn network(&self) -> &E {
        &self.network
    }

    /// Embeddings for `(B, bins, frames)` amplitudes, shape-checked
    pub fn embed(&self, mixture: ArrayView3<'_, f32>) -> SepResult<Array4<f32>> {
        let (batch_size, n_bins, n_frames) = mixture.dim();
        let embedding = self.network.embed(mixture)?;
        let (emb_batch, embed_dim, emb_bins, emb_frames) = embedding.dim();

        check_dim("batch size", batch_size, emb_batch)?;
        check_dim("embedding dimension", self.config.embed_dim, embed_dim)?;
        check_dim("frequency bins", n_bins, emb_bins)?;
        check_dim("time frames", n_frames, emb_frames)?;
        Ok(embedding)
    }

    /// Training path: attractors from the ideal `assignment`
    /// `(B, n_sources, bins, frames)`, optionally restricted to the bins
    /// selected by `threshold_weight` `(B, bins, frames)`.
    pub fn forward_supervised(
        &self,
        mixture: ArrayView3<'_, f32>,
        assignment: ArrayView4<'_, f32>,
        threshold_weight: Option<ArrayView3<'_, f32>>,
    ) -> SepResult<DanetOutput> {
        check_dim("number of sources", self.config.n_sources, assignment.dim().1)?;
        let embedding = self.embed(mixture)?;

        let attractors = match threshold_weight {
            Some(weight) => {
                let weighted = apply_threshold_weight(assignment, weight)?;
                estimate_attractors(embedding.view(), weighted.view(), self.config.eps)?
            }
            None => estimate_attractors(embedding.view(), assignment, self.config.eps)?,
        };

        let masks = self
            .reconstructor
            .forward(embedding.view(), attractors.view())?;
        Ok(DanetOutput { masks, attractors })
    }

    /// Inference path: attractors from clustering the embeddings
    pub fn forward_clustering(&self, mixture: ArrayView3<'_, f32>) -> SepResult<DanetOutput> {
        let embedding = self.embed(mixture)?;
        let attractors = self.clustering.run(embedding.view())?;
        let masks = self
            .reconstructor
            .forward(embedding.view(), attractors.view())?;
        Ok(DanetOutput { masks, attractors })
    }

    /// Estimated source amplitudes `(B, n_sources, bins, frames)`
    pub fn separate(&self, mixture: ArrayView3<'_, f32>) -> SepResult<Array4<f32>> {
        let output = self.forward_clustering(mixture)?;
        apply_masks(mixture, output.masks.view())
    }

    /// Mono waveform in, one waveform per source out. Masks are applied
    /// to the mixture amplitude; the mixture phase is reused.
    pub fn separate_waveform(&self, mixture: &[f32], stft: &Stft) -> SepResult<Vec<Vec<f32>>> {
        let spectrum = stft.forward(mixture)?;
        let (amplitude, phase) = magnitude_phase(spectrum.view());

        let batch = amplitude.insert_axis(Axis(0));
        let estimated = self.separate(batch.view())?;

        let mut sources = Vec::with_capacity(self.config.n_sources);
        for source_amplitude in estimated.index_axis(Axis(0), 0).outer_iter() {
            let spec = from_magnitude_phase(source_amplitude, phase.view())?;
            sources.push(stft.inverse(spec.view(), mixture.len())?);
        }

        if sources.len() != self.config.n_sources {
            return Err(SepError::ProcessingFailed(format!(
                "expected {} sources, produced {}",
                self.config.n_sources,
                sources.len()
            )));
        }
        Ok(sources)
    }
}

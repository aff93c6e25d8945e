//! DANet configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use ss_core::{EPS, SepError, SepResult, ensure_positive};

use crate::attractor::{Assignment, ClusterInit, ClusteringConfig};
use crate::defaults;
use crate::mask::MaskNonlinear;

/// Deep attractor network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DanetConfig {
    /// Number of sources (attractors)
    pub n_sources: usize,

    /// Embedding dimension K
    pub embed_dim: usize,

    /// Nonlinearity turning similarities into masks
    pub mask_nonlinear: MaskNonlinear,

    /// Clustering iterations at inference
    pub iter_clustering: usize,

    /// Clustering seeding rule
    pub init: ClusterInit,

    /// Clustering assignment rule
    pub assignment: Assignment,

    /// Centroid denominator guard
    pub eps: f32,
}

impl Default for DanetConfig {
    fn default() -> Self {
        Self {
            n_sources: 2,
            embed_dim: defaults::EMBED_DIM,
            mask_nonlinear: MaskNonlinear::Sigmoid,
            iter_clustering: defaults::ITER_CLUSTERING,
            init: ClusterInit::FirstEmbeddings,
            assignment: Assignment::Hard,
            eps: EPS,
        }
    }
}

impl DanetConfig {
    /// Few iterations, cheap seeding
    pub fn fast() -> Self {
        Self {
            iter_clustering: 3,
            ..Default::default()
        }
    }

    /// More iterations, spread-out seeding, masks summing to one
    pub fn accurate() -> Self {
        Self {
            mask_nonlinear: MaskNonlinear::Softmax,
            iter_clustering: 30,
            init: ClusterInit::FarthestPoint,
            ..Default::default()
        }
    }

    /// Resolve a preset by name
    pub fn preset(name: &str) -> SepResult<Self> {
        match name {
            "default" => Ok(Self::default()),
            "fast" => Ok(Self::fast()),
            "accurate" => Ok(Self::accurate()),
            other => Err(SepError::config(format!("unknown preset `{}`", other))),
        }
    }

    pub fn with_n_sources(mut self, n_sources: usize) -> Self {
        self.n_sources = n_sources;
        self
    }

    pub fn with_embed_dim(mut self, embed_dim: usize) -> Self {
        self.embed_dim = embed_dim;
        self
    }

    pub fn with_mask_nonlinear(mut self, mask_nonlinear: MaskNonlinear) -> Self {
        self.mask_nonlinear = mask_nonlinear;
        self
    }

    pub fn with_iter_clustering(mut self, iter_clustering: usize) -> Self {
        self.iter_clustering = iter_clustering;
        self
    }

    pub fn validate(&self) -> SepResult<()> {
        ensure_positive("embed_dim", self.embed_dim)?;
        self.clustering_config().validate()
    }

    /// Clustering settings derived from this config
    pub fn clustering_config(&self) -> ClusteringConfig {
        ClusteringConfig {
            n_sources: self.n_sources,
            iterations: self.iter_clustering,
            init: self.init,
            assignment: self.assignment,
            eps: self.eps,
        }
    }

    pub fn from_json(json: &str) -> SepResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> SepResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SepResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

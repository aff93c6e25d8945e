//! Clustering configuration

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ss_core::{EPS, SepError, SepResult, ensure_positive};

/// How the initial attractors are seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterInit {
    /// The first `n_sources` embedding vectors in (bin, frame) order
    #[default]
    FirstEmbeddings,
    /// First embedding, then repeatedly the embedding farthest (squared
    /// Euclidean) from every attractor chosen so far
    FarthestPoint,
    /// `n_sources` distinct embeddings drawn by a ChaCha8 generator seeded
    /// with `seed`, identically for every batch element
    Seeded { seed: u64 },
}

/// How similarities become assignment weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// One-hot on the closest attractor, scored as `e·a - |a|²/2`
    /// (equivalent to the smallest Euclidean distance)
    #[default]
    Hard,
    /// One-hot on the largest raw inner product `e·a`; favours attractors
    /// with a large norm, unlike `Hard`
    InnerProduct,
    /// Softmax of the inner products `e·a` over sources
    Soft,
}

impl FromStr for Assignment {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hard" => Ok(Assignment::Hard),
            "inner_product" | "dot" => Ok(Assignment::InnerProduct),
            "soft" => Ok(Assignment::Soft),
            other => Err(SepError::config(format!("unknown assignment `{}`", other))),
        }
    }
}

/// Unsupervised attractor estimation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Number of attractors (one per source)
    pub n_sources: usize,

    /// Fixed number of refinement iterations (no early stop)
    pub iterations: usize,

    /// Seeding rule
    pub init: ClusterInit,

    /// Assignment rule
    pub assignment: Assignment,

    /// Centroid denominator guard
    pub eps: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_sources: 2,
            iterations: 10,
            init: ClusterInit::default(),
            assignment: Assignment::default(),
            eps: EPS,
        }
    }
}

impl ClusteringConfig {
    pub fn new(n_sources: usize) -> Self {
        Self {
            n_sources,
            ..Default::default()
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_init(mut self, init: ClusterInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn validate(&self) -> SepResult<()> {
        ensure_positive("n_sources", self.n_sources)?;
        ensure_positive("iterations", self.iterations)?;
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(SepError::config(format!(
                "`eps` must be a positive finite value, got {}",
                self.eps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusteringConfig::default();
        assert_eq!(config.iterations, 10);
        assert_eq!(config.init, ClusterInit::FirstEmbeddings);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ClusteringConfig::new(0).validate().is_err());
        assert!(ClusteringConfig::new(2).with_iterations(0).validate().is_err());

        let mut config = ClusteringConfig::new(2);
        config.eps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_assignment_names() {
        assert_eq!("hard".parse::<Assignment>().unwrap(), Assignment::Hard);
        assert_eq!("dot".parse::<Assignment>().unwrap(), Assignment::InnerProduct);
        assert_eq!(
            "inner_product".parse::<Assignment>().unwrap(),
            Assignment::InnerProduct
        );
        assert!("nearest".parse::<Assignment>().is_err());
    }

    #[test]
    fn test_serde() {
        let config = ClusteringConfig::new(3).with_init(ClusterInit::Seeded { seed: 7 });
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"seeded\""));
        let back: ClusteringConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.init, ClusterInit::Seeded { seed: 7 });
        assert_eq!(back.n_sources, 3);
    }
}

//! Unsupervised attractor estimation
//!
//! k-means style refinement with `n_sources` clusters, run for a fixed
//! number of iterations:
//! 1. seed attractors (`ClusterInit`)
//! 2. score every embedding against every attractor by inner product
//! 3. turn scores into assignment weights over the source axis
//! 4. recompute attractors as weighted centroids
//!
//! There is no convergence test. Iterations are sequential; batch elements
//! are independent and run on the rayon pool.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis, s};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use ss_core::{SepError, SepResult, softmax_inplace};

use super::config::{Assignment, ClusterInit, ClusteringConfig};
use super::{check_dim, check_embedding, flatten_bins, stack_batch, weighted_centroids};

/// Fixed-iteration attractor clustering
#[derive(Debug, Clone)]
pub struct AttractorClustering {
    config: ClusteringConfig,
}

impl AttractorClustering {
    pub fn new(config: ClusteringConfig) -> SepResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn n_sources(&self) -> usize {
        self.config.n_sources
    }

    /// Cluster `(B, K, bins, frames)` embeddings into `(B, n_sources, K)`
    /// attractors.
    pub fn run(&self, embedding: ArrayView4<'_, f32>) -> SepResult<Array3<f32>> {
        check_embedding(&embedding)?;
        let (batch_size, embed_dim, n_bins, n_frames) = embedding.dim();
        let n_points = n_bins * n_frames;
        if n_points < self.config.n_sources {
            return Err(SepError::InvalidShape {
                expected: format!("at least {} time-frequency bins", self.config.n_sources),
                got: format!("{} bins", n_points),
            });
        }

        log::debug!(
            "clustering {} x {} embeddings (K={}) into {} attractors, {} iterations, {:?}/{:?}",
            batch_size,
            n_points,
            embed_dim,
            self.config.n_sources,
            self.config.iterations,
            self.config.init,
            self.config.assignment
        );

        let embedding = flatten_bins(embedding)?;
        let samples: Vec<_> = embedding.outer_iter().collect();
        let attractors: Vec<Array2<f32>> = samples
            .into_par_iter()
            .map(|emb| {
                let seeded = self.seed(emb);
                self.refine(emb, seeded)
            })
            .collect();

        stack_batch(&attractors)
    }

    /// Refine caller-provided `(B, n_sources, K)` attractors instead of
    /// seeding them.
    pub fn run_from(
        &self,
        embedding: ArrayView4<'_, f32>,
        initial: ArrayView3<'_, f32>,
    ) -> SepResult<Array3<f32>> {
        self.check_attractors(&embedding, &initial)?;

        let embedding = flatten_bins(embedding)?;
        let samples: Vec<_> = embedding.outer_iter().zip(initial.outer_iter()).collect();
        let attractors: Vec<Array2<f32>> = samples
            .into_par_iter()
            .map(|(emb, init)| self.refine(emb, init.to_owned()))
            .collect();

        stack_batch(&attractors)
    }

    /// Assignment weights `(B, n_sources, bins, frames)` of every bin to
    /// the given attractors, under the configured assignment rule.
    pub fn assign(
        &self,
        embedding: ArrayView4<'_, f32>,
        attractors: ArrayView3<'_, f32>,
    ) -> SepResult<Array4<f32>> {
        self.check_attractors(&embedding, &attractors)?;
        let (batch_size, _, n_bins, n_frames) = embedding.dim();

        let embedding = flatten_bins(embedding)?;
        let samples: Vec<_> = embedding.outer_iter().zip(attractors.outer_iter()).collect();
        let weights: Vec<Array2<f32>> = samples
            .into_par_iter()
            .map(|(emb, attr)| self.assignment_weights(emb, attr))
            .collect();

        stack_batch(&weights)?
            .into_shape_with_order((batch_size, self.config.n_sources, n_bins, n_frames))
            .map_err(|e| SepError::ProcessingFailed(format!("reshape failed: {}", e)))
    }

    fn check_attractors(
        &self,
        embedding: &ArrayView4<'_, f32>,
        attractors: &ArrayView3<'_, f32>,
    ) -> SepResult<()> {
        check_embedding(embedding)?;
        let (batch_size, embed_dim, _, _) = embedding.dim();
        let (attr_batch, attr_sources, attr_dim) = attractors.dim();
        check_dim("batch size", batch_size, attr_batch)?;
        check_dim("number of sources", self.config.n_sources, attr_sources)?;
        check_dim("embedding dimension", embed_dim, attr_dim)
    }

    /// Initial `(n_sources, K)` attractors for one `(K, N)` sample
    fn seed(&self, emb: ArrayView2<'_, f32>) -> Array2<f32> {
        let n_sources = self.config.n_sources;
        let n_points = emb.ncols();

        match self.config.init {
            ClusterInit::FirstEmbeddings => emb.slice(s![.., ..n_sources]).t().to_owned(),
            ClusterInit::FarthestPoint => {
                let mut chosen = vec![0usize];
                let mut min_dist = squared_distances(emb, emb.column(0).to_owned());
                while chosen.len() < n_sources {
                    let next = argmax(min_dist.view());
                    chosen.push(next);
                    let dist = squared_distances(emb, emb.column(next).to_owned());
                    min_dist.zip_mut_with(&dist, |m, &d| *m = m.min(d));
                }
                emb.select(Axis(1), &chosen).t().to_owned()
            }
            ClusterInit::Seeded { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let chosen = rand::seq::index::sample(&mut rng, n_points, n_sources).into_vec();
                emb.select(Axis(1), &chosen).t().to_owned()
            }
        }
    }

    fn refine(&self, emb: ArrayView2<'_, f32>, mut attractors: Array2<f32>) -> Array2<f32> {
        for _ in 0..self.config.iterations {
            let weights = self.assignment_weights(emb, attractors.view());
            attractors = weighted_centroids(weights.view(), emb, self.config.eps);
        }
        attractors
    }

    /// `(n_sources, N)` weights; every column sums to one
    fn assignment_weights(
        &self,
        emb: ArrayView2<'_, f32>,
        attractors: ArrayView2<'_, f32>,
    ) -> Array2<f32> {
        let mut scores = attractors.dot(&emb);

        match self.config.assignment {
            Assignment::Soft => {
                softmax_inplace(&mut scores, Axis(0));
                scores
            }
            Assignment::InnerProduct => one_hot(scores.view()),
            Assignment::Hard => {
                let half_norm = attractors.map_axis(Axis(1), |a| 0.5 * a.dot(&a));
                scores -= &half_norm.insert_axis(Axis(1));
                one_hot(scores.view())
            }
        }
    }
}

/// One-hot over sources on the best score of every column
fn one_hot(scores: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut weights = Array2::<f32>::zeros(scores.raw_dim());
    for (n, column) in scores.axis_iter(Axis(1)).enumerate() {
        weights[[argmax(column), n]] = 1.0;
    }
    weights
}

/// Squared Euclidean distance from every column of `emb` to `point`
fn squared_distances(emb: ArrayView2<'_, f32>, point: Array1<f32>) -> Array1<f32> {
    let diff = &emb - &point.insert_axis(Axis(1));
    diff.mapv(|d| d * d).sum_axis(Axis(0))
}

/// Index of the first maximum
fn argmax(values: ndarray::ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_value {
            best_value = v;
            best = idx;
        }
    }
    best
}

//! Attractor / mask / DANet integration tests
//!
//! Verifies:
//! - Supervised attractors (centroids, bin-order invariance, weighting)
//! - Clustering determinism and degenerate cases
//! - Mask ranges per nonlinearity
//! - Full DANet pipeline from waveform to separated waveforms
//! - Ideal masks against the training criterion

use approx::assert_abs_diff_eq;
use ndarray::{Array3, Array4, ArrayView3, Axis, s};

use ss_ml::d2net::D2BlockSpec;
use ss_ml::{
    Assignment, AttractorClustering, ClusterInit, ClusteringConfig, D2Embedding, Danet, DanetConfig,
    EmbeddingNetwork, IdealMask, L2Loss, MaskNonlinear, MaskReconstructor, SepResult, Stft,
    StftConfig, apply_masks, estimate_attractors, ideal_mask, threshold_weight,
};
use ss_core::EPS;

const BINS: usize = 6;
const FRAMES: usize = 10;

/// Two well-separated groups of embeddings: bins with even frame index sit
/// near `+center`, odd near `-center`.
fn two_groups(batch_size: usize, embed_dim: usize) -> (Array4<f32>, Array4<f32>) {
    let embedding = Array4::from_shape_fn((batch_size, embed_dim, BINS, FRAMES), |(b, k, f, t)| {
        let sign = if t % 2 == 0 { 1.0 } else { -1.0 };
        let jitter = ((b * 31 + k * 17 + f * 7 + t * 3) % 11) as f32 * 0.01;
        sign * (1.0 + k as f32) + jitter
    });
    let assignment = Array4::from_shape_fn((batch_size, 2, BINS, FRAMES), |(_, s, _, t)| {
        ((t % 2) == s) as u8 as f32
    });
    (embedding, assignment)
}

fn max_abs_diff<'a>(a: impl IntoIterator<Item = &'a f32>, b: impl IntoIterator<Item = &'a f32>) -> f32 {
    a.into_iter()
        .zip(b)
        .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUPERVISED ATTRACTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_supervised_attractors_are_group_means() {
    let (embedding, assignment) = two_groups(2, 3);
    let attractors = estimate_attractors(embedding.view(), assignment.view(), EPS).unwrap();
    assert_eq!(attractors.dim(), (2, 2, 3));

    for b in 0..2 {
        for (s, parity) in [(0usize, 0usize), (1, 1)] {
            for k in 0..3 {
                let group = embedding.slice(s![b, k, .., ..]);
                let values: Vec<f32> = group
                    .indexed_iter()
                    .filter(|((_, t), _)| t % 2 == parity)
                    .map(|(_, v)| *v)
                    .collect();
                let mean = values.iter().sum::<f32>() / values.len() as f32;
                assert_abs_diff_eq!(attractors[[b, s, k]], mean, epsilon = 1e-5);
            }
        }
    }
}

#[test]
fn test_supervised_attractors_ignore_bin_order() {
    let (embedding, assignment) = two_groups(1, 4);
    let forward = estimate_attractors(embedding.view(), assignment.view(), EPS).unwrap();

    let reversed = estimate_attractors(
        embedding.slice(s![.., .., ..;-1, ..;-1]),
        assignment.slice(s![.., .., ..;-1, ..;-1]),
        EPS,
    )
    .unwrap();
    assert!(max_abs_diff(forward.iter(), reversed.iter()) < 1e-5);
}

#[test]
fn test_threshold_weight_excludes_silent_bins() {
    let (mut embedding, assignment) = two_groups(1, 2);
    let mut mixture = Array3::<f32>::ones((1, BINS, FRAMES));

    // one silent bin with a wild embedding
    mixture[[0, 2, 4]] = 1e-4;
    embedding[[0, 0, 2, 4]] = 1e3;
    embedding[[0, 1, 2, 4]] = -1e3;

    let weight = threshold_weight(mixture.view(), 40.0).unwrap();
    let weighted = ss_ml::apply_threshold_weight(assignment.view(), weight.view()).unwrap();
    let attractors = estimate_attractors(embedding.view(), weighted.view(), EPS).unwrap();
    assert!(attractors.iter().all(|a| a.abs() < 10.0));

    let unweighted = estimate_attractors(embedding.view(), assignment.view(), EPS).unwrap();
    assert!(unweighted.iter().any(|a| a.abs() > 10.0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLUSTERING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_clustering_finds_both_groups() {
    let (embedding, assignment) = two_groups(3, 2);
    let supervised = estimate_attractors(embedding.view(), assignment.view(), EPS).unwrap();

    for init in [ClusterInit::FirstEmbeddings, ClusterInit::FarthestPoint] {
        let clustering = AttractorClustering::new(ClusteringConfig::new(2).with_init(init)).unwrap();
        let attractors = clustering.run(embedding.view()).unwrap();

        for b in 0..3 {
            // clusters may come out in either order
            let direct = max_abs_diff(
                attractors.slice(s![b, .., ..]).iter(),
                supervised.slice(s![b, .., ..]).iter(),
            );
            let swapped = max_abs_diff(
                attractors.slice(s![b, ..;-1, ..]).iter(),
                supervised.slice(s![b, .., ..]).iter(),
            );
            assert!(direct.min(swapped) < 1e-4, "{:?}: {} / {}", init, direct, swapped);
        }
    }
}

#[test]
fn test_clustering_is_deterministic() {
    let (embedding, _) = two_groups(4, 3);
    let config = ClusteringConfig::new(3)
        .with_init(ClusterInit::Seeded { seed: 42 })
        .with_assignment(Assignment::Soft)
        .with_iterations(5);
    let clustering = AttractorClustering::new(config).unwrap();

    let first = clustering.run(embedding.view()).unwrap();
    let second = clustering.run(embedding.view()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_single_source_is_global_mean() {
    let (embedding, _) = two_groups(2, 3);
    let clustering = AttractorClustering::new(ClusteringConfig::new(1).with_iterations(1)).unwrap();
    let attractors = clustering.run(embedding.view()).unwrap();

    let means = embedding
        .mean_axis(Axis(3))
        .and_then(|m| m.mean_axis(Axis(2)))
        .unwrap();
    for b in 0..2 {
        for k in 0..3 {
            assert_abs_diff_eq!(attractors[[b, 0, k]], means[[b, k]], epsilon = 1e-5);
        }
    }
}

#[test]
fn test_invalid_clustering_configs() {
    assert!(AttractorClustering::new(ClusteringConfig::new(0)).is_err());
    assert!(AttractorClustering::new(ClusteringConfig::new(2).with_iterations(0)).is_err());

    // more sources than bins
    let embedding = Array4::<f32>::ones((1, 2, 1, 2));
    let clustering = AttractorClustering::new(ClusteringConfig::new(3)).unwrap();
    assert!(clustering.run(embedding.view()).is_err());
}

// ═══════════════════════════════════════════════════════════════════════════════
// MASKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mask_ranges() {
    let (embedding, assignment) = two_groups(2, 3);
    let attractors = estimate_attractors(embedding.view(), assignment.view(), EPS).unwrap();

    let sigmoid = MaskReconstructor::new(MaskNonlinear::Sigmoid)
        .forward(embedding.view(), attractors.view())
        .unwrap();
    assert!(sigmoid.iter().all(|&m| m > 0.0 && m < 1.0));

    let softmax = MaskReconstructor::new(MaskNonlinear::Softmax)
        .forward(embedding.view(), attractors.view())
        .unwrap();
    for total in softmax.sum_axis(Axis(1)).iter() {
        assert_abs_diff_eq!(*total, 1.0, epsilon = 1e-5);
    }
    // each bin's own group dominates
    assert!(softmax[[0, 0, 0, 0]] > 0.99);
    assert!(softmax[[0, 1, 0, 1]] > 0.99);

    let identity = MaskReconstructor::new(MaskNonlinear::Identity)
        .forward(embedding.view(), attractors.view())
        .unwrap();
    let logit: f32 = (0..3)
        .map(|k| attractors[[1, 1, k]] * embedding[[1, k, 3, 5]])
        .sum();
    assert_abs_diff_eq!(identity[[1, 1, 3, 5]], logit, epsilon = 1e-4);
}

#[test]
fn test_ideal_ratio_mask_reaches_zero_loss() {
    let sources = Array4::from_shape_fn((2, 3, BINS, FRAMES), |(b, s, f, t)| {
        ((b + 1) * (s + 2) + f * t % 5) as f32 * 0.1
    });
    let mixture = sources.sum_axis(Axis(1));

    let irm = ideal_mask(sources.view(), IdealMask::Irm, EPS).unwrap();
    let estimated = apply_masks(mixture.view(), irm.view()).unwrap();
    let loss = L2Loss::default().forward(estimated.view(), sources.view()).unwrap();
    assert!(loss < 1e-6, "loss {}", loss);

    let ibm = ideal_mask(sources.view(), IdealMask::Ibm, EPS).unwrap();
    let estimated = apply_masks(mixture.view(), ibm.view()).unwrap();
    assert!(L2Loss::default().forward(estimated.view(), sources.view()).unwrap() > 0.0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// DANET PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Embeds each bin from its log amplitude and frame parity
struct ParityEmbedding;

impl EmbeddingNetwork for ParityEmbedding {
    fn embed(&self, amplitude: ArrayView3<'_, f32>) -> SepResult<Array4<f32>> {
        let (b, f, t) = amplitude.dim();
        Ok(Array4::from_shape_fn((b, 2, f, t), |(b, k, f, t)| {
            let parity = if t % 2 == 0 { 1.0 } else { -1.0 };
            let level = (1.0 + amplitude[[b, f, t]]).ln() * 0.01;
            if k == 0 { parity + level } else { -parity + level }
        }))
    }

    fn embed_dim(&self) -> usize {
        2
    }
}

#[test]
fn test_supervised_and_clustering_agree() {
    let config = DanetConfig::default()
        .with_embed_dim(2)
        .with_mask_nonlinear(MaskNonlinear::Softmax);
    let danet = Danet::new(ParityEmbedding, config).unwrap();
    let mixture = Array3::from_shape_fn((2, BINS, FRAMES), |(b, f, t)| (b + f + t) as f32 * 0.1);
    let (_, assignment) = two_groups(2, 2);

    let supervised = danet.forward_supervised(mixture.view(), assignment.view(), None).unwrap();
    let clustered = danet.forward_clustering(mixture.view()).unwrap();

    // first embedding is frame 0 (even), so cluster 0 is the even group
    assert!(max_abs_diff(supervised.masks.iter(), clustered.masks.iter()) < 1e-3);
}

#[test]
fn test_waveform_separation_preserves_mixture() {
    let stft = Stft::new(StftConfig::default()).unwrap();
    let mixture: Vec<f32> = (0..2048)
        .map(|i| {
            let t = i as f32 / 8000.0;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
                + (2.0 * std::f32::consts::PI * 1800.0 * t).sin() * 0.3
        })
        .collect();

    let spec = D2BlockSpec::new(1, 4usize).with_depth(3);
    let config = DanetConfig::default()
        .with_embed_dim(5)
        .with_mask_nonlinear(MaskNonlinear::Softmax)
        .with_iter_clustering(3);
    let network = D2Embedding::new(&spec, config.embed_dim, 7).unwrap();
    let danet = Danet::new(network, config).unwrap();

    let sources = danet.separate_waveform(&mixture, &stft).unwrap();
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().all(|s| s.len() == mixture.len()));
    assert!(sources.iter().flatten().all(|v| v.is_finite()));

    // softmax masks sum to one and share the mixture phase
    let recombined: Vec<f32> = sources[0].iter().zip(&sources[1]).map(|(a, b)| a + b).collect();
    assert!(max_abs_diff(recombined.iter(), mixture.iter()) < 1e-3);
}

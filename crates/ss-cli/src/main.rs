//! Separation core command-line driver
//!
//! Usage:
//!   ss cluster --embeddings emb.json --n-sources 2   - Attractors and masks for stored embeddings
//!   ss segment --length 100 --chunk 10 --hop 5       - Segment/overlap-add round trip report
//!   ss config --preset accurate                      - Print a DANet config as JSON

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ndarray::{Array3, Array4, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use ss_ml::transform::{coverage_counts, num_chunks, overlap_add_len};
use ss_ml::{
    Assignment, AttractorClustering, ClusterInit, ClusteringConfig, DanetConfig, MaskNonlinear,
    MaskReconstructor, OverlapAdd1d, Segment1d,
};

#[derive(Parser)]
#[command(name = "ss", about = "Attractor-based source separation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster stored embeddings into attractors and reconstruct masks
    Cluster {
        /// JSON tensor `{ "shape": [B, K, bins, frames], "data": [...] }`
        #[arg(short, long)]
        embeddings: PathBuf,

        /// Number of sources
        #[arg(short, long, default_value_t = 2)]
        n_sources: usize,

        /// Clustering iterations
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,

        /// Mask nonlinearity (sigmoid, softmax, identity)
        #[arg(long, default_value = "sigmoid")]
        nonlinear: String,

        /// Assignment rule (hard, inner_product, soft)
        #[arg(long, default_value = "hard")]
        assignment: String,

        /// Seed for random initial attractors (first embeddings otherwise)
        #[arg(long)]
        seed: Option<u64>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report segment/overlap-add geometry and round-trip error
    Segment {
        /// Sequence length in frames
        #[arg(short, long)]
        length: usize,

        /// Chunk size
        #[arg(short, long)]
        chunk: usize,

        /// Hop size
        #[arg(long)]
        hop: usize,
    },
    /// Print a DANet configuration
    Config {
        /// Preset (default, fast, accurate)
        #[arg(short, long, default_value = "default")]
        preset: String,
    },
}

/// Dense row-major tensor as stored on disk
#[derive(Serialize, Deserialize)]
struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    fn from_array<D: ndarray::Dimension>(array: &ndarray::Array<f32, D>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }
}

#[derive(Serialize)]
struct ClusterOutput {
    attractors: Tensor,
    masks: Tensor,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Cluster {
            embeddings,
            n_sources,
            iterations,
            nonlinear,
            assignment,
            seed,
            output,
        } => {
            let init = seed.map_or(ClusterInit::FirstEmbeddings, |seed| ClusterInit::Seeded { seed });
            let config = ClusteringConfig::new(n_sources)
                .with_iterations(iterations)
                .with_init(init)
                .with_assignment(assignment.parse::<Assignment>()?);
            let nonlinear = nonlinear.parse::<MaskNonlinear>()?;
            run_cluster(&embeddings, config, nonlinear, output.as_deref())
        }
        Commands::Segment { length, chunk, hop } => run_segment(length, chunk, hop),
        Commands::Config { preset } => {
            let config = DanetConfig::preset(&preset)?;
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_embedding(path: &Path) -> Result<Array4<f32>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tensor: Tensor = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse tensor JSON in {}", path.display()))?;

    if tensor.shape.len() != 4 {
        bail!("Expected a 4-D (B, K, bins, frames) tensor, got shape {:?}", tensor.shape);
    }
    let array = ArrayD::from_shape_vec(IxDyn(&tensor.shape), tensor.data)
        .context("Tensor data does not match its shape")?;
    array
        .into_dimensionality()
        .context("Failed to convert tensor to 4-D")
}

fn run_cluster(
    path: &Path,
    config: ClusteringConfig,
    nonlinear: MaskNonlinear,
    output: Option<&Path>,
) -> Result<()> {
    let embedding = load_embedding(path)?;
    log::info!(
        "Clustering {:?} embeddings into {} sources ({} iterations, {:?} assignment, {} masks)",
        embedding.shape(),
        config.n_sources,
        config.iterations,
        config.assignment,
        nonlinear
    );

    let clustering = AttractorClustering::new(config)?;
    let attractors = clustering.run(embedding.view())?;
    let masks = MaskReconstructor::new(nonlinear).forward(embedding.view(), attractors.view())?;

    let result = ClusterOutput {
        attractors: Tensor::from_array(&attractors),
        masks: Tensor::from_array(&masks),
    };
    let json = serde_json::to_string(&result)?;

    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote masks {:?} to {}", masks.shape(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_segment(length: usize, chunk: usize, hop: usize) -> Result<()> {
    let segment = Segment1d::new(chunk, hop)?;
    let overlap_add = OverlapAdd1d::new(chunk, hop)?;
    let n_chunks = num_chunks(length, chunk, hop)?;
    let out_len = overlap_add_len(n_chunks, chunk, hop)?;

    let x = Array3::from_shape_fn((1, 1, length), |(_, _, t)| ((t * 37) % 101) as f32 / 50.0 - 1.0);
    let chunks = segment.forward(x.view())?;
    let summed = overlap_add.forward(chunks.view())?;
    let counts = coverage_counts(n_chunks, chunk, hop)?;

    let max_error = summed
        .iter()
        .zip(counts.iter())
        .zip(x.iter())
        .fold(0.0f32, |acc, ((&y, &c), &v)| acc.max((y / c - v).abs()));

    println!("chunks:          {}", n_chunks);
    println!("output length:   {} (input {})", out_len, length);
    match overlap_add.overlap_factor() {
        Some(factor) => println!("overlap factor:  {}", factor),
        None => println!("overlap factor:  none (chunk not a multiple of hop)"),
    }
    println!("max round-trip error: {:.3e}", max_error);
    Ok(())
}

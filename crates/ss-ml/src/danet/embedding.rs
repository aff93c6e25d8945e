//! D2 block embedding network

use ndarray::{Array4, ArrayView3, Axis};

use ss_core::{Nonlinear, SepError, SepResult, ensure_positive};

use super::EmbeddingNetwork;
use crate::d2net::{ConvBlock2d, D2Block, D2BlockSpec};

/// Spectrogram `(B, bins, frames)` -> D2 block -> 1x1 projection to K
/// channels.
#[derive(Debug, Clone)]
pub struct D2Embedding {
    block: D2Block,
    projection: ConvBlock2d,
    embed_dim: usize,
}

impl D2Embedding {
    /// `spec.in_channels` must be 1 (the amplitude map)
    pub fn new(spec: &D2BlockSpec, embed_dim: usize, seed: u64) -> SepResult<Self> {
        ensure_positive("embed_dim", embed_dim)?;
        if spec.in_channels != 1 {
            return Err(SepError::ShapeMismatch {
                what: "embedding input channels",
                expected: 1,
                got: spec.in_channels,
            });
        }

        let block = D2Block::new(spec, seed)?;
        let projection = ConvBlock2d::new(
            block.out_channels(),
            embed_dim,
            (1, 1),
            (1, 1),
            None,
            Nonlinear::Identity,
            seed.wrapping_add(block.depth() as u64),
        )?;

        Ok(Self {
            block,
            projection,
            embed_dim,
        })
    }

    pub fn block(&self) -> &D2Block {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut D2Block {
        &mut self.block
    }

    pub fn projection_mut(&mut self) -> &mut ConvBlock2d {
        &mut self.projection
    }
}

impl EmbeddingNetwork for D2Embedding {
    fn embed(&self, amplitude: ArrayView3<'_, f32>) -> SepResult<Array4<f32>> {
        let x = amplitude.insert_axis(Axis(1));
        let hidden = self.block.forward(x)?;
        self.projection.forward(hidden.view())
    }

    fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    fn name(&self) -> &str {
        "d2-embedding"
    }
}

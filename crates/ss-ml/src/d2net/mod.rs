//! Densely-connected dilated convolution block (D2 block)
//!
//! Layer `idx` produces `growth[idx] + growth[idx+1] + ... + growth[last]`
//! channels. Its output is added to a running residual stack; the first
//! `growth[idx]` channels of that stack feed the next layer and the rest
//! stay in the stack. The block output is the last stack, `growth[last]`
//! channels.
//!
//! ```rust,ignore
//! use ss_ml::d2net::{D2Block, D2BlockSpec};
//!
//! let spec = D2BlockSpec::new(1, vec![3, 4, 5, 6]).with_dilated(true);
//! let block = D2Block::new(&spec, 0)?;
//! let y = block.forward(x.view())?; // (B, 6, H, W)
//! ```

mod config;
mod conv;

pub use config::{D2BlockSpec, D2LayerSpec, PerLayer};
pub use conv::{ConvBlock2d, Norm2d};

use ndarray::{Array4, ArrayView4, s};

use ss_core::{SepResult, ensure_positive};

/// How each layer's dilation is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DilationRule {
    /// `2^idx` for layers flagged `dilated`, 1 otherwise
    Exponential,
    /// Same dilation for every layer
    Fixed(usize),
}

/// D2 block
#[derive(Debug, Clone)]
pub struct D2Block {
    layers: Vec<ConvBlock2d>,
    growth: Vec<usize>,
}

impl D2Block {
    /// Build from a `D2BlockSpec`; layer `idx` is seeded with `seed + idx`
    pub fn new(spec: &D2BlockSpec, seed: u64) -> SepResult<Self> {
        Self::build(spec, DilationRule::Exponential, seed)
    }

    /// Variant with one dilation for all layers; `dilated` flags are ignored
    pub fn with_fixed_dilation(spec: &D2BlockSpec, dilation: usize, seed: u64) -> SepResult<Self> {
        ensure_positive("dilation", dilation)?;
        Self::build(spec, DilationRule::Fixed(dilation), seed)
    }

    fn build(spec: &D2BlockSpec, rule: DilationRule, seed: u64) -> SepResult<Self> {
        let layer_specs = spec.expand()?;
        let growth: Vec<usize> = layer_specs.iter().map(|l| l.growth).collect();

        let mut layers = Vec::with_capacity(layer_specs.len());
        let mut in_channels = spec.in_channels;

        for (idx, layer) in layer_specs.iter().enumerate() {
            let out_channels: usize = growth[idx..].iter().sum();
            let dilation = match rule {
                DilationRule::Exponential if layer.dilated => 1usize << idx,
                DilationRule::Exponential => 1,
                DilationRule::Fixed(d) => d,
            };
            let norm = layer.norm.then_some((spec.norm_kind, spec.eps));

            layers.push(ConvBlock2d::new(
                in_channels,
                out_channels,
                spec.kernel_size,
                (dilation, dilation),
                norm,
                layer.nonlinear,
                seed.wrapping_add(idx as u64),
            )?);
            in_channels = layer.growth;
        }

        log::debug!(
            "D2 block: depth {}, growth {:?}, dilations {:?}",
            layers.len(),
            growth,
            layers.iter().map(|l| l.dilation().0).collect::<Vec<_>>()
        );

        Ok(Self { layers, growth })
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn in_channels(&self) -> usize {
        self.layers[0].in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.growth[self.growth.len() - 1]
    }

    pub fn layers(&self) -> &[ConvBlock2d] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [ConvBlock2d] {
        &mut self.layers
    }

    /// `(B, in_channels, H, W)` -> `(B, growth[last], H, W)`
    pub fn forward(&self, input: ArrayView4<'_, f32>) -> SepResult<Array4<f32>> {
        let last = self.layers.len() - 1;
        let mut x = input.to_owned();
        let mut residual: Option<Array4<f32>> = None;

        for (idx, layer) in self.layers.iter().enumerate() {
            let y = layer.forward(x.view())?;
            let stacked = match residual.take() {
                Some(r) => r + &y,
                None => y,
            };

            if idx == last {
                residual = Some(stacked);
            } else {
                let split = self.growth[idx];
                x = stacked.slice(s![.., ..split, .., ..]).to_owned();
                residual = Some(stacked.slice(s![.., split.., .., ..]).to_owned());
            }
        }

        // depth >= 1 is guaranteed by `D2BlockSpec::expand`
        Ok(residual.unwrap_or_else(|| input.to_owned()))
    }
}

//! Norm -> nonlinearity -> dilated 2-D convolution

use ndarray::{Array1, Array4, ArrayView4, Axis, s};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ss_core::{Nonlinear, NormKind, SepError, SepResult, ensure_positive};

/// Inference-time normalisation with learned affine parameters
#[derive(Debug, Clone)]
pub struct Norm2d {
    kind: NormKind,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    eps: f32,
}

impl Norm2d {
    pub fn new(kind: NormKind, channels: usize, eps: f32) -> Self {
        Self {
            kind,
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            eps,
        }
    }

    /// Replace the batch statistics used by `NormKind::BatchNorm`
    pub fn set_running_stats(&mut self, mean: Array1<f32>, var: Array1<f32>) -> SepResult<()> {
        let channels = self.gamma.len();
        if mean.len() != channels || var.len() != channels {
            return Err(SepError::ShapeMismatch {
                what: "norm channels",
                expected: channels,
                got: mean.len().max(var.len()),
            });
        }
        self.running_mean = mean;
        self.running_var = var;
        Ok(())
    }

    pub fn forward(&self, x: &mut Array4<f32>) {
        match self.kind {
            NormKind::BatchNorm => {
                for (c, mut channel) in x.axis_iter_mut(Axis(1)).enumerate() {
                    let scale = self.gamma[c] / (self.running_var[c] + self.eps).sqrt();
                    let shift = self.beta[c] - self.running_mean[c] * scale;
                    channel.mapv_inplace(|v| v * scale + shift);
                }
            }
            NormKind::GlobalLayerNorm => {
                for mut sample in x.axis_iter_mut(Axis(0)) {
                    let n = sample.len() as f32;
                    let mean = sample.sum() / n;
                    let var = sample.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / n;
                    let inv_std = 1.0 / (var + self.eps).sqrt();
                    for (c, mut channel) in sample.axis_iter_mut(Axis(0)).enumerate() {
                        let (g, b) = (self.gamma[c], self.beta[c]);
                        channel.mapv_inplace(|v| (v - mean) * inv_std * g + b);
                    }
                }
            }
        }
    }
}

/// Pre-activation convolution block with "same" zero padding
#[derive(Debug, Clone)]
pub struct ConvBlock2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    dilation: (usize, usize),
    norm: Option<Norm2d>,
    nonlinear: Nonlinear,
    /// (out, in, kernel_h, kernel_w)
    weight: Array4<f32>,
    bias: Array1<f32>,
}

impl ConvBlock2d {
    /// Weights are drawn uniformly from `±1/sqrt(fan_in)` with a ChaCha8
    /// generator seeded by `seed`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        dilation: (usize, usize),
        norm: Option<(NormKind, f32)>,
        nonlinear: Nonlinear,
        seed: u64,
    ) -> SepResult<Self> {
        ensure_positive("in_channels", in_channels)?;
        ensure_positive("out_channels", out_channels)?;
        ensure_positive("kernel height", kernel_size.0)?;
        ensure_positive("kernel width", kernel_size.1)?;
        ensure_positive("dilation", dilation.0.min(dilation.1))?;

        let fan_in = (in_channels * kernel_size.0 * kernel_size.1) as f32;
        let bound = 1.0 / fan_in.sqrt();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weight = Array4::from_shape_simple_fn(
            (out_channels, in_channels, kernel_size.0, kernel_size.1),
            || rng.random_range(-bound..bound),
        );
        let bias = Array1::from_shape_simple_fn(out_channels, || rng.random_range(-bound..bound));

        Ok(Self {
            in_channels,
            out_channels,
            kernel_size,
            dilation,
            norm: norm.map(|(kind, eps)| Norm2d::new(kind, in_channels, eps)),
            nonlinear,
            weight,
            bias,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn dilation(&self) -> (usize, usize) {
        self.dilation
    }

    pub fn norm_mut(&mut self) -> Option<&mut Norm2d> {
        self.norm.as_mut()
    }

    /// Load learned parameters
    pub fn set_parameters(&mut self, weight: Array4<f32>, bias: Array1<f32>) -> SepResult<()> {
        if weight.dim() != self.weight.dim() {
            return Err(SepError::invalid_shape(
                format!("{:?}", self.weight.shape()),
                weight.shape(),
            ));
        }
        if bias.len() != self.out_channels {
            return Err(SepError::ShapeMismatch {
                what: "bias length",
                expected: self.out_channels,
                got: bias.len(),
            });
        }
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }

    /// `(B, in, H, W)` -> `(B, out, H, W)`
    pub fn forward(&self, input: ArrayView4<'_, f32>) -> SepResult<Array4<f32>> {
        let (batch_size, channels, height, width) = input.dim();
        if channels != self.in_channels {
            return Err(SepError::ShapeMismatch {
                what: "input channels",
                expected: self.in_channels,
                got: channels,
            });
        }

        let mut x = input.to_owned();
        if let Some(norm) = &self.norm {
            norm.forward(&mut x);
        }
        self.nonlinear.apply_inplace(&mut x);

        let (kernel_h, kernel_w) = self.kernel_size;
        let (dilation_h, dilation_w) = self.dilation;
        let padding_h = (kernel_h - 1) * dilation_h;
        let padding_w = (kernel_w - 1) * dilation_w;
        let (padding_up, padding_left) = (padding_h / 2, padding_w / 2);

        let mut padded =
            Array4::<f32>::zeros((batch_size, channels, height + padding_h, width + padding_w));
        padded
            .slice_mut(s![.., .., padding_up..padding_up + height, padding_left..padding_left + width])
            .assign(&x);

        let n_pixels = height * width;
        let mut output = Array4::<f32>::zeros((batch_size, self.out_channels, height, width));

        for i in 0..kernel_h {
            for j in 0..kernel_w {
                let (top, left) = (i * dilation_h, j * dilation_w);
                let patch = padded.slice(s![.., .., top..top + height, left..left + width]);
                let tap = self.weight.slice(s![.., .., i, j]);

                for (mut out_b, patch_b) in output.outer_iter_mut().zip(patch.outer_iter()) {
                    let patch_b = patch_b
                        .to_shape((channels, n_pixels))
                        .map_err(|e| SepError::ProcessingFailed(format!("reshape failed: {}", e)))?;
                    let contribution = tap
                        .dot(&patch_b)
                        .into_shape_with_order((self.out_channels, height, width))
                        .map_err(|e| SepError::ProcessingFailed(format!("reshape failed: {}", e)))?;
                    out_b += &contribution;
                }
            }
        }

        output += &self
            .bias
            .view()
            .insert_axis(Axis(1))
            .insert_axis(Axis(2));

        Ok(output)
    }
}

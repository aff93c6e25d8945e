//! Short-time Fourier transform front end
//!
//! Frames start at `0, hop, 2*hop, ...` with no centering; the tail is
//! zero-padded so every input sample lands in at least one frame.
//! The inverse divides the overlap-added frames by the summed squared
//! window, so any hop that keeps that sum nonzero reconstructs exactly.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use ss_core::{SepError, SepResult, ensure_positive};

use crate::attractor::check_dim;
use crate::defaults;

/// Analysis/synthesis window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowFn {
    Hann,
    #[default]
    Hamming,
}

impl WindowFn {
    /// Periodic window of length `size`
    pub fn build(&self, size: usize) -> Vec<f32> {
        let (a0, a1) = match self {
            WindowFn::Hann => (0.5, 0.5),
            WindowFn::Hamming => (0.54, 0.46),
        };
        (0..size)
            .map(|i| a0 - a1 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos())
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            WindowFn::Hann => "hann",
            WindowFn::Hamming => "hamming",
        }
    }
}

impl FromStr for WindowFn {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hann" | "hanning" => Ok(WindowFn::Hann),
            "hamming" => Ok(WindowFn::Hamming),
            other => Err(SepError::config(format!("unknown window `{}`", other))),
        }
    }
}

impl fmt::Display for WindowFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// STFT settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StftConfig {
    /// FFT length in samples
    pub fft_size: usize,

    /// Hop in samples; half the FFT length when unset
    pub hop_size: Option<usize>,

    pub window: WindowFn,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            fft_size: defaults::FFT_SIZE,
            hop_size: None,
            window: WindowFn::Hamming,
        }
    }
}

impl StftConfig {
    pub fn hop(&self) -> usize {
        self.hop_size.unwrap_or(self.fft_size / 2)
    }

    pub fn n_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    pub fn validate(&self) -> SepResult<()> {
        ensure_positive("fft_size", self.fft_size)?;
        ensure_positive("hop_size", self.hop())?;
        if self.fft_size % 2 != 0 {
            return Err(SepError::config(format!(
                "fft_size must be even, got {}",
                self.fft_size
            )));
        }
        if self.hop() > self.fft_size {
            return Err(SepError::config(format!(
                "hop_size {} exceeds fft_size {}",
                self.hop(),
                self.fft_size
            )));
        }
        Ok(())
    }
}

/// Planned forward/inverse real FFT pair with its window
#[derive(Clone)]
pub struct Stft {
    config: StftConfig,
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    pub fn new(config: StftConfig) -> SepResult<Self> {
        config.validate()?;

        let mut planner = RealFftPlanner::new();
        let fft_forward = planner.plan_fft_forward(config.fft_size);
        let fft_inverse = planner.plan_fft_inverse(config.fft_size);
        let window = config.window.build(config.fft_size);

        Ok(Self {
            config,
            window,
            fft_forward,
            fft_inverse,
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// Frames needed to cover `length` samples
    pub fn num_frames(&self, length: usize) -> usize {
        let n_fft = self.config.fft_size;
        if length <= n_fft {
            1
        } else {
            (length - n_fft).div_ceil(self.config.hop()) + 1
        }
    }

    /// Complex spectrum `(bins, frames)`
    pub fn forward(&self, audio: &[f32]) -> SepResult<Array2<Complex32>> {
        if audio.is_empty() {
            return Err(SepError::invalid_shape("non-empty signal", audio.len()));
        }

        let n_fft = self.config.fft_size;
        let hop = self.config.hop();
        let n_bins = self.config.n_bins();
        let n_frames = self.num_frames(audio.len());

        let mut spectrum = Array2::<Complex32>::zeros((n_bins, n_frames));
        let mut input_buffer = self.fft_forward.make_input_vec();
        let mut output_buffer = self.fft_forward.make_output_vec();
        let mut scratch = self.fft_forward.make_scratch_vec();

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;
            for (i, slot) in input_buffer.iter_mut().enumerate() {
                let sample = audio.get(start + i).copied().unwrap_or(0.0);
                *slot = sample * self.window[i];
            }

            self.fft_forward
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| SepError::ProcessingFailed(format!("FFT failed: {}", e)))?;

            for (bin, &value) in output_buffer.iter().enumerate() {
                spectrum[[bin, frame_idx]] = value;
            }
        }

        Ok(spectrum)
    }

    /// Signal of `length` samples from a `(bins, frames)` spectrum
    pub fn inverse(&self, spectrum: ArrayView2<'_, Complex32>, length: usize) -> SepResult<Vec<f32>> {
        let n_fft = self.config.fft_size;
        let hop = self.config.hop();
        let (n_bins, n_frames) = spectrum.dim();
        check_dim("frequency bins", self.config.n_bins(), n_bins)?;

        let mut output = vec![0.0f32; length];
        let mut window_sum = vec![0.0f32; length];

        let mut input_buffer = self.fft_inverse.make_input_vec();
        let mut output_buffer = self.fft_inverse.make_output_vec();
        let mut scratch = self.fft_inverse.make_scratch_vec();
        let norm = 1.0 / n_fft as f32;

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;
            if start >= length {
                break;
            }

            for (slot, &value) in input_buffer.iter_mut().zip(spectrum.column(frame_idx)) {
                *slot = value;
            }
            // a real signal has purely real DC and Nyquist bins
            input_buffer[0].im = 0.0;
            input_buffer[n_bins - 1].im = 0.0;

            self.fft_inverse
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| SepError::ProcessingFailed(format!("IFFT failed: {}", e)))?;

            for (i, &sample) in output_buffer.iter().enumerate() {
                let pos = start + i;
                if pos >= length {
                    break;
                }
                output[pos] += sample * norm * self.window[i];
                window_sum[pos] += self.window[i] * self.window[i];
            }
        }

        for (sample, sum) in output.iter_mut().zip(&window_sum) {
            if *sum > 1e-8 {
                *sample /= sum;
            }
        }

        Ok(output)
    }
}

/// Split a complex spectrum into amplitude and phase
pub fn magnitude_phase(spectrum: ArrayView2<'_, Complex32>) -> (Array2<f32>, Array2<f32>) {
    (spectrum.mapv(|c| c.norm()), spectrum.mapv(|c| c.arg()))
}

/// Inverse of [`magnitude_phase`]
pub fn from_magnitude_phase(
    magnitude: ArrayView2<'_, f32>,
    phase: ArrayView2<'_, f32>,
) -> SepResult<Array2<Complex32>> {
    if magnitude.dim() != phase.dim() {
        return Err(SepError::invalid_shape(
            format!("{:?}", magnitude.shape()),
            phase.shape(),
        ));
    }
    Ok(Zip::from(&magnitude)
        .and(&phase)
        .map_collect(|&m, &p| Complex32::from_polar(m, p)))
}

//! Ideal masks and silence thresholding for supervised training
//!
//! Targets are computed from the source amplitudes of a mixture:
//! - `Ibm`: one-hot on the loudest source at each bin
//! - `Irm`: `|S_i| / Σ_j |S_j|`
//! - `Wfm`: `|S_i|² / Σ_j |S_j|²`
//!
//! Low-energy bins carry no reliable assignment; [`threshold_weight`]
//! zeroes bins more than `threshold_db` below the loudest bin of each
//! sample so they do not pull the attractors.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use ss_core::{SepError, SepResult};

use crate::attractor::check_dim;

/// Ideal mask family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdealMask {
    /// Ideal binary mask
    #[default]
    Ibm,
    /// Ideal ratio mask
    Irm,
    /// Wiener filter mask
    Wfm,
}

impl IdealMask {
    pub fn name(&self) -> &'static str {
        match self {
            IdealMask::Ibm => "ibm",
            IdealMask::Irm => "irm",
            IdealMask::Wfm => "wfm",
        }
    }
}

impl FromStr for IdealMask {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ibm" => Ok(IdealMask::Ibm),
            "irm" => Ok(IdealMask::Irm),
            "wfm" => Ok(IdealMask::Wfm),
            other => Err(SepError::config(format!("unknown ideal mask `{}`", other))),
        }
    }
}

impl fmt::Display for IdealMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ideal mask `(B, n_sources, bins, frames)` from source amplitudes of
/// the same shape. Ties in `Ibm` go to the lowest source index; silent
/// bins get all-zero ratio masks.
pub fn ideal_mask(
    sources: ArrayView4<'_, f32>,
    kind: IdealMask,
    eps: f32,
) -> SepResult<Array4<f32>> {
    let (batch_size, n_sources, n_bins, n_frames) = sources.dim();
    if batch_size == 0 || n_sources == 0 || n_bins == 0 || n_frames == 0 {
        return Err(SepError::invalid_shape(
            "non-empty (B, n_sources, bins, frames)",
            sources.shape(),
        ));
    }

    let mask = match kind {
        IdealMask::Ibm => {
            let mut mask = Array4::<f32>::zeros(sources.raw_dim());
            for b in 0..batch_size {
                for f in 0..n_bins {
                    for t in 0..n_frames {
                        let mut best = 0;
                        for s in 1..n_sources {
                            if sources[[b, s, f, t]].abs() > sources[[b, best, f, t]].abs() {
                                best = s;
                            }
                        }
                        mask[[b, best, f, t]] = 1.0;
                    }
                }
            }
            mask
        }
        IdealMask::Irm => ratio_mask(sources.mapv(f32::abs), eps),
        IdealMask::Wfm => ratio_mask(sources.mapv(|v| v * v), eps),
    };

    Ok(mask)
}

fn ratio_mask(energy: Array4<f32>, eps: f32) -> Array4<f32> {
    let total = energy.sum_axis(Axis(1)).insert_axis(Axis(1));
    energy / (total + eps)
}

/// Per-bin weight `(B, bins, frames)`: 1 where `20·log10|X|` is within
/// `threshold_db` of the loudest bin of the same sample, else 0.
pub fn threshold_weight(mixture: ArrayView3<'_, f32>, threshold_db: f32) -> SepResult<Array3<f32>> {
    if threshold_db.is_nan() || threshold_db < 0.0 {
        return Err(SepError::config(format!(
            "threshold must be non-negative, got {}",
            threshold_db
        )));
    }
    if mixture.is_empty() {
        return Err(SepError::invalid_shape("non-empty (B, bins, frames)", mixture.shape()));
    }

    let mut weight = Array3::<f32>::zeros(mixture.raw_dim());
    for (sample, mut out) in mixture.outer_iter().zip(weight.outer_iter_mut()) {
        let log_amplitude = sample.mapv(|v| 20.0 * v.abs().max(f32::MIN_POSITIVE).log10());
        let peak = log_amplitude.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let floor = peak - threshold_db;
        out.zip_mut_with(&log_amplitude, |w, &db| {
            *w = if db > floor { 1.0 } else { 0.0 };
        });
    }

    let kept = weight.sum();
    log::debug!(
        "threshold {} dB keeps {} of {} bins",
        threshold_db,
        kept,
        weight.len()
    );
    Ok(weight)
}

/// Multiply `(B, n_sources, bins, frames)` assignments by a
/// `(B, bins, frames)` weight, broadcasting over sources.
pub fn apply_threshold_weight(
    assignment: ArrayView4<'_, f32>,
    weight: ArrayView3<'_, f32>,
) -> SepResult<Array4<f32>> {
    let (batch_size, _, n_bins, n_frames) = assignment.dim();
    let (w_batch, w_bins, w_frames) = weight.dim();
    check_dim("batch size", batch_size, w_batch)?;
    check_dim("frequency bins", n_bins, w_bins)?;
    check_dim("time frames", n_frames, w_frames)?;

    Ok(&assignment * &weight.insert_axis(Axis(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ss_core::EPS;

    fn sources() -> Array4<f32> {
        // source 0 loud on even frames, source 1 on odd frames
        Array4::from_shape_fn((1, 2, 3, 4), |(_, s, f, t)| {
            let loud = (t % 2 == s) as u8 as f32;
            loud * 3.0 + 1.0 + f as f32 * 0.1
        })
    }

    #[test]
    fn test_parse() {
        assert_eq!("IRM".parse::<IdealMask>().unwrap(), IdealMask::Irm);
        assert_eq!("wfm".parse::<IdealMask>().unwrap(), IdealMask::Wfm);
        assert!("psm".parse::<IdealMask>().is_err());
    }

    #[test]
    fn test_binary_mask_one_hot() {
        let mask = ideal_mask(sources().view(), IdealMask::Ibm, EPS).unwrap();
        for t in 0..4 {
            assert_eq!(mask[[0, t % 2, 1, t]], 1.0);
            assert_eq!(mask[[0, 1 - t % 2, 1, t]], 0.0);
        }
        for total in mask.sum_axis(Axis(1)).iter() {
            assert_eq!(*total, 1.0);
        }
    }

    #[test]
    fn test_ratio_masks_sum_to_one() {
        for kind in [IdealMask::Irm, IdealMask::Wfm] {
            let mask = ideal_mask(sources().view(), kind, EPS).unwrap();
            for total in mask.sum_axis(Axis(1)).iter() {
                assert_abs_diff_eq!(*total, 1.0, epsilon = 1e-5);
            }
        }

        // 4 vs 1: ratio 0.8, power ratio 16/17
        let irm = ideal_mask(sources().view(), IdealMask::Irm, EPS).unwrap();
        let wfm = ideal_mask(sources().view(), IdealMask::Wfm, EPS).unwrap();
        assert_abs_diff_eq!(irm[[0, 0, 0, 0]], 0.8, epsilon = 1e-5);
        assert_abs_diff_eq!(wfm[[0, 0, 0, 0]], 16.0 / 17.0, epsilon = 1e-5);
    }

    #[test]
    fn test_silent_bins_ratio_zero() {
        let silent = Array4::<f32>::zeros((1, 2, 2, 2));
        let mask = ideal_mask(silent.view(), IdealMask::Irm, EPS).unwrap();
        assert!(mask.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_threshold_weight() {
        let mut mixture = Array3::<f32>::from_elem((2, 2, 2), 1.0);
        mixture[[0, 0, 0]] = 1e-3; // -60 dB
        mixture[[0, 1, 1]] = 1e-1; // -20 dB
        mixture[[1, 0, 0]] = 0.0;

        let weight = threshold_weight(mixture.view(), 40.0).unwrap();
        assert_eq!(weight[[0, 0, 0]], 0.0);
        assert_eq!(weight[[0, 1, 1]], 1.0);
        assert_eq!(weight[[0, 0, 1]], 1.0);
        assert_eq!(weight[[1, 0, 0]], 0.0);
        assert_eq!(weight[[1, 1, 1]], 1.0);

        assert!(threshold_weight(mixture.view(), -1.0).is_err());
    }

    #[test]
    fn test_apply_threshold_weight_broadcasts() {
        let assignment = Array4::<f32>::ones((1, 3, 2, 2));
        let mut weight = Array3::<f32>::ones((1, 2, 2));
        weight[[0, 1, 0]] = 0.0;
        let weighted = apply_threshold_weight(assignment.view(), weight.view()).unwrap();
        for s in 0..3 {
            assert_eq!(weighted[[0, s, 1, 0]], 0.0);
            assert_eq!(weighted[[0, s, 0, 0]], 1.0);
        }

        let wrong = Array3::<f32>::ones((1, 3, 2));
        assert!(apply_threshold_weight(assignment.view(), wrong.view()).is_err());
    }
}

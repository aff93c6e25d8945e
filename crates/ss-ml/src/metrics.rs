//! Signal-to-distortion ratio for evaluating separated waveforms

use ss_core::{SepError, SepResult};

/// SDR in dB: `10·log10(Σ r² / Σ (r − e)²)` over the common length.
/// A perfect estimate returns `f32::INFINITY`.
pub fn sdr(reference: &[f32], estimate: &[f32]) -> SepResult<f32> {
    let n = reference.len().min(estimate.len());
    if n == 0 {
        return Err(SepError::invalid_shape("non-empty signals", (reference.len(), estimate.len())));
    }

    let mut ref_power = 0.0f64;
    let mut error_power = 0.0f64;

    for (&r, &e) in reference[..n].iter().zip(&estimate[..n]) {
        let (r, e) = (r as f64, e as f64);
        ref_power += r * r;
        error_power += (r - e) * (r - e);
    }

    if error_power < 1e-10 {
        return Ok(f32::INFINITY);
    }
    if ref_power < 1e-10 {
        return Ok(f32::NEG_INFINITY);
    }

    Ok(10.0 * (ref_power / error_power).log10() as f32)
}

/// SDR gain of `estimate` over using the unprocessed `mixture`
pub fn sdr_improvement(reference: &[f32], estimate: &[f32], mixture: &[f32]) -> SepResult<f32> {
    Ok(sdr(reference, estimate)? - sdr(reference, mixture)?)
}

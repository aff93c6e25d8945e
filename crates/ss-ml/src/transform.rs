//! Segmentation and overlap-add
//!
//! Converts between audio-like `(batch, features, frames)` tensors and
//! image-like `(batch, features, S, chunk_size)` tensors, where
//! `S = (frames - chunk_size) / hop_size + 1`.
//!
//! ## Scaling contract
//!
//! `OverlapAdd1d::forward` is a plain sum of shifted chunks. It does not
//! normalise. Every output position receives one contribution per chunk
//! covering it, so when `chunk_size % hop_size == 0` the interior of
//! `overlap_add(segment(x))` equals `(chunk_size / hop_size) * x`. Callers
//! either divide by that factor (`forward_normalized` divides by the exact
//! per-position count) or feed chunks already weighted by a window that
//! sums to one under overlap.

use ndarray::{Array1, Array3, Array4, ArrayView3, ArrayView4, Axis, s};

use ss_core::{SepError, SepResult, ensure_positive};

/// Number of chunks produced for `n_frames` input frames
pub fn num_chunks(n_frames: usize, chunk_size: usize, hop_size: usize) -> SepResult<usize> {
    ensure_positive("chunk_size", chunk_size)?;
    ensure_positive("hop_size", hop_size)?;
    if n_frames < chunk_size {
        return Err(SepError::InvalidShape {
            expected: format!("at least {} frames", chunk_size),
            got: format!("{} frames", n_frames),
        });
    }
    Ok((n_frames - chunk_size) / hop_size + 1)
}

/// Output length of overlap-add over `n_chunks` chunks
pub fn overlap_add_len(n_chunks: usize, chunk_size: usize, hop_size: usize) -> SepResult<usize> {
    if n_chunks == 0 {
        return Err(SepError::invalid_shape("at least one chunk", n_chunks));
    }
    Ok((n_chunks - 1) * hop_size + chunk_size)
}

/// How many chunks cover each output position
pub fn coverage_counts(
    n_chunks: usize,
    chunk_size: usize,
    hop_size: usize,
) -> SepResult<Array1<f32>> {
    let mut counts = Array1::<f32>::zeros(overlap_add_len(n_chunks, chunk_size, hop_size)?);
    for idx in 0..n_chunks {
        let start = idx * hop_size;
        counts
            .slice_mut(s![start..start + chunk_size])
            .mapv_inplace(|c| c + 1.0);
    }
    Ok(counts)
}

/// Segmentation: `(B, F, T)` -> `(B, F, S, chunk_size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment1d {
    chunk_size: usize,
    hop_size: usize,
}

impl Segment1d {
    pub fn new(chunk_size: usize, hop_size: usize) -> SepResult<Self> {
        ensure_positive("chunk_size", chunk_size)?;
        ensure_positive("hop_size", hop_size)?;
        Ok(Self {
            chunk_size,
            hop_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Chunk `i` is `input[.., .., i*hop .. i*hop + chunk]`. No padding.
    pub fn forward(&self, input: ArrayView3<'_, f32>) -> SepResult<Array4<f32>> {
        let (batch_size, num_features, n_frames) = input.dim();
        let (chunk_size, hop_size) = (self.chunk_size, self.hop_size);
        let n_chunks = num_chunks(n_frames, chunk_size, hop_size)?;

        let mut output = Array4::<f32>::zeros((batch_size, num_features, n_chunks, chunk_size));
        for idx in 0..n_chunks {
            let start = idx * hop_size;
            output
                .slice_mut(s![.., .., idx, ..])
                .assign(&input.slice(s![.., .., start..start + chunk_size]));
        }

        Ok(output)
    }
}

/// Overlap-add: `(B, F, S, chunk_size)` -> `(B, F, (S-1)*hop + chunk_size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapAdd1d {
    chunk_size: usize,
    hop_size: usize,
}

impl OverlapAdd1d {
    pub fn new(chunk_size: usize, hop_size: usize) -> SepResult<Self> {
        ensure_positive("chunk_size", chunk_size)?;
        ensure_positive("hop_size", hop_size)?;
        Ok(Self {
            chunk_size,
            hop_size,
        })
    }

    /// Constant coverage of interior positions, when it exists
    pub fn overlap_factor(&self) -> Option<usize> {
        (self.chunk_size % self.hop_size == 0).then(|| self.chunk_size / self.hop_size)
    }

    fn check_input(&self, input: &ArrayView4<'_, f32>) -> SepResult<usize> {
        let (_, _, n_chunks, chunk_size) = input.dim();
        if chunk_size != self.chunk_size || n_chunks == 0 {
            return Err(SepError::InvalidShape {
                expected: format!("(batch, features, S >= 1, {})", self.chunk_size),
                got: format!("{:?}", input.shape()),
            });
        }
        Ok(n_chunks)
    }

    /// Unnormalised sum of shifted chunks
    pub fn forward(&self, input: ArrayView4<'_, f32>) -> SepResult<Array3<f32>> {
        let n_chunks = self.check_input(&input)?;
        let (batch_size, num_features, _, _) = input.dim();
        let (chunk_size, hop_size) = (self.chunk_size, self.hop_size);
        let n_frames = overlap_add_len(n_chunks, chunk_size, hop_size)?;

        let mut output = Array3::<f32>::zeros((batch_size, num_features, n_frames));
        for (idx, chunk) in input.axis_iter(Axis(2)).enumerate() {
            let start = idx * hop_size;
            let mut dst = output.slice_mut(s![.., .., start..start + chunk_size]);
            dst += &chunk;
        }

        Ok(output)
    }

    /// Sum of shifted chunks divided by the per-position coverage count.
    ///
    /// Exact inverse of `Segment1d::forward` whenever the chunks reach the
    /// end of the sequence, for any chunk/hop pair.
    pub fn forward_normalized(&self, input: ArrayView4<'_, f32>) -> SepResult<Array3<f32>> {
        let n_chunks = self.check_input(&input)?;
        let mut output = self.forward(input)?;
        let counts = coverage_counts(n_chunks, self.chunk_size, self.hop_size)?;
        output /= &counts;
        Ok(output)
    }
}

/// Zero-pad the time axis so that `(T' - chunk) % hop == 0`.
///
/// Returns `(padded, pad_left, pad_right)`; the padding is split with the
/// smaller half on the left.
pub fn pad_for_segment(
    input: ArrayView3<'_, f32>,
    chunk_size: usize,
    hop_size: usize,
) -> SepResult<(Array3<f32>, usize, usize)> {
    ensure_positive("chunk_size", chunk_size)?;
    ensure_positive("hop_size", hop_size)?;
    let n_frames = input.dim().2;

    let padding = if n_frames < chunk_size {
        chunk_size - n_frames
    } else {
        (hop_size - (n_frames - chunk_size) % hop_size) % hop_size
    };
    let pad_left = padding / 2;
    let pad_right = padding - pad_left;

    Ok((pad_time(input, pad_left, pad_right), pad_left, pad_right))
}

/// Zero-pad so that every original frame is covered by the same number of
/// chunks: `chunk - hop` on both sides, then aligned to the hop grid.
///
/// With `chunk % hop == 0`, `unpad(overlap_add(segment(padded)))` equals
/// `(chunk / hop) * x` at every position.
pub fn pad_for_overlap_add(
    input: ArrayView3<'_, f32>,
    chunk_size: usize,
    hop_size: usize,
) -> SepResult<(Array3<f32>, usize, usize)> {
    ensure_positive("chunk_size", chunk_size)?;
    ensure_positive("hop_size", hop_size)?;
    let edge = chunk_size.saturating_sub(hop_size);
    let n_frames = input.dim().2 + 2 * edge;
    let tail = if n_frames < chunk_size {
        chunk_size - n_frames
    } else {
        (hop_size - (n_frames - chunk_size) % hop_size) % hop_size
    };

    Ok((pad_time(input, edge, edge + tail), edge, edge + tail))
}

/// Remove `pad_left` / `pad_right` frames added by one of the pad helpers
pub fn unpad(input: ArrayView3<'_, f32>, pad_left: usize, pad_right: usize) -> SepResult<Array3<f32>> {
    let n_frames = input.dim().2;
    if pad_left + pad_right > n_frames {
        return Err(SepError::InvalidShape {
            expected: format!("more than {} frames", pad_left + pad_right),
            got: format!("{} frames", n_frames),
        });
    }
    Ok(input
        .slice(s![.., .., pad_left..n_frames - pad_right])
        .to_owned())
}

fn pad_time(input: ArrayView3<'_, f32>, pad_left: usize, pad_right: usize) -> Array3<f32> {
    let (batch_size, num_features, n_frames) = input.dim();
    let mut padded = Array3::<f32>::zeros((batch_size, num_features, pad_left + n_frames + pad_right));
    padded
        .slice_mut(s![.., .., pad_left..pad_left + n_frames])
        .assign(&input);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(batch_size: usize, num_features: usize, n_frames: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch_size, num_features, n_frames), |(b, f, t)| {
            (b * 100 + f * 10) as f32 + t as f32
        })
    }

    #[test]
    fn test_concrete_case() {
        // T=5, C=3, P=2 -> 2 chunks
        let x = ramp(2, 3, 5);
        let segment = Segment1d::new(3, 2).unwrap();
        let chunks = segment.forward(x.view()).unwrap();
        assert_eq!(chunks.shape(), &[2, 3, 2, 3]);

        for b in 0..2 {
            for f in 0..3 {
                for k in 0..3 {
                    assert_eq!(chunks[[b, f, 0, k]], x[[b, f, k]]);
                    assert_eq!(chunks[[b, f, 1, k]], x[[b, f, 2 + k]]);
                }
            }
        }

        let overlap_add = OverlapAdd1d::new(3, 2).unwrap();
        let y = overlap_add.forward(chunks.view()).unwrap();
        assert_eq!(y.shape(), &[2, 3, 5]);
        // position 2 is covered twice
        assert_eq!(y[[1, 2, 2]], 2.0 * x[[1, 2, 2]]);
        assert_eq!(y[[1, 2, 4]], x[[1, 2, 4]]);
    }

    #[test]
    fn test_too_short_fails() {
        let x = ramp(1, 1, 4);
        let segment = Segment1d::new(5, 1).unwrap();
        assert!(matches!(
            segment.forward(x.view()),
            Err(SepError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(matches!(Segment1d::new(0, 1), Err(SepError::InvalidConfiguration(_))));
        assert!(matches!(OverlapAdd1d::new(4, 0), Err(SepError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_overlap_add_wrong_chunk_len() {
        let chunks = Array4::<f32>::zeros((1, 1, 3, 4));
        let overlap_add = OverlapAdd1d::new(6, 2).unwrap();
        assert!(overlap_add.forward(chunks.view()).is_err());
    }

    #[test]
    fn test_coverage_counts() {
        let counts = coverage_counts(3, 4, 2).unwrap();
        assert_eq!(counts.to_vec(), vec![1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0]);
        assert_eq!(OverlapAdd1d::new(4, 2).unwrap().overlap_factor(), Some(2));
        assert_eq!(OverlapAdd1d::new(3, 2).unwrap().overlap_factor(), None);
    }

    #[test]
    fn test_zero_chunks_rejected() {
        assert!(matches!(overlap_add_len(0, 4, 2), Err(SepError::InvalidShape { .. })));
        assert!(matches!(coverage_counts(0, 4, 2), Err(SepError::InvalidShape { .. })));
        assert_eq!(overlap_add_len(1, 4, 2).unwrap(), 4);
    }

    #[test]
    fn test_pad_for_segment_aligns_grid() {
        let x = ramp(1, 2, 10);
        let (padded, left, right) = pad_for_segment(x.view(), 4, 3).unwrap();
        assert_eq!((padded.dim().2 - 4) % 3, 0);
        assert_eq!(left + right, padded.dim().2 - 10);
        assert!(left <= right);

        let restored = unpad(padded.view(), left, right).unwrap();
        assert_eq!(restored, x);
    }

    #[test]
    fn test_normalized_is_exact_inverse() {
        let x = ramp(2, 2, 11);
        let (padded, left, right) = pad_for_segment(x.view(), 5, 3).unwrap();
        let chunks = Segment1d::new(5, 3).unwrap().forward(padded.view()).unwrap();
        let y = OverlapAdd1d::new(5, 3)
            .unwrap()
            .forward_normalized(chunks.view())
            .unwrap();
        let y = unpad(y.view(), left, right).unwrap();
        for (a, b) in y.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }
}

//! Shift augmentation
//!
//! Runs the same segment through the model at several circular time shifts
//! and averages the realigned outputs. The rotation is exactly invertible,
//! so the trick trades compute for smoother output without changing what a
//! deterministic model computes.

use ndarray::{s, Array2, Array3, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Rotate a `(channels, len)` segment right by `shift` samples.
///
/// Sample `i` of the result is sample `(i - shift) mod len` of the input.
pub fn rotate(segment: ArrayView2<'_, f32>, shift: usize) -> Array2<f32> {
    let (channels, len) = segment.dim();
    let shift = shift % len.max(1);
    if shift == 0 {
        return segment.to_owned();
    }
    let mut rotated = Array2::zeros((channels, len));
    let split = len - shift;
    rotated
        .slice_mut(s![.., ..shift])
        .assign(&segment.slice(s![.., split..]));
    rotated
        .slice_mut(s![.., shift..])
        .assign(&segment.slice(s![.., ..split]));
    rotated
}

/// Undo [`rotate`] on a per-source output tensor `(sources, channels, len)`.
///
/// Applied to every source channel so the realigned output matches the
/// unshifted segment position exactly.
pub fn unrotate(output: &mut Array3<f32>, shift: usize) {
    let (_, _, len) = output.dim();
    let shift = shift % len.max(1);
    if shift == 0 {
        return;
    }
    let split = len - shift;
    let left = output.slice(s![.., .., shift..]).to_owned();
    let right = output.slice(s![.., .., ..shift]).to_owned();
    output.slice_mut(s![.., .., ..split]).assign(&left);
    output.slice_mut(s![.., .., split..]).assign(&right);
}

/// Draw `count` shift amounts from `1..=max_shift`.
///
/// With `seed = Some(_)` the draws are reproducible; draws happen up front in
/// plan order so concurrent dispatch cannot reorder them. `max_shift = 0`
/// yields all-zero shifts (the passes degenerate to unshifted runs).
pub fn draw_shifts(count: usize, max_shift: usize, seed: Option<u64>) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_os_rng(),
    };
    (0..count)
        .map(|_| {
            if max_shift == 0 {
                0
            } else {
                rng.random_range(1..=max_shift)
            }
        })
        .collect()
}

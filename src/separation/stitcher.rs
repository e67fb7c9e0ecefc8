//! Overlap stitching
//!
//! Per-segment model outputs are blended into one full-length estimate using
//! a position-dependent taper weight: each segment contributes
//! `weight(i) * value` to a value-sum buffer and `weight(i)` to a weight-sum
//! buffer, and finalization divides the two. Samples covered by two
//! overlapping segments blend smoothly instead of switching discontinuously.

use crate::config::TaperShape;
use crate::error::{DemixError, Result};
use crate::separation::planner::SegmentWindow;
use ndarray::{Array1, Array3};
use std::f32::consts::FRAC_PI_2;

/// Build the taper window for one segment.
///
/// The window is 1 in the interior and falls symmetrically to a small
/// strictly positive value over `transition` samples at each edge.
/// `transition = 0` yields a flat all-ones window, the degenerate case for
/// zero overlap where there is no neighbor to blend with. The ramp is raised
/// to `power`, which sharpens (`> 1`) or softens (`< 1`) the crossfade.
pub fn taper_window(
    segment_length: usize,
    transition: usize,
    shape: TaperShape,
    power: f32,
) -> Array1<f32> {
    let mut window = Array1::ones(segment_length);
    // Ramps from both edges must not cross, or the interior would dip below 1
    let transition = transition.min(segment_length / 2);
    for i in 0..transition {
        let t = (i + 1) as f32 / (transition + 1) as f32;
        let ramp = match shape {
            TaperShape::Linear => t,
            TaperShape::Hann => (FRAC_PI_2 * t).sin().powi(2),
        };
        let ramp = ramp.powf(power);
        window[i] = ramp;
        window[segment_length - 1 - i] = ramp;
    }
    window
}

/// Accumulates per-segment, per-source outputs for one model.
///
/// Holds a value-sum tensor `(sources, channels, total_length)` and a single
/// weight-sum array `(total_length)`; the taper weight is identical for
/// every source and channel of a segment, so one array carries the weight
/// sums for all of them. Created per model, mutated once per segment,
/// consumed by [`StemAccumulator::finalize`].
pub struct StemAccumulator {
    values: Array3<f32>,
    weights: Array1<f32>,
    window: Array1<f32>,
    total_length: usize,
}

impl StemAccumulator {
    /// Create an empty accumulator for `sources x channels x total_length`
    /// with the given segment taper window.
    pub fn new(sources: usize, channels: usize, total_length: usize, window: Array1<f32>) -> Self {
        Self {
            values: Array3::zeros((sources, channels, total_length)),
            weights: Array1::zeros(total_length),
            window,
            total_length,
        }
    }

    /// Blend one segment's per-source output into the buffers.
    ///
    /// `output` is shaped `(sources, channels, segment_length)`. Writes are
    /// clipped to `[0, total_length)`; contributions from the silence-padded
    /// tail of the final window are discarded here.
    pub fn accumulate(&mut self, window: SegmentWindow, output: &Array3<f32>) {
        let visible = window.end.min(self.total_length) - window.start;
        let (sources, channels, _) = output.dim();
        for local in 0..visible {
            let global = window.start + local;
            let w = self.window[local];
            self.weights[global] += w;
            for source in 0..sources {
                for channel in 0..channels {
                    self.values[[source, channel, global]] += w * output[[source, channel, local]];
                }
            }
        }
    }

    /// Normalize value sums by weight sums and return the full-length
    /// per-source tensor.
    ///
    /// Every sample position must have been covered by at least one segment;
    /// a non-positive weight anywhere indicates a planning bug and fails
    /// fast instead of producing NaN or inf.
    pub fn finalize(mut self) -> Result<Array3<f32>> {
        if let Some(index) = self.weights.iter().position(|&w| w.is_nan() || w <= 0.0) {
            return Err(DemixError::ArithmeticInvariantViolated { index });
        }
        let (sources, channels, _) = self.values.dim();
        for source in 0..sources {
            for channel in 0..channels {
                for i in 0..self.total_length {
                    self.values[[source, channel, i]] /= self.weights[i];
                }
            }
        }
        Ok(self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::planner;

    fn accumulate_plan(
        total: usize,
        segment: usize,
        overlap: f32,
        fill: impl Fn(SegmentWindow) -> Array3<f32>,
    ) -> StemAccumulator {
        let windows = planner::plan(total, segment, overlap);
        let stride = ((segment as f64) * (1.0 - overlap as f64)) as usize;
        let transition = segment - stride.max(1).min(segment);
        let window = taper_window(segment, transition, TaperShape::Linear, 1.0);
        let mut acc = StemAccumulator::new(1, 1, total, window);
        for w in windows {
            acc.accumulate(w, &fill(w));
        }
        acc
    }

    #[test]
    fn zero_transition_window_is_flat() {
        let window = taper_window(64, 0, TaperShape::Linear, 1.0);
        assert!(window.iter().all(|&w| w == 1.0));
        let window = taper_window(64, 0, TaperShape::Hann, 2.0);
        assert!(window.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn tapered_window_is_symmetric_monotone_and_positive() {
        for shape in [TaperShape::Linear, TaperShape::Hann] {
            let window = taper_window(100, 25, shape, 1.0);
            for i in 0..100 {
                assert!(window[i] > 0.0);
                assert!(window[i] <= 1.0);
                assert_eq!(window[i], window[99 - i]);
            }
            for i in 0..25 {
                assert!(window[i] <= window[i + 1], "not monotone at {}", i);
            }
            // Interior is exactly 1
            assert_eq!(window[50], 1.0);
        }
    }

    #[test]
    fn weight_sum_is_strictly_positive_after_full_plan() {
        for overlap in [0.0, 0.25, 0.5] {
            let acc = accumulate_plan(10_000, 1024, overlap, |w| {
                Array3::zeros((1, 1, w.len()))
            });
            assert!(acc.weights.iter().all(|&w| w > 0.0), "overlap {}", overlap);
        }
    }

    #[test]
    fn flat_window_degenerates_to_unit_weight() {
        // overlap 0: every interior sample receives weight exactly 1 from
        // exactly one segment
        let acc = accumulate_plan(5000, 1000, 0.0, |w| Array3::zeros((1, 1, w.len())));
        assert!(acc.weights.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn finalize_reconstructs_constant_signal() {
        let acc = accumulate_plan(10_000, 1024, 0.25, |w| {
            Array3::from_elem((1, 1, w.len()), 0.75)
        });
        let out = acc.finalize().unwrap();
        for &v in out.iter() {
            assert!((v - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn finalize_fails_fast_on_coverage_gap() {
        let window = taper_window(10, 0, TaperShape::Linear, 1.0);
        let mut acc = StemAccumulator::new(1, 1, 30, window);
        // Only cover [0, 10) and [20, 30), leaving a hole in the middle
        acc.accumulate(SegmentWindow { start: 0, end: 10 }, &Array3::zeros((1, 1, 10)));
        acc.accumulate(SegmentWindow { start: 20, end: 30 }, &Array3::zeros((1, 1, 10)));
        let err = acc.finalize().unwrap_err();
        match err {
            DemixError::ArithmeticInvariantViolated { index } => assert_eq!(index, 10),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tail_padding_is_discarded() {
        // 15 samples, segment 10, overlap 0: second window is [10, 20)
        let acc = accumulate_plan(15, 10, 0.0, |w| Array3::from_elem((1, 1, w.len()), 1.0));
        assert_eq!(acc.weights.len(), 15);
        assert!(acc.weights.iter().all(|&w| w == 1.0));
    }
}

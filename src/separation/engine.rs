//! Request orchestration
//!
//! Drives one separation request through its phases: plan segments, run
//! shifts x segments through each model, stitch each model's output to full
//! length, then aggregate across the bag. Models are independent (each owns
//! a private accumulator) and run through a parallel iterator; aggregation
//! only happens after every model has finished stitching. Any unrecoverable
//! failure aborts the whole request and discards partial per-model results.

use crate::cancel::CancellationToken;
use crate::config::SeparationConfig;
use crate::error::{DemixError, Result};
use crate::model::{BagEntry, ModelBag};
use crate::progress::{NoOpObserver, SeparationEvent, SeparationObserver};
use crate::separation::runner::InferenceJob;
use crate::separation::{ensemble, planner, runner, stitcher};
use crate::types::{Stems, Waveform};
use ndarray::{Array3, Axis};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// Epsilon added to the reference deviation so silent input stays finite
const NORM_EPSILON: f32 = 1e-8;

/// The separation engine: a validated configuration plus the orchestration
/// to apply a bag of models to one waveform.
pub struct SeparationEngine {
    config: SeparationConfig,
}

impl SeparationEngine {
    /// Create an engine, validating the configuration eagerly
    pub fn new(config: SeparationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this engine runs with
    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Separate a waveform with a bag of models.
    ///
    /// Returns one full-length stem per source name declared by the bag,
    /// with the same channel count, sample rate and length as the input.
    pub fn separate(
        &self,
        mix: &Waveform,
        bag: &ModelBag<'_>,
        cancel: &CancellationToken,
    ) -> Result<Stems> {
        self.separate_observed(mix, bag, cancel, &NoOpObserver)
    }

    /// [`separate`](Self::separate) with progress events delivered to an
    /// observer.
    pub fn separate_observed(
        &self,
        mix: &Waveform,
        bag: &ModelBag<'_>,
        cancel: &CancellationToken,
        observer: &dyn SeparationObserver,
    ) -> Result<Stems> {
        let started = Instant::now();

        if mix.sample_rate() != bag.sample_rate() {
            return Err(DemixError::config(format!(
                "input is {} Hz but the bag expects {} Hz (resampling is out of scope)",
                mix.sample_rate(),
                bag.sample_rate()
            )));
        }

        info!(
            duration_secs = format!("{:.2}", mix.duration()),
            channels = mix.channels(),
            models = bag.len(),
            shifts = self.config.shifts,
            overlap = self.config.overlap,
            "starting separation"
        );

        // Z-normalize against the channel-mean reference; the stems are
        // denormalized with the same statistics after aggregation. The
        // caller's input is never mutated.
        let (working, norm) = if self.config.normalize {
            let (normalized, stats) = normalize(mix)?;
            (normalized, Some(stats))
        } else {
            (mix.clone(), None)
        };

        let models = bag.len();
        let estimates: Vec<Array3<f32>> = bag
            .entries()
            .par_iter()
            .enumerate()
            .map(|(model_index, entry)| {
                self.apply_model(model_index, models, entry, bag, &working, cancel, observer)
            })
            .collect::<Result<Vec<_>>>()?;

        if cancel.is_cancelled() {
            return Err(DemixError::Cancelled);
        }

        let weights: Vec<f32> = bag.entries().iter().map(|e| e.weight).collect();
        let mut combined = ensemble::combine(estimates, &weights);

        if let Some(stats) = norm {
            denormalize(&mut combined, stats);
        }

        let stems = into_stems(combined, bag.sources(), mix.sample_rate())?;
        observer.on_event(SeparationEvent::Done);
        info!(
            elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
            "separation complete"
        );
        Ok(stems)
    }

    /// Run one model over the whole input: plan, infer, average shift
    /// passes, stitch, and align the source axis to the bag's order.
    #[allow(clippy::too_many_arguments)]
    fn apply_model(
        &self,
        model_index: usize,
        models: usize,
        entry: &BagEntry<'_>,
        bag: &ModelBag<'_>,
        mix: &Waveform,
        cancel: &CancellationToken,
        observer: &dyn SeparationObserver,
    ) -> Result<Array3<f32>> {
        let model = entry.model;
        let config = &self.config;
        let segment_length = model.segment_length();
        let total_length = mix.len();

        let windows = planner::plan(total_length, segment_length, config.overlap);
        let segments = windows.len();
        observer.on_event(SeparationEvent::ModelStarted {
            model_index,
            models,
            segments,
        });
        debug!(
            model = model.name(),
            segments,
            segment_length,
            "planned segments"
        );

        // One unshifted pass plus `shifts` randomized passes per segment.
        // Shift amounts are drawn up front in plan order so a fixed seed is
        // reproducible regardless of how batches interleave across workers.
        let passes = config.shifts + 1;
        let max_shift = ((config.max_shift_seconds as f64) * model.sample_rate() as f64) as usize;
        let max_shift = max_shift.min(segment_length / 2);
        let seed = config.seed.map(|s| s.wrapping_add(model_index as u64));
        let draws = shift_draws(segments, config.shifts, max_shift, seed);

        let mut jobs = Vec::with_capacity(segments * passes);
        for (segment_index, window) in windows.iter().enumerate() {
            jobs.push(InferenceJob {
                window: *window,
                shift: 0,
            });
            for pass in 0..config.shifts {
                jobs.push(InferenceJob {
                    window: *window,
                    shift: draws[segment_index * config.shifts + pass],
                });
            }
        }

        let outputs = runner::run_jobs(model, mix, &jobs, config, cancel)?;

        // Stitch: average the passes of each segment, then blend segments
        // into the full-length buffers under the taper window
        let stride = planned_stride(segment_length, config.overlap);
        let window_weights = stitcher::taper_window(
            segment_length,
            segment_length - stride,
            config.taper,
            config.transition_power,
        );
        let mut accumulator = stitcher::StemAccumulator::new(
            model.sources().len(),
            mix.channels(),
            total_length,
            window_weights,
        );

        let mut outputs = outputs.into_iter();
        let mut next_output = move || {
            outputs
                .next()
                .ok_or_else(|| DemixError::inference("runner returned too few outputs"))
        };
        for (segment_index, window) in windows.iter().enumerate() {
            let mut averaged = next_output()?;
            for _ in 1..passes {
                averaged += &next_output()?;
            }
            if passes > 1 {
                averaged /= passes as f32;
            }
            accumulator.accumulate(*window, &averaged);
            observer.on_event(SeparationEvent::SegmentDone {
                model_index,
                segment_index,
                segments,
            });
        }

        if cancel.is_cancelled() {
            return Err(DemixError::Cancelled);
        }

        let estimate = accumulator.finalize()?;
        let estimate = align_sources(estimate, model.sources(), bag.sources())?;
        observer.on_event(SeparationEvent::ModelStitched {
            model_index,
            models,
        });
        Ok(estimate)
    }
}

/// Stride between consecutive window starts, matching the planner
fn planned_stride(segment_length: usize, overlap: f32) -> usize {
    (((segment_length as f64) * (1.0 - overlap as f64)) as usize).max(1)
}

/// Draw the randomized shift amounts for all (segment, extra pass) pairs
fn shift_draws(
    segments: usize,
    shifts: usize,
    max_shift: usize,
    seed: Option<u64>,
) -> Vec<usize> {
    crate::separation::shift::draw_shifts(segments * shifts, max_shift, seed)
}

/// Statistics used to undo input normalization
#[derive(Debug, Clone, Copy)]
struct NormStats {
    mean: f32,
    deviation: f32,
}

/// Z-normalize a waveform by the mean and deviation of its channel-mean
/// reference signal.
fn normalize(mix: &Waveform) -> Result<(Waveform, NormStats)> {
    let data = mix.data();
    let reference = data
        .mean_axis(Axis(0))
        .ok_or_else(|| DemixError::config("cannot normalize a zero-channel waveform"))?;
    let mean = reference.mean().unwrap_or(0.0);
    let len = reference.len();
    let variance = if len > 1 {
        reference.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / (len - 1) as f32
    } else {
        0.0
    };
    let deviation = variance.sqrt() + NORM_EPSILON;

    let normalized = data.mapv(|v| (v - mean) / deviation);
    let stats = NormStats { mean, deviation };
    Ok((Waveform::new(normalized, mix.sample_rate())?, stats))
}

/// Undo [`normalize`] on the aggregated per-source tensor
fn denormalize(combined: &mut Array3<f32>, stats: NormStats) {
    combined.mapv_inplace(|v| v * stats.deviation + stats.mean);
}

/// Permute a model's source axis into the bag's declared order.
///
/// Bag validation guarantees equal source-name sets; orders may differ.
fn align_sources(
    estimate: Array3<f32>,
    model_order: &[String],
    bag_order: &[String],
) -> Result<Array3<f32>> {
    if model_order == bag_order {
        return Ok(estimate);
    }
    let indices: Vec<usize> = bag_order
        .iter()
        .map(|name| {
            model_order
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| DemixError::ModelSetMismatch {
                    expected: bag_order.to_vec(),
                    found: model_order.to_vec(),
                })
        })
        .collect::<Result<_>>()?;
    Ok(estimate.select(Axis(0), &indices))
}

/// Split the aggregated tensor into named per-source waveforms
fn into_stems(combined: Array3<f32>, sources: &[String], sample_rate: u32) -> Result<Stems> {
    let mut entries = Vec::with_capacity(sources.len());
    for (index, name) in sources.iter().enumerate() {
        let channel_data = combined.index_axis(Axis(0), index).to_owned();
        entries.push((name.clone(), Waveform::new(channel_data, sample_rate)?));
    }
    Ok(Stems::from_entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_matches_planner_and_never_hits_zero() {
        assert_eq!(planned_stride(1000, 0.0), 1000);
        assert_eq!(planned_stride(1000, 0.25), 750);
        assert_eq!(planned_stride(2, 0.99), 1);
    }

    #[test]
    fn normalization_round_trips() {
        let mix = Waveform::from_mono(vec![0.5, -0.25, 0.75, 0.0], 100).unwrap();
        let (normalized, stats) = normalize(&mix).unwrap();
        let mut data = normalized
            .into_data()
            .into_shape_with_order((1, 1, 4))
            .unwrap();
        denormalize(&mut data, stats);
        for (a, b) in data.iter().zip(mix.data().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn silent_input_normalizes_to_finite_values() {
        let mix = Waveform::from_mono(vec![0.0; 128], 100).unwrap();
        let (normalized, _) = normalize(&mix).unwrap();
        assert!(normalized.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn align_sources_permutes_by_name() {
        let estimate = Array3::from_shape_fn((2, 1, 3), |(s, _, i)| (s * 100 + i) as f32);
        let model_order = vec!["drums".to_string(), "vocals".to_string()];
        let bag_order = vec!["vocals".to_string(), "drums".to_string()];
        let aligned = align_sources(estimate, &model_order, &bag_order).unwrap();
        // "vocals" was the model's axis 1
        assert_eq!(aligned[[0, 0, 0]], 100.0);
        assert_eq!(aligned[[1, 0, 0]], 0.0);
    }
}

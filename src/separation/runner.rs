//! Batched model invocation
//!
//! Owns device placement for one model's (segment x shift) inference jobs.
//! Jobs are grouped into batches and dispatched to one worker thread per
//! configured compute unit over channels; workers pull batches as they free
//! up and results are re-keyed by batch index, so dispatch order never leaks
//! into the stitcher. Segment data is extracted from the shared input inside
//! the worker, keeping peak memory at `workers x batch x segment` rather
//! than the whole job list.
//!
//! A forward call that reports resource exhaustion (or overruns the batch
//! timeout) is retried as two half batches, down to single-segment batches;
//! a failing single-segment batch is retried once on the CPU when
//! `cpu_fallback` is set, and otherwise fails the request.

use crate::cancel::CancellationToken;
use crate::config::{ComputeDevice, SeparationConfig};
use crate::error::{DemixError, Result};
use crate::model::SeparationModel;
use crate::separation::planner::SegmentWindow;
use crate::separation::shift;
use crate::types::Waveform;
use crossbeam_channel::{bounded, unbounded};
use ndarray::{s, Array2, Array3};
use std::time::Instant;
use tracing::{debug, warn};

/// One inference job: a planned window at one shift pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InferenceJob {
    pub window: SegmentWindow,
    pub shift: usize,
}

/// Run all jobs for one model, returning per-job `(sources, channels,
/// segment_length)` outputs in job order, already realigned (unshifted).
pub(crate) fn run_jobs(
    model: &dyn SeparationModel,
    mix: &Waveform,
    jobs: &[InferenceJob],
    config: &SeparationConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Array3<f32>>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let devices = config.dispatch_devices();
    let batches: Vec<(usize, &[InferenceJob])> =
        jobs.chunks(config.batch_size).enumerate().collect();
    debug!(
        model = model.name(),
        jobs = jobs.len(),
        batches = batches.len(),
        workers = devices.len(),
        "dispatching inference batches"
    );

    let (job_tx, job_rx) = bounded::<(usize, &[InferenceJob])>(devices.len() * 2);
    let (result_tx, result_rx) = unbounded::<(usize, Result<Vec<Array3<f32>>>)>();

    std::thread::scope(|scope| {
        for device in &devices {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let device = *device;
            scope.spawn(move || {
                for (batch_id, batch) in job_rx {
                    // Cooperative cancellation between batches, never mid-batch
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = run_batch_jobs(model, device, mix, batch, config);
                    let failed = outcome.is_err();
                    if result_tx.send((batch_id, outcome)).is_err() || failed {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        for entry in batches {
            if cancel.is_cancelled() {
                break;
            }
            if job_tx.send(entry).is_err() {
                // All workers exited early; the drain below reports why
                break;
            }
        }
        drop(job_tx);

        let mut collected: Vec<Option<Vec<Array3<f32>>>> =
            (0..jobs.len().div_ceil(config.batch_size)).map(|_| None).collect();
        let mut first_error: Option<(usize, DemixError)> = None;
        for (batch_id, outcome) in result_rx {
            match outcome {
                Ok(outputs) => collected[batch_id] = Some(outputs),
                Err(err) => match &first_error {
                    Some((id, _)) if *id <= batch_id => {}
                    _ => first_error = Some((batch_id, err)),
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(DemixError::Cancelled);
        }
        if let Some((_, err)) = first_error {
            return Err(err);
        }

        let mut ordered = Vec::with_capacity(jobs.len());
        for slot in collected {
            match slot {
                Some(outputs) => ordered.extend(outputs),
                // A worker exited without reporting; treat as cancellation of
                // its remaining batches (only reachable on early shutdown)
                None => return Err(DemixError::Cancelled),
            }
        }
        Ok(ordered)
    })
}

/// Run one batch of jobs on a device: extract and rotate the segments, drive
/// the halve-and-retry forward, then realign each output.
fn run_batch_jobs(
    model: &dyn SeparationModel,
    device: ComputeDevice,
    mix: &Waveform,
    batch: &[InferenceJob],
    config: &SeparationConfig,
) -> Result<Vec<Array3<f32>>> {
    let inputs: Vec<Array2<f32>> = batch
        .iter()
        .map(|job| shift::rotate(extract_segment(mix, job.window).view(), job.shift))
        .collect();

    let mut outputs = run_with_retry(model, device, inputs, config)?;

    for (output, job) in outputs.iter_mut().zip(batch) {
        shift::unrotate(output, job.shift);
    }
    Ok(outputs)
}

/// Copy one window out of the input, silence-padding past the true end.
fn extract_segment(mix: &Waveform, window: SegmentWindow) -> Array2<f32> {
    let data = mix.data();
    let (channels, total) = data.dim();
    let mut segment = Array2::zeros((channels, window.len()));
    let visible = window.end.min(total).saturating_sub(window.start);
    if visible > 0 {
        segment
            .slice_mut(s![.., ..visible])
            .assign(&data.slice(s![.., window.start..window.start + visible]));
    }
    segment
}

/// Forward a set of segments, halving the batch on resource exhaustion.
///
/// Outputs come back in input order. At batch size 1 a resource failure is
/// retried once on the CPU iff `cpu_fallback` is set and the job was not
/// already on the CPU; after that it surfaces as `ResourceExhausted`.
fn run_with_retry(
    model: &dyn SeparationModel,
    device: ComputeDevice,
    inputs: Vec<Array2<f32>>,
    config: &SeparationConfig,
) -> Result<Vec<Array3<f32>>> {
    let size = inputs.len();
    match forward_once(model, device, &inputs, config) {
        Ok(outputs) => Ok(outputs),
        Err(err) if err.is_resource() => {
            if size > 1 {
                warn!(
                    model = model.name(),
                    %device,
                    batch_size = size,
                    "batch failed, retrying as two halves: {err}"
                );
                let mut left = inputs;
                let right = left.split_off(size / 2);
                let mut outputs = run_with_retry(model, device, left, config)?;
                outputs.extend(run_with_retry(model, device, right, config)?);
                Ok(outputs)
            } else if config.cpu_fallback && device != ComputeDevice::Cpu {
                warn!(
                    model = model.name(),
                    %device,
                    "single-segment batch failed, falling back to cpu: {err}"
                );
                run_with_retry(model, ComputeDevice::Cpu, inputs, config)
            } else {
                Err(DemixError::ResourceExhausted {
                    batch_size: 1,
                    reason: err.to_string(),
                })
            }
        }
        Err(other) => Err(other),
    }
}

/// Stack the segments, run the model once, and split the output per job.
///
/// Exceeding the configured batch timeout is reported as resource
/// exhaustion so it feeds the same halve-and-retry policy.
fn forward_once(
    model: &dyn SeparationModel,
    device: ComputeDevice,
    inputs: &[Array2<f32>],
    config: &SeparationConfig,
) -> Result<Vec<Array3<f32>>> {
    let size = inputs.len();
    let (channels, segment_length) = inputs[0].dim();
    let mut batch = Array3::zeros((size, channels, segment_length));
    for (i, input) in inputs.iter().enumerate() {
        batch.slice_mut(s![i, .., ..]).assign(input);
    }

    let started = Instant::now();
    let output = model.forward(device, batch.view())?;
    let elapsed = started.elapsed();

    if let Some(timeout) = config.batch_timeout {
        if elapsed > timeout {
            return Err(DemixError::ResourceExhausted {
                batch_size: size,
                reason: format!(
                    "batch of {} took {:.2}s, over the {:.2}s budget",
                    size,
                    elapsed.as_secs_f64(),
                    timeout.as_secs_f64()
                ),
            });
        }
    }

    let expected = (size, model.sources().len(), channels, segment_length);
    if output.dim() != expected {
        return Err(DemixError::inference(format!(
            "model '{}' returned shape {:?}, expected {:?}",
            model.name(),
            output.dim(),
            expected
        )));
    }

    Ok((0..size)
        .map(|i| output.index_axis(ndarray::Axis(0), i).to_owned())
        .collect())
}

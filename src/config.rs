//! Runtime configuration for a separation request

use crate::error::{DemixError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A compute unit that batches can be dispatched to.
///
/// The engine never talks to hardware itself; the device is handed to the
/// model's forward call so the opaque backend can place the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeDevice {
    /// Host CPU
    Cpu,
    /// Accelerator (GPU or similar), identified by ordinal
    Accelerator(usize),
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Accelerator(n) => write!(f, "accelerator:{}", n),
        }
    }
}

/// Shape of the taper applied to segment edges before overlap stitching.
///
/// Both shapes are symmetric, rise monotonically from a strictly positive
/// edge value to 1 over the overlap region, and reduce to a flat window when
/// the overlap is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaperShape {
    /// Linear ramp (triangular blend across the overlap)
    #[default]
    Linear,
    /// Raised-cosine ramp (smoother blend at segment boundaries)
    Hann,
}

/// Runtime settings for the separation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Fraction of each segment shared with its neighbor, in `[0, 1)`
    pub overlap: f32,
    /// Number of extra randomized time-shift passes per segment.
    /// `0` runs each segment once; `K` averages `K + 1` passes.
    pub shifts: usize,
    /// Upper bound for randomized shifts, in seconds at the model rate.
    /// Clamped to half the model segment length.
    pub max_shift_seconds: f32,
    /// Target number of segments per inference batch
    pub batch_size: usize,
    /// Compute units to dispatch batches to. When empty, `jobs` CPU workers
    /// are used instead.
    pub devices: Vec<ComputeDevice>,
    /// Number of CPU dispatch workers used when `devices` is empty
    pub jobs: usize,
    /// Retry a failing minimum-size batch on the CPU before giving up
    pub cpu_fallback: bool,
    /// Seed for shift randomization. `Some` makes shift draws reproducible.
    pub seed: Option<u64>,
    /// Taper shape used by the overlap stitcher
    pub taper: TaperShape,
    /// Exponent applied to the taper ramp (1.0 = linear blend weighting)
    pub transition_power: f32,
    /// Per-batch wall-clock budget. Exceeding it triggers the same
    /// halve-and-retry policy as resource exhaustion.
    pub batch_timeout: Option<Duration>,
    /// Z-normalize the mix before separation and denormalize the stems after
    pub normalize: bool,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            overlap: 0.25,
            shifts: 0,
            max_shift_seconds: 0.5,
            batch_size: 4,
            devices: Vec::new(),
            jobs: num_cpus::get().saturating_sub(1).max(1),
            cpu_fallback: false,
            seed: None,
            taper: TaperShape::Linear,
            transition_power: 1.0,
            batch_timeout: None,
            normalize: true,
        }
    }
}

impl SeparationConfig {
    /// Validate the configuration before any compute is dispatched
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(DemixError::config(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if self.batch_size == 0 {
            return Err(DemixError::config("batch_size must be at least 1"));
        }
        if self.jobs == 0 && self.devices.is_empty() {
            return Err(DemixError::config(
                "jobs must be at least 1 when no devices are configured",
            ));
        }
        if self.max_shift_seconds.is_nan() || self.max_shift_seconds < 0.0 {
            return Err(DemixError::config(format!(
                "max_shift_seconds must be non-negative, got {}",
                self.max_shift_seconds
            )));
        }
        if self.shifts > 0 && self.max_shift_seconds == 0.0 {
            return Err(DemixError::config(
                "shifts > 0 requires a positive max_shift_seconds",
            ));
        }
        if self.transition_power.is_nan() || self.transition_power <= 0.0 {
            return Err(DemixError::config(format!(
                "transition_power must be positive, got {}",
                self.transition_power
            )));
        }
        if let Some(timeout) = self.batch_timeout {
            if timeout.is_zero() {
                return Err(DemixError::config("batch_timeout must be non-zero"));
            }
        }
        Ok(())
    }

    /// Compute units batches will be dispatched to, after defaulting
    pub(crate) fn dispatch_devices(&self) -> Vec<ComputeDevice> {
        if self.devices.is_empty() {
            vec![ComputeDevice::Cpu; self.jobs]
        } else {
            self.devices.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SeparationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_overlap() {
        let mut config = SeparationConfig::default();
        config.overlap = 1.0;
        assert!(config.validate().is_err());
        config.overlap = -0.1;
        assert!(config.validate().is_err());
        config.overlap = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_size_and_nonpositive_power() {
        let mut config = SeparationConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SeparationConfig::default();
        config.transition_power = 0.0;
        assert!(config.validate().is_err());
        config.transition_power = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shifts_without_shift_range() {
        let mut config = SeparationConfig::default();
        config.shifts = 2;
        config.max_shift_seconds = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_device_list_expands_to_cpu_workers() {
        let mut config = SeparationConfig::default();
        config.jobs = 3;
        assert_eq!(config.dispatch_devices(), vec![ComputeDevice::Cpu; 3]);

        config.devices = vec![ComputeDevice::Accelerator(0), ComputeDevice::Cpu];
        assert_eq!(config.dispatch_devices().len(), 2);
    }
}

//! Core data types for demix
//!
//! These types represent the domain model that flows through a separation
//! request: the immutable input waveform and the final per-source stems.

use crate::error::{DemixError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};

// =============================================================================
// Waveform
// =============================================================================

/// A multi-channel waveform at a known sample rate.
///
/// Samples are stored as a `(channels, samples)` tensor of float amplitudes.
/// Channel count and sample rate are fixed for the lifetime of a separation
/// request; every intermediate buffer in the engine shares the input's rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    data: Array2<f32>,
    sample_rate: u32,
}

impl Waveform {
    /// Create a waveform from a `(channels, samples)` tensor.
    ///
    /// Fails with a configuration error if the tensor is empty in either
    /// dimension or the sample rate is zero.
    pub fn new(data: Array2<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DemixError::config("sample rate must be non-zero"));
        }
        let (channels, samples) = data.dim();
        if channels == 0 || samples == 0 {
            return Err(DemixError::config(format!(
                "waveform must have at least one channel and one sample (got {}x{})",
                channels, samples
            )));
        }
        Ok(Self { data, sample_rate })
    }

    /// Create a mono waveform from a flat sample buffer
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        let len = samples.len();
        let data = Array2::from_shape_vec((1, len), samples)
            .map_err(|e| DemixError::config(format!("invalid mono buffer: {}", e)))?;
        Self::new(data, sample_rate)
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.data.dim().1
    }

    /// True if the waveform holds no samples (unreachable via constructors)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Borrow the underlying `(channels, samples)` tensor
    pub fn data(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Borrow one channel as a flat sample view
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f32> {
        self.data.row(index)
    }

    /// Consume the waveform and return the underlying tensor
    pub fn into_data(self) -> Array2<f32> {
        self.data
    }
}

// =============================================================================
// Stems
// =============================================================================

/// Final separation result: one full-length waveform per source name.
///
/// Preserves the source order declared by the model descriptors rather than
/// sorting names, so `iter()` yields stems in model output order.
#[derive(Debug, Clone)]
pub struct Stems {
    entries: Vec<(String, Waveform)>,
}

impl Stems {
    pub(crate) fn from_entries(entries: Vec<(String, Waveform)>) -> Self {
        Self { entries }
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no stems
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a stem by source name
    pub fn get(&self, name: &str) -> Option<&Waveform> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, w)| w)
    }

    /// Source names in declared order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate over (name, waveform) pairs in declared order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Waveform)> {
        self.entries.iter().map(|(n, w)| (n.as_str(), w))
    }
}

impl IntoIterator for Stems {
    type Item = (String, Waveform);
    type IntoIter = std::vec::IntoIter<(String, Waveform)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn waveform_rejects_empty_and_zero_rate() {
        assert!(Waveform::new(Array2::zeros((0, 10)), 44100).is_err());
        assert!(Waveform::new(Array2::zeros((2, 0)), 44100).is_err());
        assert!(Waveform::new(Array2::zeros((2, 10)), 0).is_err());
        assert!(Waveform::from_mono(vec![], 44100).is_err());
    }

    #[test]
    fn waveform_shape_accessors() {
        let wav = Waveform::new(array![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]], 100).unwrap();
        assert_eq!(wav.channels(), 2);
        assert_eq!(wav.len(), 3);
        assert_eq!(wav.sample_rate(), 100);
        assert!((wav.duration() - 0.03).abs() < 1e-12);
        assert_eq!(wav.channel(1)[2], 5.0);
    }

    #[test]
    fn stems_preserve_declared_order() {
        let wav = Waveform::from_mono(vec![0.0; 4], 100).unwrap();
        let stems = Stems::from_entries(vec![
            ("vocals".to_string(), wav.clone()),
            ("drums".to_string(), wav.clone()),
            ("bass".to_string(), wav),
        ]);
        let names: Vec<_> = stems.names().collect();
        assert_eq!(names, ["vocals", "drums", "bass"]);
        assert!(stems.get("drums").is_some());
        assert!(stems.get("piano").is_none());
    }
}

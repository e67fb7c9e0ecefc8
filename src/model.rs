//! Opaque model contract
//!
//! The engine treats a separation model as a capability: a callable taking a
//! batch of fixed-length waveform segments and returning per-source segments
//! of the same length. Model weights are loaded and owned by an external
//! collaborator; the engine holds only borrowed references for the duration
//! of one request.

use crate::config::ComputeDevice;
use crate::error::{DemixError, Result};
use ndarray::{Array4, ArrayView3};

/// A trained separation model behind an opaque forward function.
///
/// Implementations must be safe to share across concurrent inference jobs:
/// `forward` takes `&self` and must not mutate the model.
pub trait SeparationModel: Send + Sync {
    /// Run the model on a batch of segments.
    ///
    /// # Arguments
    /// * `device` - compute unit the backend should place this batch on
    /// * `batch` - input tensor shaped `(batch, channels, segment_length)`
    ///
    /// # Returns
    /// Output tensor shaped `(batch, sources, channels, segment_length)`.
    /// A backend that runs out of device capacity must return
    /// [`DemixError::ResourceExhausted`] so the runner can halve the batch
    /// and retry.
    fn forward(&self, device: ComputeDevice, batch: ArrayView3<'_, f32>) -> Result<Array4<f32>>;

    /// Sample rate the model was trained at
    fn sample_rate(&self) -> u32;

    /// Required segment length in samples
    fn segment_length(&self) -> usize;

    /// Output source names, in the model's fixed output order
    fn sources(&self) -> &[String];

    /// Name of this model (for logging)
    fn name(&self) -> &str {
        "model"
    }
}

/// One model in an ensemble, with its aggregation weight.
pub struct BagEntry<'a> {
    pub model: &'a dyn SeparationModel,
    /// Ensemble weight; weights are normalized by their sum at aggregation
    /// time and need not sum to 1.
    pub weight: f32,
}

impl std::fmt::Debug for BagEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BagEntry")
            .field("model", &self.model.name())
            .field("weight", &self.weight)
            .finish()
    }
}

impl<'a> BagEntry<'a> {
    /// Wrap a model with the default weight of 1.0
    pub fn new(model: &'a dyn SeparationModel) -> Self {
        Self { model, weight: 1.0 }
    }

    /// Wrap a model with an explicit ensemble weight
    pub fn weighted(model: &'a dyn SeparationModel, weight: f32) -> Self {
        Self { model, weight }
    }
}

/// A non-empty ordered ensemble ("bag") of models.
///
/// Construction validates everything that can be checked before inference:
/// agreement on source-name sets, a uniform sample rate, usable segment
/// lengths, and usable weights.
pub struct ModelBag<'a> {
    entries: Vec<BagEntry<'a>>,
}

impl std::fmt::Debug for ModelBag<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

impl<'a> ModelBag<'a> {
    /// Build a bag of one model with weight 1.0
    pub fn single(model: &'a dyn SeparationModel) -> Result<Self> {
        Self::new(vec![BagEntry::new(model)])
    }

    /// Build a validated bag from entries
    pub fn new(entries: Vec<BagEntry<'a>>) -> Result<Self> {
        if entries.is_empty() {
            return Err(DemixError::config("model bag must not be empty"));
        }

        let first = entries[0].model;
        if first.sources().is_empty() {
            return Err(DemixError::config(format!(
                "model '{}' declares no output sources",
                first.name()
            )));
        }
        let expected_set = sorted_sources(first);

        for entry in &entries {
            let model = entry.model;
            if model.segment_length() == 0 {
                return Err(DemixError::config(format!(
                    "model '{}' has a zero segment length",
                    model.name()
                )));
            }
            if model.sample_rate() != first.sample_rate() {
                return Err(DemixError::config(format!(
                    "model '{}' expects {} Hz but the bag runs at {} Hz",
                    model.name(),
                    model.sample_rate(),
                    first.sample_rate()
                )));
            }
            if sorted_sources(model) != expected_set {
                return Err(DemixError::ModelSetMismatch {
                    expected: first.sources().to_vec(),
                    found: model.sources().to_vec(),
                });
            }
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(DemixError::config(format!(
                    "model '{}' has an invalid ensemble weight {}",
                    model.name(),
                    entry.weight
                )));
            }
        }

        if entries.iter().map(|e| e.weight).sum::<f32>() <= 0.0 {
            return Err(DemixError::config(
                "ensemble weights must not all be zero",
            ));
        }

        Ok(Self { entries })
    }

    /// Models with their weights, in bag order
    pub fn entries(&self) -> &[BagEntry<'a>] {
        &self.entries
    }

    /// Number of models in the bag
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; bags are non-empty by construction
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sample rate shared by every model in the bag
    pub fn sample_rate(&self) -> u32 {
        self.entries[0].model.sample_rate()
    }

    /// Output source names in the first model's declared order
    pub fn sources(&self) -> &[String] {
        self.entries[0].model.sources()
    }
}

fn sorted_sources(model: &dyn SeparationModel) -> Vec<&str> {
    let mut names: Vec<&str> = model.sources().iter().map(String::as_str).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    struct StubModel {
        sources: Vec<String>,
        sample_rate: u32,
        segment_length: usize,
    }

    impl StubModel {
        fn new(sources: &[&str]) -> Self {
            Self {
                sources: sources.iter().map(|s| s.to_string()).collect(),
                sample_rate: 44100,
                segment_length: 1024,
            }
        }
    }

    impl SeparationModel for StubModel {
        fn forward(
            &self,
            _device: ComputeDevice,
            batch: ArrayView3<'_, f32>,
        ) -> Result<Array4<f32>> {
            let (b, ch, len) = batch.dim();
            Ok(Array4::zeros((b, self.sources.len(), ch, len)))
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn segment_length(&self) -> usize {
            self.segment_length
        }

        fn sources(&self) -> &[String] {
            &self.sources
        }
    }

    #[test]
    fn empty_bag_is_rejected() {
        assert!(ModelBag::new(vec![]).is_err());
    }

    #[test]
    fn mismatched_source_sets_are_rejected() {
        let a = StubModel::new(&["vocals", "drums"]);
        let b = StubModel::new(&["vocals", "bass"]);
        let err = ModelBag::new(vec![BagEntry::new(&a), BagEntry::new(&b)]).unwrap_err();
        assert!(matches!(err, DemixError::ModelSetMismatch { .. }));
    }

    #[test]
    fn reordered_source_sets_agree() {
        let a = StubModel::new(&["vocals", "drums"]);
        let b = StubModel::new(&["drums", "vocals"]);
        let bag = ModelBag::new(vec![BagEntry::new(&a), BagEntry::new(&b)]).unwrap();
        // Output order follows the first model
        assert_eq!(bag.sources(), ["vocals".to_string(), "drums".to_string()]);
    }

    #[test]
    fn mixed_sample_rates_are_rejected() {
        let a = StubModel::new(&["vocals"]);
        let mut b = StubModel::new(&["vocals"]);
        b.sample_rate = 48000;
        assert!(ModelBag::new(vec![BagEntry::new(&a), BagEntry::new(&b)]).is_err());
    }

    #[test]
    fn bag_debug_lists_model_names_and_weights() {
        let a = StubModel::new(&["vocals"]);
        let bag = ModelBag::new(vec![BagEntry::weighted(&a, 2.0)]).unwrap();
        let rendered = format!("{:?}", bag);
        assert!(rendered.contains("model"), "missing name in {rendered}");
        assert!(rendered.contains("2.0"), "missing weight in {rendered}");
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let a = StubModel::new(&["vocals"]);
        assert!(ModelBag::new(vec![BagEntry::weighted(&a, -1.0)]).is_err());
        assert!(ModelBag::new(vec![BagEntry::weighted(&a, f32::NAN)]).is_err());
        assert!(ModelBag::new(vec![BagEntry::weighted(&a, 0.0)]).is_err());
    }
}

//! Observation hooks for separation progress
//!
//! Emits lightweight events at phase boundaries: enough for progress bars
//! and diagnostics without copying audio buffers.

/// Events emitted while a separation request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationEvent {
    /// Inference for one model is starting; `segments` is its planned
    /// window count
    ModelStarted {
        model_index: usize,
        models: usize,
        segments: usize,
    },

    /// All shift passes for one segment of one model finished
    SegmentDone {
        model_index: usize,
        segment_index: usize,
        segments: usize,
    },

    /// One model's output has been stitched to full length
    ModelStitched { model_index: usize, models: usize },

    /// Ensemble aggregation finished; the result is about to be returned
    Done,
}

/// Trait for observing a separation request. Implement for UI progress,
/// logging, etc. Observers are shared across worker threads.
pub trait SeparationObserver: Send + Sync {
    /// Called at each phase boundary with the event that just happened
    fn on_event(&self, event: SeparationEvent);
}

/// No-op observer used when the caller does not care about progress.
pub struct NoOpObserver;

impl SeparationObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: SeparationEvent) {}
}

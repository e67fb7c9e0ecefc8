//! Segment planning
//!
//! Long audio cannot be fed to a model at once, so it is covered by
//! fixed-length windows at a fixed stride. Every window has exactly the
//! model's segment length; the tail window may reference samples past the
//! true end and is silence-padded on extraction, so there is no
//! partial-length special case downstream.

/// A half-open `[start, end)` window into the input, in samples.
///
/// `end - start` always equals the planned segment length; `end` may exceed
/// the input length for the tail window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindow {
    pub start: usize,
    pub end: usize,
}

impl SegmentWindow {
    /// Window length in samples
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Windows are never empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Compute the ordered list of windows covering `[0, total_length)`.
///
/// Windows start at multiples of `stride = max(1, segment_length * (1 - overlap))`
/// and continue while the start lies inside the signal, so the union of
/// windows always covers the full input with no gaps. With `overlap = 0` the
/// windows are contiguous and disjoint over the interior.
///
/// Callers must have validated `overlap` in `[0, 1)` and both lengths >= 1.
pub fn plan(total_length: usize, segment_length: usize, overlap: f32) -> Vec<SegmentWindow> {
    debug_assert!((0.0..1.0).contains(&overlap));
    debug_assert!(total_length >= 1 && segment_length >= 1);

    if total_length <= segment_length {
        return vec![SegmentWindow {
            start: 0,
            end: segment_length,
        }];
    }

    let stride = ((segment_length as f64) * (1.0 - overlap as f64)) as usize;
    let stride = stride.max(1);

    let mut windows = Vec::with_capacity(total_length / stride + 1);
    let mut start = 0;
    while start < total_length {
        windows.push(SegmentWindow {
            start,
            end: start + segment_length,
        });
        start += stride;
    }
    windows
}

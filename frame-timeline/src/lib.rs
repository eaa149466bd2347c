//! Reconstructs per-frame timing for a display compositor: which application
//! buffers went into each composited frame, how the observed timestamps
//! compare to the predictions made at scheduling time, and which party is at
//! fault when a frame misses its deadline.
//!
//! The engine is advisory. Producers hand it predictions and observed
//! timestamps; classification and packet emission happen later, when the
//! hardware present fence for a cycle resolves.

pub mod display_frame;
pub mod dump;
pub mod fence;
pub mod jank;
pub mod sink;
pub mod stats;
pub mod surface_frame;
pub mod timeline;
pub mod token;

pub use display_frame::DisplayFrame;
pub use fence::{FenceTime, PresentFence, SIGNAL_TIME_INVALID, SIGNAL_TIME_PENDING};
pub use jank::{
    FramePresentMetadata, FrameReadyMetadata, FrameStartMetadata, JankClassificationThresholds,
    JankType,
};
pub use sink::{MemorySink, NullSink, StreamSink, TraceSink};
pub use stats::{JankStats, NoopJankStats};
pub use surface_frame::{PresentState, SurfaceFrame};
pub use timeline::{FrameTimeline, DEFAULT_MAX_DISPLAY_FRAMES};
pub use token::{TokenManager, MAX_RETENTION_TIME_NS};

/// Token value meaning "no prediction backs this frame". Matches the
/// compositor-wide invalid vsync id.
pub const INVALID_TOKEN: i64 = -1;

/// Timestamps for one frame's lifecycle, in nanoseconds. A zero field means
/// the event has not been observed (or predicted).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimelineItem {
    pub start: i64,
    pub end: i64,
    pub present: i64,
}

impl TimelineItem {
    pub const fn new(start: i64, end: i64, present: i64) -> Self {
        Self {
            start,
            end,
            present,
        }
    }
}

/// Outcome of resolving a token against the prediction registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionState {
    /// Token resolved to a live prediction.
    Valid,
    /// Token existed but its prediction was already evicted.
    Expired,
    /// No token was supplied.
    None,
}

pub fn monotonic_now_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec * 1_000_000_000 + ts.tv_nsec
}

/// Smallest known timestamp across a frame's predictions and actuals. Zero
/// fields are unset and never participate; predictions only count when they
/// are valid, in which case their start bounds the rest of the triple.
pub(crate) fn min_frame_time(
    prediction_state: PredictionState,
    predictions: TimelineItem,
    actuals: TimelineItem,
) -> i64 {
    let mut min_time = i64::MAX;
    if prediction_state == PredictionState::Valid {
        min_time = min_time.min(predictions.start);
    }
    for actual in [actuals.start, actuals.end, actuals.present] {
        if actual != 0 {
            min_time = min_time.min(actual);
        }
    }
    min_time
}

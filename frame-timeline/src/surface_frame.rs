use std::sync::Weak;

use parking_lot::Mutex;
use timeline_format as wire;
use tracing::debug;

use crate::jank::{
    FramePresentMetadata, FrameReadyMetadata, JankClassificationThresholds, JankType,
};
use crate::sink::TraceSink;
use crate::stats::JankStats;
use crate::{min_frame_time, monotonic_now_ns, PredictionState, TimelineItem, INVALID_TOKEN};

/// What the compositor ultimately did with a submitted buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentState {
    /// The buffer was latched and composited to the display.
    Presented,
    /// The buffer was dropped without reaching the display.
    Dropped,
    /// The compositor has not seen this buffer yet.
    Unknown,
}

struct SurfaceFrameState {
    actuals: TimelineItem,
    actual_queue_time: i64,
    acquire_fence_time: i64,
    present_state: PresentState,
    last_latch_time: i64,
    jank_type: JankType,
    present_metadata: FramePresentMetadata,
    ready_metadata: FrameReadyMetadata,
}

/// One application buffer submission. Identity and predictions are fixed at
/// construction; the producer fills in actuals through the mutators until the
/// frame is handed to the engine, and classification writes the rest when the
/// owning display frame reconciles.
pub struct SurfaceFrame {
    token: i64,
    owner_pid: i32,
    owner_uid: u32,
    layer_name: String,
    debug_name: String,
    prediction_state: PredictionState,
    predictions: TimelineItem,
    thresholds: JankClassificationThresholds,
    stats: Weak<dyn JankStats>,
    state: Mutex<SurfaceFrameState>,
}

impl SurfaceFrame {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        token: i64,
        owner_pid: i32,
        owner_uid: u32,
        layer_name: String,
        debug_name: String,
        prediction_state: PredictionState,
        predictions: TimelineItem,
        thresholds: JankClassificationThresholds,
        stats: Weak<dyn JankStats>,
    ) -> Self {
        Self {
            token,
            owner_pid,
            owner_uid,
            layer_name,
            debug_name,
            prediction_state,
            predictions,
            thresholds,
            stats,
            state: Mutex::new(SurfaceFrameState {
                actuals: TimelineItem::default(),
                actual_queue_time: 0,
                acquire_fence_time: 0,
                present_state: PresentState::Unknown,
                last_latch_time: 0,
                jank_type: JankType::empty(),
                present_metadata: FramePresentMetadata::default(),
                ready_metadata: FrameReadyMetadata::default(),
            }),
        }
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    pub fn owner_pid(&self) -> i32 {
        self.owner_pid
    }

    pub fn owner_uid(&self) -> u32 {
        self.owner_uid
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn prediction_state(&self) -> PredictionState {
        self.prediction_state
    }

    pub fn predictions(&self) -> TimelineItem {
        self.predictions
    }

    pub fn actuals(&self) -> TimelineItem {
        self.state.lock().actuals
    }

    pub fn actual_queue_time(&self) -> i64 {
        self.state.lock().actual_queue_time
    }

    pub fn present_state(&self) -> PresentState {
        self.state.lock().present_state
    }

    pub fn present_metadata(&self) -> FramePresentMetadata {
        self.state.lock().present_metadata
    }

    pub fn ready_metadata(&self) -> FrameReadyMetadata {
        self.state.lock().ready_metadata
    }

    /// Jank classification result. `None` until the owning display frame has
    /// attached a present time.
    pub fn jank_type(&self) -> Option<JankType> {
        let state = self.state.lock();
        (state.actuals.present != 0).then_some(state.jank_type)
    }

    pub fn set_actual_start_time(&self, start_time_ns: i64) {
        self.state.lock().actuals.start = start_time_ns;
    }

    pub fn set_actual_queue_time(&self, queue_time_ns: i64) {
        let mut state = self.state.lock();
        state.actual_queue_time = queue_time_ns;
        state.actuals.end = state.acquire_fence_time.max(state.actual_queue_time);
    }

    pub fn set_acquire_fence_time(&self, acquire_fence_time_ns: i64) {
        let mut state = self.state.lock();
        state.acquire_fence_time = acquire_fence_time_ns;
        state.actuals.end = state.acquire_fence_time.max(state.actual_queue_time);
    }

    /// Records the compositor's verdict for this buffer. Set once; dropped
    /// frames skip classification entirely.
    pub fn set_present_state(&self, present_state: PresentState, last_latch_time_ns: i64) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.present_state, PresentState::Unknown);
        state.present_state = present_state;
        state.last_latch_time = last_latch_time_ns;
    }

    pub(crate) fn last_latch_time(&self) -> i64 {
        self.state.lock().last_latch_time
    }

    /// Classification entrypoint, driven by the owning display frame once its
    /// present fence resolved. `display_frame_jank` is the parent's verdict
    /// and wins whenever this frame was presented late through no fault that
    /// can be pinned on the application alone.
    pub(crate) fn on_present(
        &self,
        present_time_ns: i64,
        display_frame_jank: JankType,
        vsync_period_ns: i64,
    ) {
        let mut state = self.state.lock();
        if state.present_state != PresentState::Presented {
            // Dropped or never-latched buffers keep their zero actuals.
            return;
        }

        state.actuals.present = present_time_ns;

        match self.prediction_state {
            PredictionState::None => return,
            PredictionState::Expired => {
                // The prediction outlived the retention window, so there is
                // nothing to compare against.
                state.jank_type = JankType::UNKNOWN;
                state.present_metadata = FramePresentMetadata::UnknownPresent;
                state.ready_metadata = FrameReadyMetadata::UnknownFinish;
                drop(state);
                self.report_layer_jank(JankType::UNKNOWN);
                return;
            }
            PredictionState::Valid => {}
        }

        let present_delta = state.actuals.present - self.predictions.present;
        let deadline_delta = state.actuals.end - self.predictions.end;

        state.ready_metadata = if deadline_delta > self.thresholds.deadline_threshold_ns {
            FrameReadyMetadata::LateFinish
        } else {
            FrameReadyMetadata::OnTimeFinish
        };

        state.present_metadata = if present_delta.abs() <= self.thresholds.present_threshold_ns {
            FramePresentMetadata::OnTimePresent
        } else if present_delta > 0 {
            FramePresentMetadata::LatePresent
        } else {
            FramePresentMetadata::EarlyPresent
        };

        let vsync_aligned = near_vsync_boundary(
            present_delta,
            vsync_period_ns,
            self.thresholds.present_threshold_ns,
        );

        state.jank_type = match (state.present_metadata, state.ready_metadata) {
            (FramePresentMetadata::OnTimePresent, _) => JankType::empty(),
            (FramePresentMetadata::EarlyPresent, FrameReadyMetadata::OnTimeFinish) => {
                // Finished on time but showed a vsync early: either the
                // compositor latched it onto the wrong cycle, or the
                // prediction itself was off.
                if vsync_aligned {
                    JankType::SF_SCHEDULING
                } else {
                    JankType::PREDICTION_ERROR
                }
            }
            (FramePresentMetadata::EarlyPresent, _) => JankType::UNKNOWN,
            (FramePresentMetadata::LatePresent, FrameReadyMetadata::OnTimeFinish) => {
                if !display_frame_jank.is_empty() {
                    display_frame_jank
                } else if vsync_aligned {
                    JankType::SF_SCHEDULING
                } else {
                    JankType::PREDICTION_ERROR
                }
            }
            (FramePresentMetadata::LatePresent, _) => {
                if display_frame_jank.is_empty() {
                    JankType::APP_DEADLINE_MISSED
                } else {
                    display_frame_jank
                }
            }
            (FramePresentMetadata::UnknownPresent, _) => JankType::UNKNOWN,
        };

        if state.last_latch_time != 0 && self.predictions.end <= state.last_latch_time {
            // The buffer was already done when the previous frame latched.
            state.jank_type |= JankType::BUFFER_STUFFING;
        }

        let mask = state.jank_type;
        drop(state);
        self.report_layer_jank(mask);
    }

    pub(crate) fn trace(&self, display_frame_token: i64, sink: &dyn TraceSink) {
        if self.token == INVALID_TOKEN {
            debug!(layer = %self.layer_name, "skipping surface frame packet with invalid token");
            return;
        }
        if display_frame_token == INVALID_TOKEN {
            debug!(
                layer = %self.layer_name,
                "skipping surface frame packet with invalid display frame token"
            );
            return;
        }

        let state = self.state.lock();
        let present_type = match state.present_state {
            PresentState::Dropped => wire::PresentType::PresentDropped,
            PresentState::Unknown => wire::PresentType::PresentUnspecified,
            PresentState::Presented => state.present_metadata.to_wire(),
        };

        let event = wire::SurfaceFrameEvent {
            token: Some(self.token),
            display_frame_token: Some(display_frame_token),
            present_type: Some(present_type as i32),
            on_time_finish: Some(state.ready_metadata == FrameReadyMetadata::OnTimeFinish),
            gpu_composition: Some(false),
            jank_type: Some(state.jank_type.to_wire() as i32),
            expected_start_ns: Some(self.predictions.start),
            expected_end_ns: Some(self.predictions.end),
            actual_start_ns: Some(state.actuals.start),
            actual_end_ns: Some(state.actuals.end),
            layer_name: Some(self.debug_name.clone()),
            pid: Some(self.owner_pid),
        };
        drop(state);

        sink.emit(wire::TracePacket {
            timestamp: Some(monotonic_now_ns() as u64),
            timestamp_clock_id: Some(wire::CLOCK_MONOTONIC),
            sequence_id: None,
            event: Some(wire::trace_packet::Event::SurfaceFrame(event)),
        });
    }

    /// Smallest known timestamp, used to anchor relative times in the dump.
    pub(crate) fn base_time(&self) -> i64 {
        let state = self.state.lock();
        min_frame_time(self.prediction_state, self.predictions, state.actuals)
    }

    fn report_layer_jank(&self, mask: JankType) {
        if let Some(stats) = self.stats.upgrade() {
            stats.increment_layer_janky_frames(self.owner_uid, &self.layer_name, mask);
        }
    }
}

/// A present delta is "a factor of vsync" when its remainder modulo the vsync
/// period sits within the present threshold of either boundary.
pub(crate) fn near_vsync_boundary(
    present_delta_ns: i64,
    vsync_period_ns: i64,
    present_threshold_ns: i64,
) -> bool {
    if vsync_period_ns <= 0 {
        return false;
    }
    let delta_to_vsync = present_delta_ns.abs() % vsync_period_ns;
    delta_to_vsync < present_threshold_ns
        || delta_to_vsync >= vsync_period_ns - present_threshold_ns
}

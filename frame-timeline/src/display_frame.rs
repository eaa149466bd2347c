use std::sync::{Arc, Weak};

use timeline_format as wire;
use tracing::debug;

use crate::jank::{
    FramePresentMetadata, FrameReadyMetadata, FrameStartMetadata, JankClassificationThresholds,
    JankType,
};
use crate::sink::TraceSink;
use crate::stats::JankStats;
use crate::surface_frame::{near_vsync_boundary, SurfaceFrame};
use crate::{min_frame_time, monotonic_now_ns, PredictionState, TimelineItem, INVALID_TOKEN};

// Typical submission count per cycle; sized so the vector rarely regrows on
// the hot path.
const SURFACE_FRAMES_INITIAL_CAPACITY: usize = 10;

/// One compositor vsync cycle: the compositor's own predicted and observed
/// timeline plus every surface frame composited during the cycle. Owned by
/// the engine; reconciliation drives classification and packet emission.
pub struct DisplayFrame {
    token: i64,
    vsync_period: i64,
    prediction_state: PredictionState,
    predictions: TimelineItem,
    actuals: TimelineItem,
    surface_frames: Vec<Arc<SurfaceFrame>>,
    jank_type: JankType,
    present_metadata: FramePresentMetadata,
    ready_metadata: FrameReadyMetadata,
    start_metadata: FrameStartMetadata,
    gpu_composition: bool,
    thresholds: JankClassificationThresholds,
    stats: Weak<dyn JankStats>,
}

impl DisplayFrame {
    pub(crate) fn new(thresholds: JankClassificationThresholds, stats: Weak<dyn JankStats>) -> Self {
        Self {
            token: INVALID_TOKEN,
            vsync_period: 0,
            prediction_state: PredictionState::None,
            predictions: TimelineItem::default(),
            actuals: TimelineItem::default(),
            surface_frames: Vec::with_capacity(SURFACE_FRAMES_INITIAL_CAPACITY),
            jank_type: JankType::empty(),
            present_metadata: FramePresentMetadata::default(),
            ready_metadata: FrameReadyMetadata::default(),
            start_metadata: FrameStartMetadata::default(),
            gpu_composition: false,
            thresholds,
            stats,
        }
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    pub fn vsync_period(&self) -> i64 {
        self.vsync_period
    }

    pub fn prediction_state(&self) -> PredictionState {
        self.prediction_state
    }

    pub fn predictions(&self) -> TimelineItem {
        self.predictions
    }

    pub fn actuals(&self) -> TimelineItem {
        self.actuals
    }

    pub fn jank_type(&self) -> JankType {
        self.jank_type
    }

    pub fn present_metadata(&self) -> FramePresentMetadata {
        self.present_metadata
    }

    pub fn ready_metadata(&self) -> FrameReadyMetadata {
        self.ready_metadata
    }

    pub fn start_metadata(&self) -> FrameStartMetadata {
        self.start_metadata
    }

    pub fn surface_frames(&self) -> &[Arc<SurfaceFrame>] {
        &self.surface_frames
    }

    /// First call of a cycle: resolves the compositor's own prediction and
    /// records the wake-up time. A token whose prediction is gone marks the
    /// cycle `Expired`.
    pub(crate) fn on_sf_wake_up(
        &mut self,
        token: i64,
        vsync_period: i64,
        predictions: Option<TimelineItem>,
        wake_time: i64,
    ) {
        self.token = token;
        self.vsync_period = vsync_period;
        match predictions {
            Some(predictions) => {
                self.prediction_state = PredictionState::Valid;
                self.predictions = predictions;
            }
            None => self.prediction_state = PredictionState::Expired,
        }
        self.actuals.start = wake_time;
    }

    pub(crate) fn add_surface_frame(&mut self, surface_frame: Arc<SurfaceFrame>) {
        self.surface_frames.push(surface_frame);
    }

    pub(crate) fn set_actual_end_time(&mut self, end_time: i64) {
        self.actuals.end = end_time;
    }

    /// Attaches the hardware present time, classifies this cycle, then
    /// classifies every contained surface frame with this cycle's verdict as
    /// parent context. Runs exactly once per frame.
    pub(crate) fn on_present(&mut self, signal_time: i64) {
        self.actuals.present = signal_time;

        let present_delta = self.actuals.present - self.predictions.present;
        let deadline_delta = self.actuals.end - self.predictions.end;

        self.present_metadata = if present_delta.abs() <= self.thresholds.present_threshold_ns {
            FramePresentMetadata::OnTimePresent
        } else if present_delta > 0 {
            FramePresentMetadata::LatePresent
        } else {
            FramePresentMetadata::EarlyPresent
        };

        self.ready_metadata = if deadline_delta > self.thresholds.deadline_threshold_ns {
            FrameReadyMetadata::LateFinish
        } else {
            FrameReadyMetadata::OnTimeFinish
        };

        self.start_metadata = if self.actuals.start == 0 || self.predictions.start == 0 {
            FrameStartMetadata::UnknownStart
        } else {
            let start_delta = self.actuals.start - self.predictions.start;
            if start_delta.abs() > self.thresholds.start_threshold_ns {
                if start_delta > 0 {
                    FrameStartMetadata::LateStart
                } else {
                    FrameStartMetadata::EarlyStart
                }
            } else {
                FrameStartMetadata::OnTimeStart
            }
        };

        let vsync_aligned = near_vsync_boundary(
            present_delta,
            self.vsync_period,
            self.thresholds.present_threshold_ns,
        );

        self.jank_type = match (self.present_metadata, self.ready_metadata) {
            (FramePresentMetadata::OnTimePresent, _) => JankType::empty(),
            (FramePresentMetadata::EarlyPresent, FrameReadyMetadata::OnTimeFinish) => {
                if vsync_aligned {
                    JankType::SF_SCHEDULING
                } else {
                    JankType::PREDICTION_ERROR
                }
            }
            (FramePresentMetadata::EarlyPresent, FrameReadyMetadata::LateFinish) => {
                // The cycle overran its deadline yet still landed early: the
                // compositor targeted the wrong vsync.
                JankType::SF_SCHEDULING
            }
            (FramePresentMetadata::EarlyPresent, FrameReadyMetadata::UnknownFinish) => {
                JankType::UNKNOWN
            }
            (FramePresentMetadata::LatePresent, FrameReadyMetadata::OnTimeFinish) => {
                if vsync_aligned {
                    JankType::DISPLAY_HAL
                } else {
                    JankType::PREDICTION_ERROR
                }
            }
            (FramePresentMetadata::LatePresent, FrameReadyMetadata::LateFinish) => {
                JankType::SF_CPU_DEADLINE_MISSED
            }
            (FramePresentMetadata::LatePresent, FrameReadyMetadata::UnknownFinish) => {
                JankType::UNKNOWN
            }
            (FramePresentMetadata::UnknownPresent, _) => JankType::UNKNOWN,
        };

        let mut total_jank = self.jank_type;
        for surface_frame in &self.surface_frames {
            surface_frame.on_present(signal_time, self.jank_type, self.vsync_period);
            if let Some(surface_jank) = surface_frame.jank_type() {
                total_jank |= surface_jank;
            }
        }

        if let Some(stats) = self.stats.upgrade() {
            stats.increment_janky_frames(total_jank);
        }
    }

    /// Emits this frame's packet followed by one packet per contained surface
    /// frame. Frames without a token never produced predictions and are not
    /// representable on the wire.
    pub(crate) fn trace(&self, sink: &dyn TraceSink, sf_pid: i32) {
        if self.token == INVALID_TOKEN {
            debug!("skipping display frame packet with invalid token");
            return;
        }

        let event = wire::DisplayFrameEvent {
            token: Some(self.token),
            present_type: Some(self.present_metadata.to_wire() as i32),
            on_time_finish: Some(self.ready_metadata == FrameReadyMetadata::OnTimeFinish),
            gpu_composition: Some(self.gpu_composition),
            jank_type: Some(self.jank_type.to_wire() as i32),
            expected_start_ns: Some(self.predictions.start),
            expected_end_ns: Some(self.predictions.end),
            actual_start_ns: Some(self.actuals.start),
            actual_end_ns: Some(self.actuals.end),
            pid: Some(sf_pid),
        };

        sink.emit(wire::TracePacket {
            timestamp: Some(monotonic_now_ns() as u64),
            timestamp_clock_id: Some(wire::CLOCK_MONOTONIC),
            sequence_id: None,
            event: Some(wire::trace_packet::Event::DisplayFrame(event)),
        });

        for surface_frame in &self.surface_frames {
            surface_frame.trace(self.token, sink);
        }
    }

    /// Smallest known timestamp across this frame and its surface frames.
    pub(crate) fn base_time(&self) -> i64 {
        let mut base_time = min_frame_time(self.prediction_state, self.predictions, self.actuals);
        for surface_frame in &self.surface_frames {
            let surface_base = surface_frame.base_time();
            if surface_base != 0 {
                base_time = base_time.min(surface_base);
            }
        }
        base_time
    }

    /// A display frame is worth dumping under `-jank` when it or any of its
    /// surface frames was classified as janky.
    pub(crate) fn is_janky(&self) -> bool {
        if !self.jank_type.is_empty() {
            return true;
        }
        self.surface_frames
            .iter()
            .any(|frame| frame.jank_type().is_some_and(|jank| !jank.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NoopJankStats;
    use std::sync::Arc;

    fn display_frame() -> (DisplayFrame, Arc<dyn JankStats>) {
        let stats: Arc<dyn JankStats> = Arc::new(NoopJankStats);
        let frame = DisplayFrame::new(
            JankClassificationThresholds::default(),
            Arc::downgrade(&stats),
        );
        (frame, stats)
    }

    #[test]
    fn wake_up_with_predictions_is_valid() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(5, 11_000_000, Some(TimelineItem::new(22, 26, 30)), 22);

        assert_eq!(frame.prediction_state(), PredictionState::Valid);
        assert_eq!(frame.predictions(), TimelineItem::new(22, 26, 30));
        assert_eq!(frame.actuals().start, 22);
    }

    #[test]
    fn wake_up_without_predictions_is_expired() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(5, 11_000_000, None, 22);

        assert_eq!(frame.prediction_state(), PredictionState::Expired);
        assert_eq!(frame.predictions(), TimelineItem::default());
    }

    #[test]
    fn late_present_late_finish_is_compositor_cpu_miss() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(
            5,
            11_000_000,
            Some(TimelineItem::new(52_000_000, 56_000_000, 60_000_000)),
            52_000_000,
        );
        frame.set_actual_end_time(59_000_000);
        frame.on_present(90_000_000);

        assert_eq!(frame.jank_type(), JankType::SF_CPU_DEADLINE_MISSED);
        assert_eq!(frame.present_metadata(), FramePresentMetadata::LatePresent);
        assert_eq!(frame.ready_metadata(), FrameReadyMetadata::LateFinish);
    }

    #[test]
    fn late_present_on_time_finish_aligned_blames_display() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(
            5,
            11_000_000,
            Some(TimelineItem::new(22_000_000, 26_000_000, 30_000_000)),
            22_000_000,
        );
        frame.set_actual_end_time(26_000_000);
        // Exactly one vsync late.
        frame.on_present(41_000_000);

        assert_eq!(frame.jank_type(), JankType::DISPLAY_HAL);
    }

    #[test]
    fn on_time_present_classifies_clean() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(
            5,
            11_000_000,
            Some(TimelineItem::new(22_000_000, 26_000_000, 30_000_000)),
            22_500_000,
        );
        frame.set_actual_end_time(26_000_000);
        frame.on_present(31_000_000);

        assert_eq!(frame.jank_type(), JankType::empty());
        assert_eq!(frame.start_metadata(), FrameStartMetadata::OnTimeStart);
        assert!(!frame.is_janky());
    }

    #[test]
    fn start_metadata_is_unknown_without_a_start_time() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(
            5,
            11_000_000,
            Some(TimelineItem::new(22_000_000, 26_000_000, 30_000_000)),
            0,
        );
        frame.set_actual_end_time(26_000_000);
        frame.on_present(31_000_000);

        assert_eq!(frame.start_metadata(), FrameStartMetadata::UnknownStart);
    }

    #[test]
    fn late_start_is_flagged() {
        let (mut frame, _stats) = display_frame();
        frame.on_sf_wake_up(
            5,
            11_000_000,
            Some(TimelineItem::new(22_000_000, 26_000_000, 30_000_000)),
            25_000_000,
        );
        frame.set_actual_end_time(26_000_000);
        frame.on_present(31_000_000);

        assert_eq!(frame.start_metadata(), FrameStartMetadata::LateStart);
    }
}

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::display_frame::DisplayFrame;
use crate::fence::{PresentFence, SIGNAL_TIME_INVALID, SIGNAL_TIME_PENDING};
use crate::jank::JankClassificationThresholds;
use crate::sink::TraceSink;
use crate::stats::JankStats;
use crate::surface_frame::SurfaceFrame;
use crate::token::TokenManager;
use crate::{PredictionState, TimelineItem, INVALID_TOKEN};

pub const DEFAULT_MAX_DISPLAY_FRAMES: usize = 64;

type DisplayFrameHandle = Arc<Mutex<DisplayFrame>>;

struct TimelineState {
    current: DisplayFrameHandle,
    // Sliding window of reconciled (or still-awaiting-fence) cycles, oldest
    // first.
    frames: VecDeque<DisplayFrameHandle>,
    // Cycles whose present fence has not been observed yet, in finalize
    // order. Reconciliation never moves past the first pending entry.
    pending_fences: VecDeque<(Arc<dyn PresentFence>, DisplayFrameHandle)>,
    max_display_frames: usize,
}

/// The frame timeline engine. Producers mint tokens and submit surface
/// frames; the compositor closes each cycle with its wake-up and present
/// calls, and reconciliation runs when present fences resolve.
///
/// Every producer-facing operation is bounded by the number of in-flight
/// fences plus the current cycle's surface frames; nothing here blocks on
/// hardware.
pub struct FrameTimeline {
    token_manager: TokenManager,
    state: Mutex<TimelineState>,
    stats: Arc<dyn JankStats>,
    sink: Arc<dyn TraceSink>,
    thresholds: JankClassificationThresholds,
    sf_pid: i32,
}

impl FrameTimeline {
    pub fn new(stats: Arc<dyn JankStats>, sink: Arc<dyn TraceSink>, sf_pid: i32) -> Self {
        Self::with_thresholds(stats, sink, sf_pid, JankClassificationThresholds::default())
    }

    pub fn with_thresholds(
        stats: Arc<dyn JankStats>,
        sink: Arc<dyn TraceSink>,
        sf_pid: i32,
        thresholds: JankClassificationThresholds,
    ) -> Self {
        let current = Arc::new(Mutex::new(DisplayFrame::new(
            thresholds,
            Arc::downgrade(&stats),
        )));
        Self {
            token_manager: TokenManager::new(),
            state: Mutex::new(TimelineState {
                current,
                frames: VecDeque::new(),
                pending_fences: VecDeque::new(),
                max_display_frames: DEFAULT_MAX_DISPLAY_FRAMES,
            }),
            stats,
            sink,
            thresholds,
            sf_pid,
        }
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    pub fn generate_token(&self, predictions: TimelineItem) -> i64 {
        self.token_manager.generate_token(predictions)
    }

    /// Builds a surface frame for a producer submission, resolving the token
    /// to its prediction if one is still retained.
    pub fn create_surface_frame_for_token(
        &self,
        token: Option<i64>,
        owner_pid: i32,
        owner_uid: u32,
        layer_name: impl Into<String>,
        debug_name: impl Into<String>,
    ) -> Arc<SurfaceFrame> {
        let (token, prediction_state, predictions) = match token {
            None => (INVALID_TOKEN, PredictionState::None, TimelineItem::default()),
            Some(token) => match self.token_manager.predictions_for_token(token) {
                Some(predictions) => (token, PredictionState::Valid, predictions),
                None => (token, PredictionState::Expired, TimelineItem::default()),
            },
        };
        Arc::new(SurfaceFrame::new(
            token,
            owner_pid,
            owner_uid,
            layer_name.into(),
            debug_name.into(),
            prediction_state,
            predictions,
            self.thresholds,
            Arc::downgrade(&self.stats),
        ))
    }

    /// Attaches a submitted frame to the cycle being built. The producer must
    /// not mutate the frame after this call.
    pub fn add_surface_frame(&self, surface_frame: Arc<SurfaceFrame>) {
        let state = self.state.lock();
        state.current.lock().add_surface_frame(surface_frame);
    }

    /// First compositor call of a cycle: resolves the compositor's own
    /// prediction token and records the wake-up time and vsync period.
    pub fn set_sf_wake_up(&self, token: i64, wake_time: i64, vsync_period: i64) {
        let predictions = self.token_manager.predictions_for_token(token);
        let state = self.state.lock();
        state
            .current
            .lock()
            .on_sf_wake_up(token, vsync_period, predictions, wake_time);
    }

    /// Closes the current cycle: records when compositor work finished,
    /// queues the present fence for reconciliation, reconciles whatever has
    /// already signaled, and starts a fresh cycle.
    pub fn set_sf_present(&self, present_time: i64, present_fence: Arc<dyn PresentFence>) {
        let mut state = self.state.lock();
        state.current.lock().set_actual_end_time(present_time);
        let current = state.current.clone();
        state.pending_fences.push_back((present_fence, current));
        self.flush_pending_present_fences(&mut state);
        self.finalize_current_display_frame(&mut state);
    }

    /// Drains the pending-fence queue from the head. Stops at the first fence
    /// that is still pending so that frames are always classified and traced
    /// in finalize order; invalid fences drop their frame unclassified.
    fn flush_pending_present_fences(&self, state: &mut TimelineState) {
        while let Some((fence, _)) = state.pending_fences.front() {
            let signal_time = if fence.is_valid() {
                fence.signal_time()
            } else {
                SIGNAL_TIME_INVALID
            };
            if signal_time == SIGNAL_TIME_PENDING {
                break;
            }

            if let Some((_, frame)) = state.pending_fences.pop_front() {
                if signal_time == SIGNAL_TIME_INVALID {
                    debug!("dropping display frame whose present fence is invalid");
                    continue;
                }
                let mut frame = frame.lock();
                frame.on_present(signal_time);
                frame.trace(self.sink.as_ref(), self.sf_pid);
            }
        }
    }

    fn finalize_current_display_frame(&self, state: &mut TimelineState) {
        while state.frames.len() >= state.max_display_frames && !state.frames.is_empty() {
            state.frames.pop_front();
        }
        let fresh = Arc::new(Mutex::new(DisplayFrame::new(
            self.thresholds,
            Arc::downgrade(&self.stats),
        )));
        let finalized = std::mem::replace(&mut state.current, fresh);
        state.frames.push_back(finalized);
    }

    /// Resizes the retention window. Destructive in either direction: every
    /// retained frame and every in-flight fence is discarded so the deque and
    /// the pending queue stay consistent.
    pub fn set_max_display_frames(&self, size: usize) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.pending_fences.clear();
        state.max_display_frames = size;
    }

    pub fn reset(&self) {
        self.set_max_display_frames(DEFAULT_MAX_DISPLAY_FRAMES);
    }

    pub(crate) fn for_each_display_frame(&self, mut visit: impl FnMut(&DisplayFrame)) {
        let state = self.state.lock();
        for frame in &state.frames {
            visit(&frame.lock());
        }
    }

    pub(crate) fn retained_display_frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    #[cfg(test)]
    fn display_frame_actuals(&self, index: usize) -> TimelineItem {
        self.state.lock().frames[index].lock().actuals()
    }

    #[cfg(test)]
    fn surface_frame(&self, frame_index: usize, surface_index: usize) -> Arc<SurfaceFrame> {
        self.state.lock().frames[frame_index].lock().surface_frames()[surface_index].clone()
    }

    #[cfg(test)]
    fn pending_fence_count(&self) -> usize {
        self.state.lock().pending_fences.len()
    }
}

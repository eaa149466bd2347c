use crate::jank::JankType;

/// Aggregate counters for janky frames. The engine treats the sink as
/// best-effort: a dropped sink silently stops the counters.
pub trait JankStats: Send + Sync {
    /// Called once per reconciled display frame with the union of every
    /// fault observed in that cycle.
    fn increment_janky_frames(&self, mask: JankType);

    /// Called once per classified surface frame, attributing the fault to
    /// the owning layer.
    fn increment_layer_janky_frames(&self, owner_uid: u32, layer_name: &str, mask: JankType);
}

pub struct NoopJankStats;

impl JankStats for NoopJankStats {
    fn increment_janky_frames(&self, _mask: JankType) {}

    fn increment_layer_janky_frames(&self, _owner_uid: u32, _layer_name: &str, _mask: JankType) {}
}

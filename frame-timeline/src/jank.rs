use std::fmt;

use bitflags::bitflags;
use timeline_format as wire;

bitflags! {
    /// Fault categories for a frame that missed its deadline. A frame can
    /// carry several at once; `empty()` means the frame was not janky.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct JankType: u32 {
        /// The display hardware presented on a later vsync than predicted.
        const DISPLAY_HAL = 1 << 0;
        /// The compositor CPU work finished past its deadline.
        const SF_CPU_DEADLINE_MISSED = 1 << 1;
        /// The compositor GPU work finished past its deadline.
        const SF_GPU_DEADLINE_MISSED = 1 << 2;
        /// The application finished its frame past the deadline.
        const APP_DEADLINE_MISSED = 1 << 3;
        /// Present landed off-vsync by an amount that is not a vsync multiple.
        const PREDICTION_ERROR = 1 << 4;
        /// The compositor scheduled the frame onto an unexpected vsync.
        const SF_SCHEDULING = 1 << 5;
        /// The buffer was ready before the previous one was even latched.
        const BUFFER_STUFFING = 1 << 6;
        /// Not enough information to attribute the fault.
        const UNKNOWN = 1 << 7;
    }
}

impl JankType {
    /// Collapses a bitmask into the single wire enum value, most significant
    /// cause first.
    pub fn to_wire(self) -> wire::JankType {
        if self.is_empty() {
            wire::JankType::JankNone
        } else if self.contains(JankType::DISPLAY_HAL) {
            wire::JankType::JankDisplayHal
        } else if self.intersects(JankType::SF_CPU_DEADLINE_MISSED | JankType::SF_GPU_DEADLINE_MISSED)
        {
            wire::JankType::JankSfDeadlineMissed
        } else if self.intersects(JankType::APP_DEADLINE_MISSED | JankType::PREDICTION_ERROR) {
            wire::JankType::JankAppDeadlineMissed
        } else if self.contains(JankType::SF_SCHEDULING) {
            wire::JankType::JankSfScheduling
        } else if self.contains(JankType::BUFFER_STUFFING) {
            wire::JankType::JankBufferStuffing
        } else {
            wire::JankType::JankUnknown
        }
    }
}

impl fmt::Display for JankType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let names = [
            (JankType::DISPLAY_HAL, "Display HAL"),
            (
                JankType::SF_CPU_DEADLINE_MISSED,
                "Compositor CPU Deadline Missed",
            ),
            (
                JankType::SF_GPU_DEADLINE_MISSED,
                "Compositor GPU Deadline Missed",
            ),
            (JankType::APP_DEADLINE_MISSED, "App Deadline Missed"),
            (JankType::PREDICTION_ERROR, "Prediction Error"),
            (JankType::SF_SCHEDULING, "Compositor Scheduling"),
            (JankType::BUFFER_STUFFING, "Buffer Stuffing"),
            (JankType::UNKNOWN, "Unknown jank"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePresentMetadata {
    OnTimePresent,
    LatePresent,
    EarlyPresent,
    #[default]
    UnknownPresent,
}

impl FramePresentMetadata {
    pub fn to_wire(self) -> wire::PresentType {
        match self {
            FramePresentMetadata::OnTimePresent => wire::PresentType::PresentOnTime,
            FramePresentMetadata::LatePresent => wire::PresentType::PresentLate,
            FramePresentMetadata::EarlyPresent => wire::PresentType::PresentEarly,
            FramePresentMetadata::UnknownPresent => wire::PresentType::PresentUnspecified,
        }
    }
}

impl fmt::Display for FramePresentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePresentMetadata::OnTimePresent => "On Time Present",
            FramePresentMetadata::LatePresent => "Late Present",
            FramePresentMetadata::EarlyPresent => "Early Present",
            FramePresentMetadata::UnknownPresent => "Unknown Present",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameReadyMetadata {
    OnTimeFinish,
    LateFinish,
    #[default]
    UnknownFinish,
}

impl fmt::Display for FrameReadyMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameReadyMetadata::OnTimeFinish => "On Time Finish",
            FrameReadyMetadata::LateFinish => "Late Finish",
            FrameReadyMetadata::UnknownFinish => "Unknown Finish",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameStartMetadata {
    OnTimeStart,
    LateStart,
    EarlyStart,
    #[default]
    UnknownStart,
}

impl fmt::Display for FrameStartMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStartMetadata::OnTimeStart => "On Time Start",
            FrameStartMetadata::LateStart => "Late Start",
            FrameStartMetadata::EarlyStart => "Early Start",
            FrameStartMetadata::UnknownStart => "Unknown Start",
        };
        write!(f, "{name}")
    }
}

/// Slack allowed between a prediction and the observed timestamp before the
/// difference counts as jank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JankClassificationThresholds {
    pub present_threshold_ns: i64,
    pub deadline_threshold_ns: i64,
    pub start_threshold_ns: i64,
}

impl Default for JankClassificationThresholds {
    fn default() -> Self {
        Self {
            present_threshold_ns: 2_000_000,
            deadline_threshold_ns: 0,
            start_threshold_ns: 2_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_mapping_prefers_display_hal() {
        let mask = JankType::DISPLAY_HAL | JankType::APP_DEADLINE_MISSED;
        assert_eq!(mask.to_wire(), wire::JankType::JankDisplayHal);
    }

    #[test]
    fn wire_mapping_groups_deadline_families() {
        assert_eq!(
            JankType::SF_GPU_DEADLINE_MISSED.to_wire(),
            wire::JankType::JankSfDeadlineMissed
        );
        assert_eq!(
            JankType::PREDICTION_ERROR.to_wire(),
            wire::JankType::JankAppDeadlineMissed
        );
        assert_eq!(JankType::empty().to_wire(), wire::JankType::JankNone);
    }

    #[test]
    fn display_renders_comma_separated_bits() {
        let mask = JankType::APP_DEADLINE_MISSED | JankType::BUFFER_STUFFING;
        assert_eq!(mask.to_string(), "App Deadline Missed, Buffer Stuffing");
        assert_eq!(JankType::empty().to_string(), "None");
    }
}

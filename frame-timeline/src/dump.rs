//! Textual dump of the retained display frames, for the compositor's debug
//! dump surface. All timestamps render in milliseconds relative to the
//! earliest known time of the oldest retained frame.

use std::fmt::Write;

use crate::display_frame::DisplayFrame;
use crate::surface_frame::SurfaceFrame;
use crate::timeline::FrameTimeline;
use crate::{PredictionState, TimelineItem};

fn to_ms(delta_ns: i64) -> f64 {
    delta_ns as f64 / 1_000_000.0
}

fn prediction_state_name(state: PredictionState) -> &'static str {
    match state {
        PredictionState::Valid => "Valid",
        PredictionState::Expired => "Expired",
        PredictionState::None => "None",
    }
}

fn dump_table(
    out: &mut String,
    predictions: TimelineItem,
    actuals: TimelineItem,
    indent: &str,
    prediction_state: PredictionState,
    base_time: i64,
) {
    let _ = writeln!(
        out,
        "{indent}\t\t    Start time\t\t|    End time\t\t|    Present time"
    );
    if prediction_state == PredictionState::Valid {
        let _ = writeln!(
            out,
            "{indent}Expected\t|\t{:10.2}\t|\t{:10.2}\t|\t{:10.2}",
            to_ms(predictions.start - base_time),
            to_ms(predictions.end - base_time),
            to_ms(predictions.present - base_time),
        );
    }
    let _ = write!(out, "{indent}Actual  \t|");
    if actuals.start == 0 {
        let _ = write!(out, "\t\tN/A\t|");
    } else {
        let _ = write!(out, "\t{:10.2}\t|", to_ms((actuals.start - base_time).max(0)));
    }
    if actuals.end <= 0 {
        let _ = write!(out, "\t\tN/A\t|");
    } else {
        let _ = write!(out, "\t{:10.2}\t|", to_ms(actuals.end - base_time));
    }
    if actuals.present == 0 {
        let _ = writeln!(out, "\t\tN/A");
    } else {
        let _ = writeln!(out, "\t{:10.2}", to_ms((actuals.present - base_time).max(0)));
    }
    let _ = writeln!(out, "{indent}{}", "-".repeat(88));
}

fn dump_surface_frame(out: &mut String, frame: &SurfaceFrame, indent: &str, base_time: i64) {
    let jank = frame.jank_type().unwrap_or_default();
    let _ = write!(out, "{indent}Layer - {}", frame.debug_name());
    if !jank.is_empty() {
        let _ = write!(out, " [*] ");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{indent}Token: {}", frame.token());
    let _ = writeln!(out, "{indent}Owner Pid : {}", frame.owner_pid());
    let _ = writeln!(
        out,
        "{indent}Present State : {:?}",
        frame.present_state()
    );
    let _ = writeln!(
        out,
        "{indent}Prediction State : {}",
        prediction_state_name(frame.prediction_state())
    );
    let _ = writeln!(out, "{indent}Jank Type : {jank}");
    let _ = writeln!(
        out,
        "{indent}Present Metadata : {}",
        frame.present_metadata()
    );
    let _ = writeln!(out, "{indent}Finish Metadata: {}", frame.ready_metadata());
    let _ = writeln!(
        out,
        "{indent}Last latch time: {:10.2}",
        to_ms((frame.last_latch_time() - base_time).max(0))
    );
    if frame.prediction_state() == PredictionState::Valid {
        let present_delta = frame.actuals().present - frame.predictions().present;
        let _ = writeln!(
            out,
            "{indent}Present delta: {:10.2}",
            to_ms(present_delta.abs())
        );
    }
    dump_table(
        out,
        frame.predictions(),
        frame.actuals(),
        indent,
        frame.prediction_state(),
        base_time,
    );
}

fn dump_display_frame(out: &mut String, frame: &DisplayFrame, base_time: i64) {
    if !frame.jank_type().is_empty() {
        let _ = write!(out, " [*] ");
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Prediction State : {}",
        prediction_state_name(frame.prediction_state())
    );
    let _ = writeln!(out, "Jank Type : {}", frame.jank_type());
    let _ = writeln!(out, "Present Metadata : {}", frame.present_metadata());
    let _ = writeln!(out, "Finish Metadata: {}", frame.ready_metadata());
    let _ = writeln!(out, "Start Metadata: {}", frame.start_metadata());
    let _ = writeln!(out, "Vsync Period: {:10.2}", to_ms(frame.vsync_period()));
    let present_delta = frame.actuals().present - frame.predictions().present;
    let _ = writeln!(out, "Present delta: {:10.2}", to_ms(present_delta.abs()));
    let delta_to_vsync = if frame.vsync_period() > 0 {
        present_delta.abs() % frame.vsync_period()
    } else {
        0
    };
    let _ = writeln!(
        out,
        "Present delta % refreshrate: {:10.2}",
        to_ms(delta_to_vsync)
    );
    dump_table(
        out,
        frame.predictions(),
        frame.actuals(),
        "",
        frame.prediction_state(),
        base_time,
    );
    let _ = writeln!(out);
    for surface_frame in frame.surface_frames() {
        dump_surface_frame(out, surface_frame, "    ", base_time);
    }
    let _ = writeln!(out);
}

impl FrameTimeline {
    /// Dispatches the dump flags the compositor's debug surface understands:
    /// `-jank` for frames with a non-empty jank mask, `-all` for every
    /// retained frame. Unknown flags produce nothing.
    pub fn parse_args(&self, args: &[&str]) -> String {
        let mut out = String::new();
        if args.contains(&"-jank") {
            out.push_str(&self.dump_jank());
        }
        if args.contains(&"-all") {
            out.push_str(&self.dump_all());
        }
        out
    }

    pub fn dump_all(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Number of display frames : {}",
            self.retained_display_frame_count()
        );
        let mut base_time = None;
        let mut index = 0;
        self.for_each_display_frame(|frame| {
            let base = *base_time.get_or_insert_with(|| frame.base_time());
            let _ = write!(out, "Display Frame {index}");
            dump_display_frame(&mut out, frame, base);
            index += 1;
        });
        out
    }

    pub fn dump_jank(&self) -> String {
        let mut out = String::new();
        let mut base_time = None;
        let mut index = 0;
        self.for_each_display_frame(|frame| {
            let base = *base_time.get_or_insert_with(|| frame.base_time());
            if frame.is_janky() {
                let _ = write!(out, "Display Frame {index}");
                dump_display_frame(&mut out, frame, base);
            }
            index += 1;
        });
        out
    }
}

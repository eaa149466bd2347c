use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use frame_timeline::{
    monotonic_now_ns, FenceTime, FrameTimeline, NoopJankStats, PresentState, StreamSink,
    TimelineItem,
};

const VSYNC_60HZ_NS: i64 = 16_666_667;

fn main() -> std::io::Result<()> {
    let file = File::create("frames.timeline")?;
    let sink = Arc::new(StreamSink::new(BufWriter::new(file)));
    let timeline = FrameTimeline::new(
        Arc::new(NoopJankStats),
        sink.clone(),
        std::process::id() as i32,
    );

    println!("Recording 120 simulated frames...");

    let start = monotonic_now_ns();
    let mut previous_fence: Option<Arc<FenceTime>> = None;

    for cycle in 0..120i64 {
        let vsync = start + cycle * VSYNC_60HZ_NS;

        let app_token = timeline.generate_token(TimelineItem::new(
            vsync - VSYNC_60HZ_NS,
            vsync - VSYNC_60HZ_NS / 2,
            vsync,
        ));
        let sf_token = timeline.generate_token(TimelineItem::new(
            vsync - VSYNC_60HZ_NS / 2,
            vsync - VSYNC_60HZ_NS / 4,
            vsync,
        ));

        let frame = timeline.create_surface_frame_for_token(
            Some(app_token),
            std::process::id() as i32,
            1000,
            "demo_layer",
            "demo_layer",
        );
        frame.set_actual_start_time(vsync - VSYNC_60HZ_NS);
        frame.set_actual_queue_time(vsync - VSYNC_60HZ_NS / 2);
        // Every 30th frame the app runs long.
        let acquire = if cycle % 30 == 29 {
            vsync - VSYNC_60HZ_NS / 8
        } else {
            vsync - VSYNC_60HZ_NS / 2
        };
        frame.set_acquire_fence_time(acquire);
        frame.set_present_state(PresentState::Presented, 0);

        timeline.set_sf_wake_up(sf_token, vsync - VSYNC_60HZ_NS / 2, VSYNC_60HZ_NS);
        timeline.add_surface_frame(frame);

        // The previous cycle's fence signals one vsync later, so each
        // present call reconciles the frame before it.
        if let Some(fence) = previous_fence.take() {
            let late = if cycle % 30 == 0 { VSYNC_60HZ_NS } else { 0 };
            fence.signal(vsync - VSYNC_60HZ_NS + late);
        }
        let fence = Arc::new(FenceTime::pending());
        timeline.set_sf_present(vsync - VSYNC_60HZ_NS / 4, fence.clone());
        previous_fence = Some(fence);
    }

    sink.flush()?;

    println!("{}", timeline.parse_args(&["-jank"]));
    println!("Trace written to: frames.timeline");
    Ok(())
}

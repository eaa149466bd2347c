use std::fs::File;
use std::io::{BufWriter, Read};
use std::sync::{Arc, Once};

use frame_timeline::{
    FenceTime, FrameTimeline, JankStats, JankType, MemorySink, NoopJankStats, PresentState,
    StreamSink, TimelineItem, INVALID_TOKEN,
};
use parking_lot::Mutex;
use prost::Message;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use timeline_format::{trace_packet::Event, JankType as WireJankType, PresentType, Trace};

const PID: i32 = 10;
const UID: u32 = 0;
const SF_PID: i32 = 42;
const VSYNC_11MS: i64 = 11_000_000;

fn ms(value: i64) -> i64 {
    value * 1_000_000
}

#[derive(Default)]
struct CountingStats {
    frame_masks: Mutex<Vec<JankType>>,
}

impl JankStats for CountingStats {
    fn increment_janky_frames(&self, mask: JankType) {
        self.frame_masks.lock().push(mask);
    }

    fn increment_layer_janky_frames(&self, _uid: u32, _layer: &str, _mask: JankType) {}
}

struct Setup {
    timeline: FrameTimeline,
    sink: Arc<MemorySink>,
}

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    });
}

#[fixture]
fn setup() -> Setup {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let timeline = FrameTimeline::new(Arc::new(NoopJankStats), sink.clone(), SF_PID);
    Setup { timeline, sink }
}

fn run_presented_cycle(
    timeline: &FrameTimeline,
    surface_predictions: TimelineItem,
    sf_predictions: TimelineItem,
    present_time: i64,
    signal_time: i64,
) -> (i64, i64) {
    let surface_token = timeline.generate_token(surface_predictions);
    let sf_token = timeline.generate_token(sf_predictions);
    let frame =
        timeline.create_surface_frame_for_token(Some(surface_token), PID, UID, "layer1", "layer1");
    frame.set_present_state(PresentState::Presented, 0);

    let fence = Arc::new(FenceTime::pending());
    timeline.set_sf_wake_up(sf_token, sf_predictions.start, VSYNC_11MS);
    timeline.add_surface_frame(frame);
    fence.signal(signal_time);
    timeline.set_sf_present(present_time, fence);
    (surface_token, sf_token)
}

#[rstest]
fn clean_cycle_emits_paired_packets(setup: Setup) {
    let (surface_token, sf_token) = run_presented_cycle(
        &setup.timeline,
        TimelineItem::new(ms(10), ms(20), ms(30)),
        TimelineItem::new(ms(22), ms(26), ms(30)),
        ms(26),
        ms(31),
    );

    let packets = setup.sink.packets();
    assert_eq!(packets.len(), 2);

    let Some(Event::DisplayFrame(df)) = &packets[0].event else {
        panic!("first packet must be the display frame");
    };
    assert_eq!(df.token, Some(sf_token));
    assert_eq!(df.pid, Some(SF_PID));
    assert_eq!(df.jank_type, Some(WireJankType::JankNone as i32));
    assert_eq!(df.present_type, Some(PresentType::PresentOnTime as i32));
    assert_eq!(df.on_time_finish, Some(true));
    assert_eq!(df.expected_start_ns, Some(ms(22)));
    assert_eq!(df.expected_end_ns, Some(ms(26)));

    let Some(Event::SurfaceFrame(sf)) = &packets[1].event else {
        panic!("second packet must be the surface frame");
    };
    assert_eq!(sf.token, Some(surface_token));
    assert_eq!(sf.display_frame_token, Some(sf_token));
    assert_eq!(sf.layer_name.as_deref(), Some("layer1"));
    assert_eq!(sf.pid, Some(PID));
    assert_eq!(sf.present_type, Some(PresentType::PresentOnTime as i32));
}

#[rstest]
fn compositor_deadline_miss_lands_on_the_wire(setup: Setup) {
    run_presented_cycle(
        &setup.timeline,
        TimelineItem::new(ms(10), ms(20), ms(60)),
        TimelineItem::new(ms(52), ms(56), ms(60)),
        ms(59),
        ms(90),
    );

    let packets = setup.sink.packets();
    let Some(Event::DisplayFrame(df)) = &packets[0].event else {
        panic!("first packet must be the display frame");
    };
    assert_eq!(
        df.jank_type,
        Some(WireJankType::JankSfDeadlineMissed as i32)
    );
    assert_eq!(df.present_type, Some(PresentType::PresentLate as i32));
    assert_eq!(df.on_time_finish, Some(false));

    // The surface frame inherits the compositor's verdict.
    let Some(Event::SurfaceFrame(sf)) = &packets[1].event else {
        panic!("second packet must be the surface frame");
    };
    assert_eq!(
        sf.jank_type,
        Some(WireJankType::JankSfDeadlineMissed as i32)
    );
}

#[rstest]
fn dropped_surface_frame_reports_dropped_present_type(setup: Setup) {
    let surface_token = setup
        .timeline
        .generate_token(TimelineItem::new(ms(10), ms(20), ms(30)));
    let sf_token = setup
        .timeline
        .generate_token(TimelineItem::new(ms(22), ms(26), ms(30)));
    let frame = setup.timeline.create_surface_frame_for_token(
        Some(surface_token),
        PID,
        UID,
        "layer1",
        "layer1",
    );
    frame.set_present_state(PresentState::Dropped, 0);

    let fence = Arc::new(FenceTime::signaled(ms(31)));
    setup.timeline.set_sf_wake_up(sf_token, ms(22), VSYNC_11MS);
    setup.timeline.add_surface_frame(frame);
    setup.timeline.set_sf_present(ms(26), fence);

    let packets = setup.sink.packets();
    let Some(Event::SurfaceFrame(sf)) = &packets[1].event else {
        panic!("second packet must be the surface frame");
    };
    assert_eq!(sf.present_type, Some(PresentType::PresentDropped as i32));
    assert_eq!(sf.actual_end_ns, Some(0));
}

#[rstest]
fn untokened_cycle_stays_off_the_wire(setup: Setup) {
    let fence = Arc::new(FenceTime::signaled(30));
    setup.timeline.set_sf_wake_up(INVALID_TOKEN, 20, VSYNC_11MS);
    setup.timeline.set_sf_present(25, fence);

    assert!(setup.sink.is_empty());
}

#[rstest]
fn stats_sink_sees_the_aggregate_mask() {
    let stats = Arc::new(CountingStats::default());
    let timeline = FrameTimeline::new(stats.clone(), Arc::new(MemorySink::new()), SF_PID);
    run_presented_cycle(
        &timeline,
        TimelineItem::new(ms(10), ms(20), ms(60)),
        TimelineItem::new(ms(52), ms(56), ms(60)),
        ms(59),
        ms(90),
    );

    let masks = stats.frame_masks.lock();
    assert_eq!(masks.len(), 1);
    assert!(masks[0].contains(JankType::SF_CPU_DEADLINE_MISSED));
}

#[rstest]
fn stream_sink_writes_a_decodable_trace_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frames.timeline");
    let sink = Arc::new(StreamSink::new(BufWriter::new(File::create(&path).unwrap())));
    let timeline = FrameTimeline::new(Arc::new(NoopJankStats), sink.clone(), SF_PID);

    for k in 0..3i64 {
        run_presented_cycle(
            &timeline,
            TimelineItem::new(ms(10 + 30 * k), ms(20 + 30 * k), ms(30 + 30 * k)),
            TimelineItem::new(ms(22 + 30 * k), ms(26 + 30 * k), ms(30 + 30 * k)),
            ms(26 + 30 * k),
            ms(31 + 30 * k),
        );
    }
    sink.flush().unwrap();

    let mut bytes = Vec::new();
    File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
    let trace = Trace::decode(bytes.as_slice()).unwrap();

    // One display and one surface packet per cycle.
    assert_eq!(trace.packet.len(), 6);
    let display_tokens: Vec<i64> = trace
        .packet
        .iter()
        .filter_map(|packet| match &packet.event {
            Some(Event::DisplayFrame(df)) => df.token,
            _ => None,
        })
        .collect();
    assert_eq!(display_tokens.len(), 3);
    assert!(display_tokens.windows(2).all(|pair| pair[0] < pair[1]));
}

#[rstest]
fn dump_reflects_reconciled_state(setup: Setup) {
    run_presented_cycle(
        &setup.timeline,
        TimelineItem::new(ms(10), ms(20), ms(60)),
        TimelineItem::new(ms(52), ms(56), ms(60)),
        ms(59),
        ms(90),
    );

    let dump = setup.timeline.parse_args(&["-all"]);
    assert!(dump.starts_with("Number of display frames : 1"));
    assert!(dump.contains("Compositor CPU Deadline Missed"));
    assert!(dump.contains("Layer - layer1"));

    let janky_dump = setup.timeline.parse_args(&["-jank"]);
    assert!(janky_dump.contains("Display Frame 0"));
}

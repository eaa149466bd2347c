use bytes::BytesMut;
use prost::Message;
use std::io::Write;

/// Clock id stamped on every packet. Matches the monotonic clock the engine
/// samples with `clock_gettime(CLOCK_MONOTONIC)`.
pub const CLOCK_MONOTONIC: u32 = 3;

/// Top-level container. A trace file is a sequence of encoded `Trace`
/// messages, each holding one packet; protobuf repeated-field semantics make
/// the concatenation decode as a single `Trace`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trace {
    #[prost(message, repeated, tag = "1")]
    pub packet: Vec<TracePacket>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TracePacket {
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub timestamp_clock_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub sequence_id: Option<u32>,
    #[prost(oneof = "trace_packet::Event", tags = "4, 5")]
    pub event: Option<trace_packet::Event>,
}

pub mod trace_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "4")]
        DisplayFrame(super::DisplayFrameEvent),
        #[prost(message, tag = "5")]
        SurfaceFrame(super::SurfaceFrameEvent),
    }
}

/// One compositor cycle, emitted once after its present fence resolved.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisplayFrameEvent {
    #[prost(int64, optional, tag = "1")]
    pub token: Option<i64>,
    #[prost(enumeration = "PresentType", optional, tag = "2")]
    pub present_type: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub on_time_finish: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub gpu_composition: Option<bool>,
    #[prost(enumeration = "JankType", optional, tag = "5")]
    pub jank_type: Option<i32>,
    #[prost(int64, optional, tag = "6")]
    pub expected_start_ns: Option<i64>,
    #[prost(int64, optional, tag = "7")]
    pub expected_end_ns: Option<i64>,
    #[prost(int64, optional, tag = "8")]
    pub actual_start_ns: Option<i64>,
    #[prost(int64, optional, tag = "9")]
    pub actual_end_ns: Option<i64>,
    #[prost(int32, optional, tag = "10")]
    pub pid: Option<i32>,
}

/// One application buffer submission, emitted with its owning display frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SurfaceFrameEvent {
    #[prost(int64, optional, tag = "1")]
    pub token: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub display_frame_token: Option<i64>,
    #[prost(enumeration = "PresentType", optional, tag = "3")]
    pub present_type: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub on_time_finish: Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub gpu_composition: Option<bool>,
    #[prost(enumeration = "JankType", optional, tag = "6")]
    pub jank_type: Option<i32>,
    #[prost(int64, optional, tag = "7")]
    pub expected_start_ns: Option<i64>,
    #[prost(int64, optional, tag = "8")]
    pub expected_end_ns: Option<i64>,
    #[prost(int64, optional, tag = "9")]
    pub actual_start_ns: Option<i64>,
    #[prost(int64, optional, tag = "10")]
    pub actual_end_ns: Option<i64>,
    #[prost(string, optional, tag = "11")]
    pub layer_name: Option<String>,
    #[prost(int32, optional, tag = "12")]
    pub pid: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PresentType {
    PresentUnspecified = 0,
    PresentOnTime = 1,
    PresentLate = 2,
    PresentEarly = 3,
    PresentDropped = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum JankType {
    JankUnspecified = 0,
    JankNone = 1,
    JankDisplayHal = 2,
    JankSfDeadlineMissed = 3,
    JankSfScheduling = 4,
    JankAppDeadlineMissed = 5,
    JankBufferStuffing = 6,
    JankUnknown = 7,
}

pub struct TimelineStreamWriter<W: Write> {
    writer: W,
}

impl<W: Write> TimelineStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_packet(&mut self, packet: TracePacket) -> Result<(), std::io::Error> {
        let trace = Trace {
            packet: vec![packet],
        };
        let mut buf = BytesMut::new();
        trace.encode(&mut buf).map_err(std::io::Error::other)?;
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn display_packet(token: i64) -> TracePacket {
        TracePacket {
            timestamp: Some(100),
            timestamp_clock_id: Some(CLOCK_MONOTONIC),
            sequence_id: None,
            event: Some(trace_packet::Event::DisplayFrame(DisplayFrameEvent {
                token: Some(token),
                present_type: Some(PresentType::PresentOnTime as i32),
                on_time_finish: Some(true),
                gpu_composition: Some(false),
                jank_type: Some(JankType::JankNone as i32),
                expected_start_ns: Some(10),
                expected_end_ns: Some(20),
                actual_start_ns: Some(11),
                actual_end_ns: Some(21),
                pid: Some(42),
            })),
        }
    }

    #[rstest]
    fn packet_round_trips_through_trace() {
        let packet = display_packet(7);
        let trace = Trace {
            packet: vec![packet.clone()],
        };
        let mut buf = BytesMut::new();
        trace.encode(&mut buf).unwrap();

        let decoded = Trace::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.packet.len(), 1);
        assert_eq!(decoded.packet[0], packet);
    }

    #[rstest]
    fn concatenated_packets_decode_as_one_trace() {
        let mut writer = TimelineStreamWriter::new(Vec::new());
        writer.write_packet(display_packet(1)).unwrap();
        writer.write_packet(display_packet(2)).unwrap();
        let bytes = writer.into_inner();

        let decoded = Trace::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.packet.len(), 2);
        let tokens: Vec<i64> = decoded
            .packet
            .iter()
            .filter_map(|p| match &p.event {
                Some(trace_packet::Event::DisplayFrame(df)) => df.token,
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec![1, 2]);
    }

    #[rstest]
    fn surface_frame_event_keeps_layer_identity() {
        let packet = TracePacket {
            timestamp: Some(5),
            timestamp_clock_id: Some(CLOCK_MONOTONIC),
            sequence_id: None,
            event: Some(trace_packet::Event::SurfaceFrame(SurfaceFrameEvent {
                token: Some(3),
                display_frame_token: Some(4),
                present_type: Some(PresentType::PresentDropped as i32),
                on_time_finish: Some(false),
                gpu_composition: Some(false),
                jank_type: Some(JankType::JankAppDeadlineMissed as i32),
                expected_start_ns: Some(0),
                expected_end_ns: Some(0),
                actual_start_ns: Some(0),
                actual_end_ns: Some(0),
                layer_name: Some("status_bar".to_string()),
                pid: Some(1001),
            })),
        };

        let trace = Trace {
            packet: vec![packet],
        };
        let mut buf = BytesMut::new();
        trace.encode(&mut buf).unwrap();
        let decoded = Trace::decode(buf.freeze()).unwrap();

        match &decoded.packet[0].event {
            Some(trace_packet::Event::SurfaceFrame(sf)) => {
                assert_eq!(sf.layer_name.as_deref(), Some("status_bar"));
                assert_eq!(sf.display_frame_token, Some(4));
                assert_eq!(sf.present_type, Some(PresentType::PresentDropped as i32));
            }
            other => panic!("expected surface frame event, got {:?}", other.is_some()),
        }
    }
}

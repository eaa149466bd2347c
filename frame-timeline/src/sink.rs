use std::io::Write;

use parking_lot::Mutex;
use timeline_format::{TimelineStreamWriter, TracePacket};
use tracing::warn;

/// Destination for finalized frame packets. Emission happens on whichever
/// thread observes the present fence, so implementations must be shareable.
pub trait TraceSink: Send + Sync {
    fn emit(&self, packet: TracePacket);
}

/// Appends packets to a byte stream via [`TimelineStreamWriter`]. Write
/// failures are logged and dropped; tracing is best-effort and must never
/// feed errors back into the compositor.
pub struct StreamSink<W: Write + Send> {
    writer: Mutex<TimelineStreamWriter<W>>,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(TimelineStreamWriter::new(writer)),
        }
    }

    pub fn flush(&self) -> Result<(), std::io::Error> {
        self.writer.lock().flush()
    }
}

impl<W: Write + Send> TraceSink for StreamSink<W> {
    fn emit(&self, packet: TracePacket) {
        if let Err(error) = self.writer.lock().write_packet(packet) {
            warn!(%error, "failed to write frame timeline packet");
        }
    }
}

/// Collects packets in memory for inspection.
#[derive(Default)]
pub struct MemorySink {
    packets: Mutex<Vec<TracePacket>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> Vec<TracePacket> {
        self.packets.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, packet: TracePacket) {
        self.packets.lock().push(packet);
    }
}

/// Discards every packet. For deployments that only want the dump surface
/// and the stats counters.
pub struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, _packet: TracePacket) {}
}

//! Transport-layer interface.
//!
//! The transport demuxer is an external collaborator: it owns buffering,
//! prefetch threads and seeking; this core only pulls packets and coarse
//! stream descriptors from it.

use crate::packet::DemuxPacket;
use crate::stream::StreamDescriptor;

/// A transport-level demuxer feeding the client demux.
pub trait TransportDemux {
    /// Open the underlying demuxer. `false` is fatal for the session.
    fn open_demux(&mut self) -> bool;

    fn flush_demux(&mut self);

    /// Cooperative cancellation; must unblock an in-flight read.
    fn abort_demux(&mut self);

    /// Current stream announcement. Coarse and possibly incomplete; packet
    /// negotiation fills in the rest.
    fn get_streams(&self) -> Vec<StreamDescriptor>;

    /// Pull the next packet. `None` means "nothing buffered yet", not end of
    /// stream; the caller polls again later.
    fn read_demux(&mut self) -> Option<DemuxPacket>;

    /// Seek to `time_ms`. On success returns the starting PTS in
    /// microseconds.
    fn seek_time(&mut self, time_ms: f64, backwards: bool) -> Option<i64>;

    fn set_speed(&mut self, speed: i32);

    fn fill_buffer(&mut self, mode: bool);

    fn enable_stream(&mut self, id: u32, enable: bool);

    /// Re-open a single stream; may change its parameters.
    fn open_stream(&mut self, id: u32) -> bool;

    fn set_video_resolution(&mut self, width: u32, height: u32);

    /// UI-visible playback position, when the transport tracks one.
    fn display_time_ms(&self) -> Option<i64>;

    fn file_name(&self) -> String {
        String::new()
    }
}

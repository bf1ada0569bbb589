//! Demux packets as handed to the decoder stage.
//!
//! Besides ordinary elementary-stream packets the read loop emits two kinds
//! of zero-length packets:
//! - a heartbeat (no stream id) after a "stream info available" marker, so
//!   the decoder observes progress without mis-timing
//! - a "stream set changed" signal, emitted strictly before the packet whose
//!   properties triggered the change

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifies which stream a packet belongs to, or which control marker it
/// carries instead of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamId {
    /// Ordinary elementary stream.
    Stream(u32),
    /// Transport marker: fresh stream info is available, re-request streams.
    StreamInfo,
    /// Transport marker / synthetic signal: the stream set changed.
    StreamChange,
    /// Zero-length heartbeat, not tied to any stream.
    None,
}

impl StreamId {
    pub fn stream(&self) -> Option<u32> {
        match self {
            StreamId::Stream(id) => Some(*id),
            _ => None,
        }
    }
}

/// One transport-delivered unit of elementary-stream data.
#[derive(Debug, Clone)]
pub struct DemuxPacket {
    pub stream_id: StreamId,
    /// Routing id for setups with more than one demuxer feeding a player.
    pub demuxer_id: u32,
    pub data: Bytes,
    /// Presentation timestamp in microseconds.
    pub pts_us: Option<i64>,
    /// Decode timestamp in microseconds.
    pub dts_us: Option<i64>,
    pub duration_us: i64,
    /// UI-facing display time in milliseconds, anchored by the read loop.
    pub display_time_ms: Option<i64>,
}

impl DemuxPacket {
    pub fn new(stream_id: u32, data: Bytes) -> Self {
        Self {
            stream_id: StreamId::Stream(stream_id),
            demuxer_id: 0,
            data,
            pts_us: None,
            dts_us: None,
            duration_us: 0,
            display_time_ms: None,
        }
    }

    /// Zero-length heartbeat packet.
    pub fn heartbeat(demuxer_id: u32) -> Self {
        Self {
            stream_id: StreamId::None,
            demuxer_id,
            data: Bytes::new(),
            pts_us: None,
            dts_us: None,
            duration_us: 0,
            display_time_ms: None,
        }
    }

    /// Zero-length "stream set changed" signal packet.
    pub fn stream_change(demuxer_id: u32) -> Self {
        Self {
            stream_id: StreamId::StreamChange,
            demuxer_id,
            data: Bytes::new(),
            pts_us: None,
            dts_us: None,
            duration_us: 0,
            display_time_ms: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

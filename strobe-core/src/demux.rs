//! Client demux facade.
//!
//! The single consumption path between a transport demuxer and the decoder
//! stage: pulls one packet per `read` call, classifies control packets,
//! routes ordinary packets through property negotiation and synthesizes
//! zero-length signal packets so the decoder always learns about a stream
//! change strictly before the packet that triggered it.

use thiserror::Error;
use tracing::debug;

use crate::packet::{DemuxPacket, StreamId};
use crate::parser::ParserFactory;
use crate::registry::StreamRegistry;
use crate::stream::{StreamDescriptor, StreamKind};
use crate::transport::TransportDemux;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("transport demuxer failed to open")]
    TransportOpen,
}

pub struct ClientDemux<T: TransportDemux> {
    transport: T,
    registry: StreamRegistry,
    demuxer_id: u32,
    /// Real packet held back while its stream-change signal goes out first.
    deferred: Option<DemuxPacket>,
    /// Id of the video stream the player opened, for extradata gating.
    video_stream_playing: Option<u32>,
    display_time_ms: i64,
    dts_at_display_time_us: Option<i64>,
}

impl<T: TransportDemux> ClientDemux<T> {
    pub fn new(transport: T, factory: Box<dyn ParserFactory>) -> Self {
        Self {
            transport,
            registry: StreamRegistry::new(factory),
            demuxer_id: 0,
            deferred: None,
            video_stream_playing: None,
            display_time_ms: 0,
            dts_at_display_time_us: None,
        }
    }

    pub fn with_demuxer_id(mut self, demuxer_id: u32) -> Self {
        self.demuxer_id = demuxer_id;
        self
    }

    /// Open the transport demuxer and request the initial stream set.
    pub fn open(&mut self) -> Result<(), DemuxError> {
        self.transport.abort_demux();
        if !self.transport.open_demux() {
            return Err(DemuxError::TransportOpen);
        }
        self.request_streams();
        self.display_time_ms = 0;
        self.dts_at_display_time_us = None;
        Ok(())
    }

    /// Full reset: drop all stream state and reopen. Required after a seek
    /// on the transport side changed the stream composition.
    pub fn reset(&mut self) -> Result<(), DemuxError> {
        self.registry.clear();
        self.deferred = None;
        self.video_stream_playing = None;
        self.open()
    }

    pub fn abort(&mut self) {
        self.transport.abort_demux();
    }

    pub fn flush(&mut self) {
        self.transport.flush_demux();
        self.deferred = None;
        self.display_time_ms = 0;
        self.dts_at_display_time_us = None;
    }

    fn request_streams(&mut self) {
        let announced = self.transport.get_streams();
        self.registry.request_streams(&announced);
    }

    /// Pull one packet.
    ///
    /// `None` means the transport has nothing buffered; poll again later.
    /// Zero-length packets are heartbeats, or stream-change signals when
    /// tagged [`StreamId::StreamChange`].
    pub fn read(&mut self) -> Option<DemuxPacket> {
        // A change signal went out last call; release the packet behind it.
        if let Some(mut pkt) = self.deferred.take() {
            pkt.demuxer_id = self.demuxer_id;
            return Some(pkt);
        }

        let mut pkt = self.transport.read_demux()?;

        match pkt.stream_id {
            StreamId::StreamInfo => {
                // Heartbeat instead of the marker so the decoder observes
                // progress without mis-timing.
                self.request_streams();
                return Some(DemuxPacket::heartbeat(self.demuxer_id));
            }
            StreamId::StreamChange => {
                self.request_streams();
            }
            StreamId::Stream(id) => {
                if self.registry.contains(id) && self.registry.negotiate_packet(&pkt) {
                    // Fold the new belief into the forwardable-field path,
                    // then signal before delivering the packet itself.
                    self.request_streams();
                    debug!("read: stream {} changed, deferring packet", id);
                    self.deferred = Some(pkt);
                    return Some(DemuxPacket::stream_change(self.demuxer_id));
                }
            }
            StreamId::None => {}
        }

        if !self.is_video_ready() {
            // The decoder cannot configure itself yet; swallow the packet.
            return Some(DemuxPacket::heartbeat(self.demuxer_id));
        }

        self.stamp_display_time(&mut pkt);
        pkt.demuxer_id = self.demuxer_id;
        Some(pkt)
    }

    /// Anchor-relative display time, keeping the UI progress smooth across
    /// discontinuous source timestamps.
    fn stamp_display_time(&mut self, pkt: &mut DemuxPacket) {
        let Some(display_time) = self.transport.display_time_ms() else {
            return;
        };
        if display_time != self.display_time_ms {
            self.display_time_ms = display_time;
            if let Some(dts) = pkt.dts_us {
                self.dts_at_display_time_us = Some(dts);
            }
        }
        if let (Some(anchor), Some(dts)) = (self.dts_at_display_time_us, pkt.dts_us) {
            pkt.display_time_ms = Some(self.display_time_ms + (dts - anchor) / 1000);
        }
    }

    /// False while the playing video stream still needs extradata the
    /// decoder cannot start without.
    fn is_video_ready(&self) -> bool {
        let Some(id) = self.video_stream_playing else {
            return true;
        };
        match self.registry.get(id) {
            Some(desc) => {
                desc.kind != StreamKind::Video
                    || !desc.codec.has_extradata()
                    || desc.extradata.is_some()
            }
            None => true,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_stream(&self, id: u32) -> Option<&StreamDescriptor> {
        self.registry.get(id)
    }

    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        self.registry.list()
    }

    pub fn num_streams(&self) -> usize {
        self.registry.len()
    }

    pub fn stream_codec_name(&self, id: u32) -> String {
        self.registry
            .get(id)
            .map(|desc| desc.codec.short_name().to_string())
            .unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        self.transport.file_name()
    }

    // ------------------------------------------------------------------
    // Pass-throughs to the transport layer
    // ------------------------------------------------------------------

    /// Seek; resets the display-time anchor. The caller is expected to
    /// follow a successful transport-side reset with [`ClientDemux::reset`].
    pub fn seek_time(&mut self, time_ms: f64, backwards: bool) -> Option<i64> {
        self.display_time_ms = 0;
        self.dts_at_display_time_us = None;
        self.transport.seek_time(time_ms, backwards)
    }

    pub fn set_speed(&mut self, speed: i32) {
        self.transport.set_speed(speed);
    }

    pub fn fill_buffer(&mut self, mode: bool) {
        self.transport.fill_buffer(mode);
    }

    pub fn enable_stream(&mut self, id: u32, enable: bool) {
        self.transport.enable_stream(id, enable);
    }

    /// Open a stream on the transport side. Opening may change parameters,
    /// so the stream's properties are re-initialized from the announcement.
    pub fn open_stream(&mut self, id: u32) {
        let opened = self.transport.open_stream(id);

        let announced = self
            .transport
            .get_streams()
            .into_iter()
            .find(|desc| desc.id == id);
        if let Some(desc) = &announced {
            if desc.kind == StreamKind::Video {
                self.video_stream_playing = Some(id);
            }
        }
        if opened {
            if let Some(desc) = announced {
                self.registry.force_stream_props(&desc);
            }
        }
    }

    pub fn set_video_resolution(&mut self, width: u32, height: u32) {
        self.transport.set_video_resolution(width, height);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::parser::ParsedFields;
    use crate::stream::{StreamProperties, VideoProperties};
    use crate::testutil::{ScriptedFactory, ScriptedParser};
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeTransportState {
        streams: Vec<StreamDescriptor>,
        packets: VecDeque<DemuxPacket>,
        display_time_ms: Option<i64>,
        open_ok: bool,
        aborted: bool,
        flushed: bool,
        opened_streams: Vec<u32>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        state: Rc<RefCell<FakeTransportState>>,
    }

    impl FakeTransport {
        fn with_streams(streams: Vec<StreamDescriptor>) -> Self {
            let fake = Self::default();
            {
                let mut state = fake.state.borrow_mut();
                state.open_ok = true;
                state.streams = streams;
            }
            fake
        }

        fn push(&self, pkt: DemuxPacket) {
            self.state.borrow_mut().packets.push_back(pkt);
        }
    }

    impl TransportDemux for FakeTransport {
        fn open_demux(&mut self) -> bool {
            self.state.borrow().open_ok
        }

        fn flush_demux(&mut self) {
            self.state.borrow_mut().flushed = true;
        }

        fn abort_demux(&mut self) {
            self.state.borrow_mut().aborted = true;
        }

        fn get_streams(&self) -> Vec<StreamDescriptor> {
            self.state.borrow().streams.clone()
        }

        fn read_demux(&mut self) -> Option<DemuxPacket> {
            self.state.borrow_mut().packets.pop_front()
        }

        fn seek_time(&mut self, _time_ms: f64, _backwards: bool) -> Option<i64> {
            Some(0)
        }

        fn set_speed(&mut self, _speed: i32) {}

        fn fill_buffer(&mut self, _mode: bool) {}

        fn enable_stream(&mut self, _id: u32, _enable: bool) {}

        fn open_stream(&mut self, id: u32) -> bool {
            self.state.borrow_mut().opened_streams.push(id);
            true
        }

        fn set_video_resolution(&mut self, _width: u32, _height: u32) {}

        fn display_time_ms(&self) -> Option<i64> {
            self.state.borrow().display_time_ms
        }
    }

    fn video_desc(id: u32, codec: CodecId) -> StreamDescriptor {
        StreamDescriptor::new(
            id,
            codec,
            StreamProperties::Video(VideoProperties::default()),
        )
    }

    fn data_pkt(id: u32, payload: &[u8]) -> DemuxPacket {
        DemuxPacket::new(id, Bytes::copy_from_slice(payload))
    }

    fn marker(stream_id: StreamId) -> DemuxPacket {
        let mut pkt = DemuxPacket::heartbeat(0);
        pkt.stream_id = stream_id;
        pkt
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let transport = FakeTransport::default();
        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        assert!(matches!(demux.open(), Err(DemuxError::TransportOpen)));
    }

    #[test]
    fn test_stream_info_marker_yields_heartbeat() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::Vp9)]);
        transport.push(marker(StreamId::StreamInfo));
        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        demux.open().unwrap();

        let pkt = demux.read().unwrap();
        assert!(pkt.is_empty());
        assert_eq!(pkt.stream_id, StreamId::None);
        assert_eq!(demux.num_streams(), 1);
    }

    #[test]
    fn test_signal_before_data_ordering() {
        // P4: a negotiated change is signalled strictly before the packet
        // that caused it.
        let parser = ScriptedParser::with_script(vec![Some(ParsedFields {
            width: Some(1280),
            height: Some(720),
            ..Default::default()
        })]);
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::H264)]);
        transport.push(data_pkt(1, b"keyframe"));
        let mut demux = ClientDemux::new(
            transport,
            Box::new(ScriptedFactory::with_parsers(vec![parser])),
        );
        demux.open().unwrap();

        let signal = demux.read().unwrap();
        assert_eq!(signal.stream_id, StreamId::StreamChange);
        assert!(signal.is_empty());

        let real = demux.read().unwrap();
        assert_eq!(real.stream_id, StreamId::Stream(1));
        assert_eq!(&real.data[..], b"keyframe");

        let video = demux.get_stream(1).unwrap().props.video().unwrap();
        assert_eq!((video.width, video.height), (1280, 720));
    }

    #[test]
    fn test_unregistered_stream_passes_through() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::Vp9)]);
        transport.push(data_pkt(9, b"stray"));
        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        demux.open().unwrap();

        // Unknown id: no negotiation, but the packet is still forwarded.
        let pkt = demux.read().unwrap();
        assert_eq!(pkt.stream_id, StreamId::Stream(9));
        assert_eq!(&pkt.data[..], b"stray");
    }

    #[test]
    fn test_extradata_gating() {
        // P5: while the playing video stream lacks mandatory extradata, only
        // heartbeats come out, no matter how many packets are pulled.
        // open() creates the first parser, open_stream()'s forced re-init
        // the second; neither ever yields extradata.
        let transport = FakeTransport::with_streams(vec![video_desc(2, CodecId::H264)]);
        transport.push(data_pkt(2, b"frame-a"));
        transport.push(data_pkt(2, b"frame-b"));
        let mut demux = ClientDemux::new(
            transport,
            Box::new(ScriptedFactory::with_parsers(vec![
                ScriptedParser::default(),
                ScriptedParser::default(),
            ])),
        );
        demux.open().unwrap();
        demux.open_stream(2);

        let first = demux.read().unwrap();
        assert!(first.is_empty());
        assert_eq!(first.stream_id, StreamId::None);
        let second = demux.read().unwrap();
        assert!(second.is_empty());
        assert_eq!(second.stream_id, StreamId::None);
    }

    #[test]
    fn test_gating_lifts_after_extradata() {
        let mut armed = ScriptedParser::default();
        armed.wants_split = true;
        armed.split = Some(Bytes::from_static(b"spspps"));

        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::H264)]);
        transport.push(data_pkt(1, b"keyframe"));
        transport.push(data_pkt(1, b"delta"));
        let mut demux = ClientDemux::new(
            transport,
            Box::new(ScriptedFactory::with_parsers(vec![
                armed,
                ScriptedParser::default(),
            ])),
        );
        demux.open().unwrap();

        // Keyframe splits extradata: change signal first, then the packet.
        let signal = demux.read().unwrap();
        assert_eq!(signal.stream_id, StreamId::StreamChange);
        let real = demux.read().unwrap();
        assert_eq!(&real.data[..], b"keyframe");
        assert!(demux.get_stream(1).unwrap().extradata.is_some());

        let next = demux.read().unwrap();
        assert_eq!(&next.data[..], b"delta");
    }

    #[test]
    fn test_display_time_anchoring() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::Vp9)]);
        transport.state.borrow_mut().display_time_ms = Some(5_000);
        let mut first = data_pkt(1, b"a");
        first.dts_us = Some(90_000_000);
        let mut second = data_pkt(1, b"b");
        second.dts_us = Some(90_400_000);
        transport.push(first);
        transport.push(second);

        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        demux.open().unwrap();

        // First packet anchors the display time at its DTS.
        assert_eq!(demux.read().unwrap().display_time_ms, Some(5_000));
        // 400 ms later in DTS terms, same transport display counter.
        assert_eq!(demux.read().unwrap().display_time_ms, Some(5_400));
    }

    #[test]
    fn test_flush_resets_anchor() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::Vp9)]);
        let mut demux = ClientDemux::new(transport.clone(), Box::new(ScriptedFactory::default()));
        demux.open().unwrap();
        demux.flush();
        assert!(transport.state.borrow().flushed);
    }

    #[test]
    fn test_reset_clears_streams_and_reopens() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::H264)]);
        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        demux.open().unwrap();
        assert_eq!(demux.num_streams(), 1);
        demux.reset().unwrap();
        assert_eq!(demux.num_streams(), 1);
    }

    #[test]
    fn test_codec_name_lookup() {
        let transport = FakeTransport::with_streams(vec![video_desc(1, CodecId::H264)]);
        let mut demux = ClientDemux::new(transport, Box::new(ScriptedFactory::default()));
        demux.open().unwrap();
        assert_eq!(demux.stream_codec_name(1), "h264");
        assert_eq!(demux.stream_codec_name(42), "");
    }
}

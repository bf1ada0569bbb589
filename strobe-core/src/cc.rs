//! Closed-caption sub-demux.
//!
//! Reassembles the caption byte pairs carried inside video packets into
//! per-service text streams. Services are discovered lazily as they appear
//! in the byte stream; each becomes its own subtitle stream exposed through
//! the same descriptor model as the main registry. CEA-608 data is exposed
//! as service 0 until a CEA-708 service shows up, after which the 608
//! fallback stream is dropped.

use bytes::Bytes;
use tracing::debug;

use crate::codec::CodecId;
use crate::packet::DemuxPacket;
use crate::stream::{StreamDescriptor, StreamProperties, FLAG_HEARING_IMPAIRED};

/// Caption bytes lifted out of one video packet, with its PTS.
#[derive(Debug, Clone)]
pub struct CaptionBlock {
    pub pts_us: i64,
    /// cc_data triplets: control byte (valid flag + cc_type) and two payload
    /// bytes per entry.
    pub data: Bytes,
}

struct ServiceData {
    service: u8,
    pts_us: i64,
    text: Vec<u8>,
}

pub struct CaptionDemux {
    streams: Vec<StreamDescriptor>,
    services: Vec<ServiceData>,
    /// Blocks not yet decoded, kept PTS-sorted (latest first) so decode
    /// order follows presentation order regardless of packet reordering.
    pending: Vec<CaptionBlock>,
    /// DTVCC packet currently being assembled across cc triplets.
    dtvcc: Vec<u8>,
    cur_pts_us: i64,
    seen_608: bool,
    seen_708: bool,
}

impl Default for CaptionDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptionDemux {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            services: Vec::new(),
            pending: Vec::new(),
            dtvcc: Vec::new(),
            cur_pts_us: 0,
            seen_608: false,
            seen_708: false,
        }
    }

    pub fn get_stream(&self, id: u32) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        self.streams.iter().collect()
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    /// Feed one caption block; returns a text packet as soon as any service
    /// has accumulated output. Call [`CaptionDemux::poll`] to drain packets
    /// for further services.
    pub fn process(&mut self, block: CaptionBlock) -> Option<DemuxPacket> {
        self.pending.push(block);
        self.pending.sort_by(|a, b| b.pts_us.cmp(&a.pts_us));
        self.decode_pending();
        self.poll()
    }

    /// Next ready text packet, if any.
    pub fn poll(&mut self) -> Option<DemuxPacket> {
        let ready = self.services.iter_mut().find(|s| !s.text.is_empty())?;
        let mut pkt = DemuxPacket::new(
            u32::from(ready.service),
            Bytes::from(std::mem::take(&mut ready.text)),
        );
        pkt.pts_us = Some(ready.pts_us);
        Some(pkt)
    }

    pub fn clear(&mut self) {
        self.streams.clear();
        self.services.clear();
        self.pending.clear();
        self.dtvcc.clear();
        self.seen_608 = false;
        self.seen_708 = false;
    }

    fn decode_pending(&mut self) {
        while let Some(block) = self.pending.pop() {
            self.cur_pts_us = block.pts_us;
            self.decode_block(&block.data);
            if self.services.iter().any(|s| !s.text.is_empty()) {
                break;
            }
        }
    }

    fn decode_block(&mut self, data: &[u8]) {
        for triplet in data.chunks_exact(3) {
            let cc_valid = triplet[0] & 0x04 != 0;
            let cc_type = triplet[0] & 0x03;
            match cc_type {
                // CEA-608 field data.
                0 | 1 => {
                    if cc_valid {
                        self.decode_608(triplet[1], triplet[2]);
                    }
                }
                // DTVCC packet start: flush the previous one first.
                3 => {
                    self.flush_dtvcc();
                    if cc_valid {
                        self.dtvcc.extend_from_slice(&triplet[1..3]);
                    }
                }
                // DTVCC continuation.
                _ => {
                    if cc_valid && !self.dtvcc.is_empty() {
                        self.dtvcc.extend_from_slice(&triplet[1..3]);
                    }
                }
            }
        }
        self.flush_dtvcc();
    }

    fn decode_608(&mut self, b1: u8, b2: u8) {
        // Ignore the 608 fallback once a real 708 service exists.
        if self.seen_708 {
            self.drop_608_fallback();
            return;
        }
        let mut wrote = false;
        for b in [b1 & 0x7F, b2 & 0x7F] {
            if (0x20..0x7F).contains(&b) {
                let pts = self.cur_pts_us;
                self.service_mut(0).text.push(b);
                self.service_mut(0).pts_us = pts;
                wrote = true;
            }
        }
        if wrote {
            self.seen_608 = true;
        }
    }

    /// Parse one assembled DTVCC packet into its service blocks.
    fn flush_dtvcc(&mut self) {
        if self.dtvcc.len() < 2 {
            self.dtvcc.clear();
            return;
        }
        let packet = std::mem::take(&mut self.dtvcc);
        // First byte: sequence number (2 bits) + packet size code.
        let mut pos = 1;
        while pos < packet.len() {
            let header = packet[pos];
            let mut service = (header >> 5) & 0x07;
            let block_size = (header & 0x1F) as usize;
            pos += 1;
            if service == 7 {
                // Extended service number in the next byte.
                if pos >= packet.len() {
                    break;
                }
                service = packet[pos] & 0x3F;
                pos += 1;
            }
            if service == 0 || block_size == 0 {
                break; // null service block pads the packet
            }
            let end = (pos + block_size).min(packet.len());
            let block: Vec<u8> = packet[pos..end].to_vec();
            self.decode_708_block(service, &block);
            pos = end;
        }
    }

    fn decode_708_block(&mut self, service: u8, block: &[u8]) {
        if !self.seen_708 {
            self.seen_708 = true;
            self.drop_608_fallback();
        }
        let mut wrote = false;
        for &b in block {
            // G0 printable range; control codes are ignored here.
            if (0x20..0x7F).contains(&b) {
                let pts = self.cur_pts_us;
                self.service_mut(service).text.push(b);
                self.service_mut(service).pts_us = pts;
                wrote = true;
            }
        }
        if wrote {
            debug!("caption service {} has data", service);
        }
    }

    /// Descriptor + state for a service, created on first sight.
    fn service_mut(&mut self, service: u8) -> &mut ServiceData {
        if let Some(idx) = self.services.iter().position(|s| s.service == service) {
            return &mut self.services[idx];
        }

        let mut stream = StreamDescriptor::new(
            u32::from(service),
            CodecId::Text,
            StreamProperties::Subtitle,
        );
        stream.language = Some("cc".into());
        stream.flags = FLAG_HEARING_IMPAIRED;
        debug!("discovered caption service {}", service);
        self.streams.push(stream);

        let idx = self.services.len();
        self.services.push(ServiceData {
            service,
            pts_us: self.cur_pts_us,
            text: Vec::new(),
        });
        &mut self.services[idx]
    }

    /// Remove the 608 fallback stream once 708 data is live.
    fn drop_608_fallback(&mut self) {
        if !self.seen_608 {
            return;
        }
        self.streams.retain(|s| s.id != 0);
        self.services.retain(|s| s.service != 0);
        self.seen_608 = false;
    }
}

// ============================================================================
// Tests
// ============================================================================

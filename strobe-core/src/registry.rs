//! Stream descriptor registry.
//!
//! Sole owner of per-stream state: one entry per elementary stream id, each
//! holding the currently believed descriptor plus the parser context used to
//! refine it. Rebuilt atomically from the transport layer's announcements;
//! entries whose id and codec are unchanged keep their learned fields.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::negotiate;
use crate::packet::DemuxPacket;
use crate::parser::{ParserAdapter, ParserFactory};
use crate::stream::{StreamDescriptor, StreamKind, StreamProperties};

/// One registry entry: the believed descriptor plus its owned parser context.
pub struct ClientStream {
    pub desc: StreamDescriptor,
    pub(crate) parser: Option<ParserAdapter>,
}

pub struct StreamRegistry {
    entries: HashMap<u32, ClientStream>,
    factory: Box<dyn ParserFactory>,
}

impl StreamRegistry {
    pub fn new(factory: Box<dyn ParserFactory>) -> Self {
        Self {
            entries: HashMap::new(),
            factory,
        }
    }

    /// Rebuild the stream map from a full announcement.
    ///
    /// The rebuild is atomic from the caller's point of view: lookups never
    /// observe a partially applied announcement. A malformed descriptor
    /// resets the registry entirely rather than admitting partial state.
    pub fn request_streams(&mut self, announced: &[StreamDescriptor]) {
        let mut old = std::mem::take(&mut self.entries);
        let mut fresh = HashMap::new();

        for source in announced {
            let current = old.remove(&source.id);
            match Self::apply_announcement(&*self.factory, current, source, false) {
                Some(entry) => {
                    fresh.insert(source.id, entry);
                }
                None => {
                    // Already logged; drop everything.
                    return;
                }
            }
        }

        self.entries = fresh;
    }

    /// Re-apply a single announcement with a forced re-init of the parser
    /// context. Used when the transport re-opens a stream and may have
    /// changed its parameters.
    pub fn force_stream_props(&mut self, source: &StreamDescriptor) {
        let current = self.entries.remove(&source.id);
        if let Some(entry) = Self::apply_announcement(&*self.factory, current, source, true) {
            self.entries.insert(source.id, entry);
        }
    }

    /// Merge one announced descriptor into an (optional) existing entry.
    ///
    /// Returns `None` only for malformed announcements, in which case the
    /// caller must discard the whole map.
    fn apply_announcement(
        factory: &dyn ParserFactory,
        current: Option<ClientStream>,
        source: &StreamDescriptor,
        force_init: bool,
    ) -> Option<ClientStream> {
        if source.is_malformed() {
            error!(
                "request_streams: invalid {:?} stream with id {}",
                source.kind, source.id
            );
            return None;
        }

        let had_entry;
        let mut entry = match current {
            Some(existing) if !force_init && existing.desc.codec == source.codec => {
                had_entry = true;
                existing
            }
            _ => {
                // Fresh entry: new parser context (complete-frame input, split
                // armed), kind-specific fields seeded from the announcement.
                had_entry = false;
                let mut desc =
                    StreamDescriptor::new(source.id, source.codec, source.props.clone());
                desc.changes = 0;
                ClientStream {
                    desc,
                    parser: factory.create(source.codec).map(ParserAdapter::new),
                }
            }
        };
        let desc = &mut entry.desc;

        // Forwardable fields are refreshed on every announcement; learned
        // kind-specific fields are kept on the reuse path.
        match (&mut desc.props, &source.props) {
            (StreamProperties::Audio(dst), StreamProperties::Audio(src)) => {
                dst.block_align = src.block_align;
                dst.bits_per_sample = src.bits_per_sample;
            }
            (StreamProperties::Video(dst), StreamProperties::Video(src)) => {
                dst.color = src.color;
                dst.hdr = src.hdr;
            }
            _ => {}
        }

        match desc.kind {
            StreamKind::Audio | StreamKind::Video => {
                desc.bit_rate = source.bit_rate;
                if let Some(extradata) = source.extradata.as_ref().filter(|e| !e.is_empty()) {
                    desc.extradata = Some(extradata.clone());
                }
            }
            StreamKind::Subtitle => {
                // Only a 4-byte palette block is meaningful here.
                if let Some(extradata) = source.extradata.as_ref().filter(|e| e.len() == 4) {
                    desc.extradata = Some(extradata.clone());
                }
            }
            _ => {}
        }

        // Only take announced profile/level for new streams (or codecs with
        // no embedded configuration); existing streams may have been
        // corrected by packet negotiation.
        if !had_entry || !source.codec.has_extradata() {
            desc.profile = source.profile;
            desc.level = source.level;
        }

        desc.id = source.id;
        desc.codec = source.codec;
        desc.codec_name = source.codec_name.clone();
        desc.fourcc = source.fourcc;
        desc.flags = source.flags;
        desc.crypto_session = source.crypto_session.clone();
        desc.external_interfaces = source.external_interfaces;
        desc.language = source.language.clone();
        desc.name = source.name.clone();

        debug!(
            "request_streams: added/updated stream {} with codec {:?}",
            desc.id, desc.codec
        );
        Some(entry)
    }

    /// Run property negotiation for one packet. Returns whether anything
    /// interesting changed.
    pub fn negotiate_packet(&mut self, pkt: &DemuxPacket) -> bool {
        let Self { entries, factory } = self;
        let Some(id) = pkt.stream_id.stream() else {
            return false;
        };
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        negotiate::negotiate(entry, &**factory, pkt)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&StreamDescriptor> {
        self.entries.get(&id).map(|e| &e.desc)
    }

    pub(crate) fn get_entry_mut(&mut self, id: u32) -> Option<&mut ClientStream> {
        self.entries.get_mut(&id)
    }

    /// Descriptors sorted by id for stable iteration.
    pub fn list(&self) -> Vec<&StreamDescriptor> {
        let mut streams: Vec<&StreamDescriptor> = self.entries.values().map(|e| &e.desc).collect();
        streams.sort_by_key(|d| d.id);
        streams
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries, releasing every owned parser context.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

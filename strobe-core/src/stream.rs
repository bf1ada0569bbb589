//! Stream descriptors: per-elementary-stream metadata as announced by the
//! transport layer and refined by packet property negotiation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::CodecId;

/// Profile/level value meaning "not yet known".
pub const UNKNOWN_TIER: i32 = -99;

/// Sentinel for [`StreamDescriptor::changes`]: stop learning properties for
/// this stream.
pub const CHANGES_FROZEN: i32 = -1;

// Stream flag bits (transport-defined).
pub const FLAG_DEFAULT: u32 = 0x0001;
pub const FLAG_FORCED: u32 = 0x0002;
pub const FLAG_HEARING_IMPAIRED: u32 = 0x0004;
pub const FLAG_VISUAL_IMPAIRED: u32 = 0x0008;

// ============================================================================
// Kind-specific properties
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Teletext,
    RadioData,
    Id3,
    Generic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorInfo {
    pub primaries: Option<u8>,
    pub range: Option<u8>,
    pub transfer_characteristics: Option<u8>,
    pub matrix_coefficients: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HdrInfo {
    pub max_cll: Option<u32>,
    pub max_fall: Option<u32>,
    /// Mastering display luminance, (min, max) in 0.0001 cd/m2 units.
    pub mastering_luminance: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub width: u32,
    pub height: u32,
    /// Display aspect ratio, 0.0 when unknown.
    pub aspect: f64,
    pub fps_rate: u32,
    pub fps_scale: u32,
    pub color: ColorInfo,
    pub hdr: Option<HdrInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioProperties {
    pub channels: u32,
    pub sample_rate: u32,
    pub block_align: u32,
    pub bits_per_sample: u32,
}

/// Kind-tagged property set; each variant carries only its relevant fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamProperties {
    Video(VideoProperties),
    Audio(AudioProperties),
    Subtitle,
    Teletext,
    RadioData,
    Id3,
    Generic,
}

impl StreamProperties {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamProperties::Video(_) => StreamKind::Video,
            StreamProperties::Audio(_) => StreamKind::Audio,
            StreamProperties::Subtitle => StreamKind::Subtitle,
            StreamProperties::Teletext => StreamKind::Teletext,
            StreamProperties::RadioData => StreamKind::RadioData,
            StreamProperties::Id3 => StreamKind::Id3,
            StreamProperties::Generic => StreamKind::Generic,
        }
    }

    pub fn video(&self) -> Option<&VideoProperties> {
        match self {
            StreamProperties::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioProperties> {
        match self {
            StreamProperties::Audio(a) => Some(a),
            _ => None,
        }
    }
}

impl Default for StreamProperties {
    fn default() -> Self {
        StreamProperties::Generic
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// DRM session info forwarded opaquely from the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CryptoSession {
    pub key_system: u16,
    pub session_id: Vec<u8>,
}

/// One elementary stream, identified by a process-unique integer id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: u32,
    /// Kind as announced by the transport. Must match the `props` variant;
    /// a mismatch is a malformed announcement and resets the registry.
    pub kind: StreamKind,
    pub codec: CodecId,
    pub codec_name: String,
    pub fourcc: Option<[u8; 4]>,
    pub props: StreamProperties,
    pub profile: i32,
    pub level: i32,
    #[serde(skip)]
    pub extradata: Option<Bytes>,
    /// Counts interesting property divergences; `-1` freezes learning.
    pub changes: i32,
    pub disabled: bool,
    pub bit_rate: u32,
    pub flags: u32,
    pub language: Option<String>,
    pub name: Option<String>,
    pub crypto_session: Option<CryptoSession>,
    /// External-interface capability mask, forwarded verbatim.
    pub external_interfaces: u32,
}

impl Default for StreamKind {
    fn default() -> Self {
        StreamKind::Generic
    }
}

impl StreamDescriptor {
    pub fn new(id: u32, codec: CodecId, props: StreamProperties) -> Self {
        Self {
            id,
            kind: props.kind(),
            codec,
            props,
            profile: UNKNOWN_TIER,
            level: UNKNOWN_TIER,
            ..Default::default()
        }
    }

    /// True when the announced kind tag and the property variant disagree.
    pub fn is_malformed(&self) -> bool {
        self.kind != self.props.kind()
    }

    pub fn is_frozen(&self) -> bool {
        self.changes == CHANGES_FROZEN
    }

    pub fn freeze(&mut self) {
        self.changes = CHANGES_FROZEN;
    }

    /// Record one interesting divergence.
    pub fn bump_changes(&mut self) {
        if self.changes >= 0 {
            self.changes += 1;
        }
        self.disabled = false;
    }
}

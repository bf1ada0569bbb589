//! Codec identifiers shared between the transport layer and the decoder stage.

use serde::{Deserialize, Serialize};

/// Codecs the client demux knows how to describe.
///
/// The transport layer may announce codecs outside this set; they are carried
/// as `Unknown` and simply never get property learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    // Video
    H264,
    Hevc,
    Mpeg2Video,
    Vp8,
    Vp9,
    Av1,
    // Audio
    Aac,
    Ac3,
    Eac3,
    Mp2,
    Dts,
    // Subtitle / data
    Text,
    DvbSubtitle,
    Teletext,
    Unknown,
}

impl Default for CodecId {
    fn default() -> Self {
        CodecId::Unknown
    }
}

impl CodecId {
    /// Map a four-character-code hint to a codec id.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"avc1" | b"h264" | b"H264" => Some(CodecId::H264),
            b"hvc1" | b"hev1" | b"h265" | b"H265" => Some(CodecId::Hevc),
            b"mp2v" | b"MPG2" => Some(CodecId::Mpeg2Video),
            b"vp08" | b"VP8 " => Some(CodecId::Vp8),
            b"vp09" | b"VP9 " => Some(CodecId::Vp9),
            b"av01" | b"AV1 " => Some(CodecId::Av1),
            b"mp4a" | b"AAC " => Some(CodecId::Aac),
            b"ac-3" | b"AC3 " => Some(CodecId::Ac3),
            b"ec-3" | b"EAC3" => Some(CodecId::Eac3),
            b"mp2a" | b"MP2 " => Some(CodecId::Mp2),
            b"dts " | b"DTS " => Some(CodecId::Dts),
            _ => None,
        }
    }

    /// Short name handed to decoder selection, empty for codecs without one.
    pub fn short_name(&self) -> &'static str {
        match self {
            CodecId::H264 => "h264",
            CodecId::Hevc => "hevc",
            CodecId::Mpeg2Video => "mpeg2video",
            CodecId::Vp8 => "vp8",
            CodecId::Vp9 => "vp9",
            CodecId::Av1 => "av1",
            CodecId::Aac => "aac",
            CodecId::Ac3 => "ac3",
            CodecId::Eac3 => "eac3",
            CodecId::Mp2 => "mp2",
            CodecId::Dts => "dca",
            CodecId::Text | CodecId::DvbSubtitle | CodecId::Teletext | CodecId::Unknown => "",
        }
    }

    /// Whether decoding this codec needs out-of-band configuration bytes.
    ///
    /// VP9 carries everything in-band, so the read loop never has to gate
    /// packet emission on extradata for it.
    pub fn has_extradata(&self) -> bool {
        !matches!(self, CodecId::Vp9)
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            CodecId::H264
                | CodecId::Hevc
                | CodecId::Mpeg2Video
                | CodecId::Vp8
                | CodecId::Vp9
                | CodecId::Av1
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            CodecId::Aac | CodecId::Ac3 | CodecId::Eac3 | CodecId::Mp2 | CodecId::Dts
        )
    }
}

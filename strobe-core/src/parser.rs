//! Bitstream parser adapter.
//!
//! Wraps per-codec frame parsers behind a trait seam so the registry can own
//! one parser context per stream and the negotiator can stay codec-agnostic.
//! The built-in backend covers H.264 (Annex B) and AAC (ADTS); codecs without
//! a parser simply never get property learning.

use bytes::Bytes;
use thiserror::Error;

use crate::bitstream::BitReader;
use crate::codec::CodecId;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("truncated header")]
    Truncated,
    #[error("bad sync/start code")]
    BadSync,
    #[error("unsupported header layout: {0}")]
    Unsupported(&'static str),
}

// ============================================================================
// Parsed fields
// ============================================================================

/// Structural fields a parser can report for the frame(s) in one packet.
///
/// `None` means "not observed"; an absent or zero observation never
/// overwrites a previously learned value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedFields {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect: Option<f64>,
    pub fps_rate: Option<u32>,
    pub fps_scale: Option<u32>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub profile: Option<i32>,
    pub level: Option<i32>,
}

// ============================================================================
// Traits
// ============================================================================

/// Per-stream incremental frame parser. Fed exactly one packet per call;
/// state is retained across packets.
pub trait PacketParser {
    /// Parse one packet's bytes. Returns the number of bytes consumed on
    /// success; fields are then read from [`PacketParser::fields`]. On error
    /// the caller discards the observation and retries on the next packet
    /// without resetting the parser.
    fn parse(
        &mut self,
        data: &[u8],
        pts_us: Option<i64>,
        dts_us: Option<i64>,
    ) -> Result<usize, ParseError>;

    /// Fields as of the last successful parse.
    fn fields(&self) -> ParsedFields;

    /// Whether this codec embeds its global configuration in-band so that
    /// [`PacketParser::split_extradata`] is worth attempting.
    fn wants_split_extradata(&self) -> bool {
        false
    }

    /// Extract the codec-global configuration blob from a packet, if the
    /// packet carries one. Run once per stream until it succeeds.
    fn split_extradata(&mut self, _data: &[u8]) -> Option<Bytes> {
        None
    }
}

/// Creates parser contexts and runs one-shot probes.
pub trait ParserFactory {
    /// `None` when no parser exists for the codec; the stream then never
    /// gets property learning.
    fn create(&self, codec: CodecId) -> Option<Box<dyn PacketParser>>;

    /// One-shot probe run right after extradata capture: opens a transient
    /// context, feeds it this single packet and closes it before returning,
    /// so context-derived fields (profile, channel layout) are available
    /// immediately instead of only after the next packet.
    fn probe(&self, codec: CodecId, extradata: &[u8], packet: &[u8]) -> Option<ParsedFields>;
}

// ============================================================================
// Adapter
// ============================================================================

/// One parser context bound to a stream descriptor. Created when the stream
/// is announced (or its codec changes), dropped with the registry entry.
pub struct ParserAdapter {
    parser: Box<dyn PacketParser>,
    /// Extradata split still pending for this stream.
    split_pending: bool,
}

impl ParserAdapter {
    /// New adapter assuming complete-frame input, with the extradata split
    /// armed.
    pub fn new(parser: Box<dyn PacketParser>) -> Self {
        Self {
            parser,
            split_pending: true,
        }
    }

    pub fn split_pending(&self) -> bool {
        self.split_pending && self.parser.wants_split_extradata()
    }

    pub fn split_extradata(&mut self, data: &[u8]) -> Option<Bytes> {
        let extradata = self.parser.split_extradata(data)?;
        self.split_pending = false;
        Some(extradata)
    }

    pub fn parse(
        &mut self,
        data: &[u8],
        pts_us: Option<i64>,
        dts_us: Option<i64>,
    ) -> Result<ParsedFields, ParseError> {
        self.parser.parse(data, pts_us, dts_us)?;
        Ok(self.parser.fields())
    }
}

/// Built-in backend: H.264 Annex B and ADTS AAC.
#[derive(Debug, Default)]
pub struct NativeParserFactory;

impl ParserFactory for NativeParserFactory {
    fn create(&self, codec: CodecId) -> Option<Box<dyn PacketParser>> {
        match codec {
            CodecId::H264 => Some(Box::new(H264Parser::default())),
            CodecId::Aac => Some(Box::new(AdtsParser::default())),
            _ => None,
        }
    }

    fn probe(&self, codec: CodecId, _extradata: &[u8], packet: &[u8]) -> Option<ParsedFields> {
        // Transient context: created, fed one packet, dropped on return.
        let mut parser = self.create(codec)?;
        parser.parse(packet, None, None).ok()?;
        Some(parser.fields())
    }
}

// ============================================================================
// H.264 Annex B parser
// ============================================================================

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

// Sample aspect ratios by aspect_ratio_idc (Table E-1).
const H264_SAR: [(u32, u32); 17] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

#[derive(Default)]
pub struct H264Parser {
    fields: ParsedFields,
}

impl H264Parser {
    fn parse_sps(&mut self, rbsp: &[u8]) -> Result<(), ParseError> {
        let mut br = BitReader::new(rbsp);

        let profile_idc = br.read_bits(8);
        br.skip_bits(8); // constraint flags + reserved
        let level_idc = br.read_bits(8);
        br.read_golomb_ue(); // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
        ) {
            chroma_format_idc = br.read_golomb_ue();
            if chroma_format_idc == 3 {
                br.skip_bits(1); // separate_colour_plane_flag
            }
            br.read_golomb_ue(); // bit_depth_luma_minus8
            br.read_golomb_ue(); // bit_depth_chroma_minus8
            br.skip_bits(1); // qpprime_y_zero_transform_bypass_flag
            if br.read_bits(1) != 0 {
                // seq_scaling_matrix_present_flag
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if br.read_bits(1) != 0 {
                        skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 });
                    }
                }
            }
        }

        br.read_golomb_ue(); // log2_max_frame_num_minus4
        let pic_order_cnt_type = br.read_golomb_ue();
        if pic_order_cnt_type == 0 {
            br.read_golomb_ue(); // log2_max_pic_order_cnt_lsb_minus4
        } else if pic_order_cnt_type == 1 {
            br.skip_bits(1); // delta_pic_order_always_zero_flag
            br.read_golomb_se();
            br.read_golomb_se();
            let cycles = br.read_golomb_ue();
            for _ in 0..cycles {
                br.read_golomb_se();
            }
        }
        br.read_golomb_ue(); // max_num_ref_frames
        br.skip_bits(1); // gaps_in_frame_num_value_allowed_flag

        let pic_width_in_mbs = br.read_golomb_ue() + 1;
        let pic_height_in_map_units = br.read_golomb_ue() + 1;
        let frame_mbs_only = br.read_bits(1);
        if frame_mbs_only == 0 {
            br.skip_bits(1); // mb_adaptive_frame_field_flag
        }
        br.skip_bits(1); // direct_8x8_inference_flag

        let mut width = pic_width_in_mbs * 16;
        let mut height = (2 - frame_mbs_only) * pic_height_in_map_units * 16;

        if br.read_bits(1) != 0 {
            // frame_cropping_flag
            let crop_left = br.read_golomb_ue();
            let crop_right = br.read_golomb_ue();
            let crop_top = br.read_golomb_ue();
            let crop_bottom = br.read_golomb_ue();
            let (sub_w, sub_h) = match chroma_format_idc {
                0 => (1, 1),
                1 => (2, 2),
                2 => (2, 1),
                _ => (1, 1),
            };
            let unit_y = sub_h * (2 - frame_mbs_only);
            width = width.saturating_sub((crop_left + crop_right) * sub_w);
            height = height.saturating_sub((crop_top + crop_bottom) * unit_y);
        }

        let mut sar = (1u32, 1u32);
        let mut fps: Option<(u32, u32)> = None;
        if br.read_bits(1) != 0 {
            // vui_parameters_present_flag
            if br.read_bits(1) != 0 {
                // aspect_ratio_info_present_flag
                let idc = br.read_bits(8) as usize;
                if idc == 255 {
                    sar = (br.read_bits(16), br.read_bits(16));
                } else if idc < H264_SAR.len() {
                    sar = H264_SAR[idc];
                }
            }
            if br.read_bits(1) != 0 {
                br.skip_bits(1); // overscan_appropriate_flag
            }
            if br.read_bits(1) != 0 {
                // video_signal_type_present_flag
                br.skip_bits(4); // video_format + video_full_range_flag
                if br.read_bits(1) != 0 {
                    br.skip_bits(24); // colour description
                }
            }
            if br.read_bits(1) != 0 {
                // chroma_loc_info_present_flag
                br.read_golomb_ue();
                br.read_golomb_ue();
            }
            if br.read_bits(1) != 0 {
                // timing_info_present_flag
                let num_units_in_tick = br.read_bits(32);
                let time_scale = br.read_bits(32);
                if num_units_in_tick > 0 && time_scale > 0 {
                    // Field-based tick: two ticks per frame. A tick count
                    // too large to double is garbage; drop the rate.
                    if let Some(scale) = num_units_in_tick.checked_mul(2) {
                        fps = Some((time_scale, scale));
                    }
                }
            }
        }

        if br.has_error() {
            return Err(ParseError::Truncated);
        }

        self.fields.profile = Some(profile_idc as i32);
        self.fields.level = Some(level_idc as i32);
        self.fields.width = Some(width);
        self.fields.height = Some(height);
        if sar.0 != 0 && height != 0 {
            self.fields.aspect =
                Some((sar.0 as f64 / sar.1 as f64) * (width as f64 / height as f64));
        }
        if let Some((rate, scale)) = fps {
            self.fields.fps_rate = Some(rate);
            self.fields.fps_scale = Some(scale);
        }
        Ok(())
    }
}

fn skip_scaling_list(br: &mut BitReader<'_>, size: u32) {
    // Wide intermediates: a crafted se() delta spans the whole i32 range.
    let mut last_scale = 8i64;
    let mut next_scale = 8i64;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = i64::from(br.read_golomb_se());
            next_scale = (last_scale + delta).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}

/// Iterate Annex B NAL units as `(nal_type, payload)` slices.
fn annexb_nals(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut nals = Vec::new();
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    for (n, &start) in starts.iter().enumerate() {
        let end = if n + 1 < starts.len() {
            // Back up over the next start code (3 or 4 bytes).
            let next = starts[n + 1];
            if next >= 4 && data[next - 4] == 0 {
                next - 4
            } else {
                next - 3
            }
        } else {
            data.len()
        };
        if start < end {
            let nal_type = data[start] & 0x1F;
            nals.push((nal_type, &data[start..end]));
        }
    }
    nals
}

/// Strip emulation-prevention bytes (00 00 03 -> 00 00) from a NAL payload.
fn strip_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &b in nal {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

impl PacketParser for H264Parser {
    fn parse(
        &mut self,
        data: &[u8],
        _pts_us: Option<i64>,
        _dts_us: Option<i64>,
    ) -> Result<usize, ParseError> {
        let nals = annexb_nals(data);
        if nals.is_empty() {
            return Err(ParseError::BadSync);
        }
        for (nal_type, nal) in &nals {
            if *nal_type == NAL_SPS {
                let rbsp = strip_emulation_prevention(&nal[1..]);
                self.parse_sps(&rbsp)?;
            }
        }
        Ok(data.len())
    }

    fn fields(&self) -> ParsedFields {
        self.fields
    }

    fn wants_split_extradata(&self) -> bool {
        true
    }

    fn split_extradata(&mut self, data: &[u8]) -> Option<Bytes> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for (nal_type, nal) in annexb_nals(data) {
            match nal_type {
                NAL_SPS => sps.push(nal),
                NAL_PPS => pps.push(nal),
                _ => {}
            }
        }
        if sps.is_empty() || pps.is_empty() {
            return None;
        }
        let mut out = Vec::new();
        for nal in sps.into_iter().chain(pps) {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        Some(Bytes::from(out))
    }
}

// ============================================================================
// ADTS AAC parser
// ============================================================================

const ADTS_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Default)]
pub struct AdtsParser {
    fields: ParsedFields,
    /// Raw header values for the AudioSpecificConfig synthesized by
    /// `split_extradata`.
    header: Option<(u32, u32, u32)>, // (object_type, freq_index, channel_config)
}

impl PacketParser for AdtsParser {
    fn parse(
        &mut self,
        data: &[u8],
        _pts_us: Option<i64>,
        _dts_us: Option<i64>,
    ) -> Result<usize, ParseError> {
        if data.len() < 7 {
            return Err(ParseError::Truncated);
        }
        if data[0] != 0xFF || (data[1] & 0xF6) != 0xF0 {
            return Err(ParseError::BadSync);
        }
        let object_type = ((data[2] >> 6) & 0x03) as u32 + 1;
        let freq_index = ((data[2] >> 2) & 0x0F) as usize;
        let channel_config = (((data[2] & 0x01) as u32) << 2) | ((data[3] >> 6) & 0x03) as u32;
        if freq_index >= ADTS_SAMPLE_RATES.len() {
            return Err(ParseError::Unsupported("reserved sampling frequency index"));
        }

        self.fields.profile = Some(object_type as i32);
        self.fields.sample_rate = Some(ADTS_SAMPLE_RATES[freq_index]);
        if channel_config != 0 {
            self.fields.channels = Some(channel_config);
        }
        self.header = Some((object_type, freq_index as u32, channel_config));
        Ok(data.len())
    }

    fn fields(&self) -> ParsedFields {
        self.fields
    }

    fn wants_split_extradata(&self) -> bool {
        true
    }

    /// Synthesize a two-byte AudioSpecificConfig from the last ADTS header.
    fn split_extradata(&mut self, data: &[u8]) -> Option<Bytes> {
        if self.header.is_none() {
            // Not parsed yet; peek at this packet.
            self.parse(data, None, None).ok()?;
        }
        let (object_type, freq_index, channel_config) = self.header?;
        if channel_config == 0 {
            // Channel layout lives in-band (PCE); nothing useful to split.
            return None;
        }
        let asc = ((object_type & 0x1F) << 11)
            | ((freq_index & 0x0F) << 7)
            | ((channel_config & 0x0F) << 3);
        Some(Bytes::from(vec![(asc >> 8) as u8, (asc & 0xFF) as u8]))
    }
}

// ============================================================================
// Tests
// ============================================================================

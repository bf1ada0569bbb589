//! Packet property negotiation.
//!
//! Per-packet enrichment of a stream's believed properties: feed the packet
//! to the stream's parser, compare what it reports against the descriptor,
//! and record divergences. A zero/unknown observation never overwrites a
//! known value, so parsers that intermittently miss a field cannot make the
//! belief flap.

use tracing::debug;

use crate::packet::DemuxPacket;
use crate::parser::{ParsedFields, ParserFactory};
use crate::registry::ClientStream;
use crate::stream::{StreamDescriptor, StreamProperties};

/// Consume one packet for a known stream. Returns whether any interesting
/// property changed in this call.
pub(crate) fn negotiate(
    entry: &mut ClientStream,
    factory: &dyn ParserFactory,
    pkt: &DemuxPacket,
) -> bool {
    let ClientStream { desc, parser } = entry;

    // Cheap path: frozen streams, streams with captured extradata and codecs
    // with no out-of-band configuration need no further learning. Most
    // packets take this path once the stream has stabilized.
    if desc.is_frozen() || desc.extradata.is_some() || !desc.codec.has_extradata() {
        return false;
    }
    let Some(parser) = parser.as_mut() else {
        return false;
    };

    let mut change = false;

    if parser.split_pending() {
        if let Some(extradata) = parser.split_extradata(&pkt.data) {
            debug!(
                "negotiate: ({}) split extradata, {} bytes",
                desc.id,
                extradata.len()
            );
            desc.extradata = Some(extradata.clone());
            desc.bump_changes();
            change = true;

            // One-shot probe so context-derived fields (profile, channel
            // layout) become available now rather than on the next packet.
            if let Some(fields) = factory.probe(desc.codec, &extradata, &pkt.data) {
                change |= apply_fields(desc, &fields);
            }
        }
    }

    match parser.parse(&pkt.data, pkt.pts_us, pkt.dts_us) {
        Ok(fields) => change |= apply_fields(desc, &fields),
        // Non-fatal: discard the observation, retry on the next packet
        // without resetting the parser.
        Err(err) => debug!("negotiate: ({}) parser returned error: {}", desc.id, err),
    }

    change
}

/// Merge parser observations into the descriptor, counting divergences.
fn apply_fields(desc: &mut StreamDescriptor, fields: &ParsedFields) -> bool {
    let mut changed = false;
    let id = desc.id;

    if let Some(profile) = fields.profile {
        if profile != desc.profile {
            debug!(
                "negotiate: ({}) profile changed from {} to {}",
                id, desc.profile, profile
            );
            desc.profile = profile;
            changed = true;
        }
    }
    if let Some(level) = fields.level {
        if level != desc.level {
            debug!(
                "negotiate: ({}) level changed from {} to {}",
                id, desc.level, level
            );
            desc.level = level;
            changed = true;
        }
    }

    let mut freeze = false;
    match &mut desc.props {
        StreamProperties::Audio(audio) => {
            if let Some(channels) = fields.channels.filter(|&c| c != 0) {
                if channels != audio.channels {
                    debug!(
                        "negotiate: ({}) channels changed from {} to {}",
                        id, audio.channels, channels
                    );
                    audio.channels = channels;
                    changed = true;
                }
                // Channel layout is assumed stable once observed; freezing
                // bounds the steady-state parsing cost.
                freeze = true;
            }
            if let Some(rate) = fields.sample_rate.filter(|&r| r != 0) {
                if rate != audio.sample_rate {
                    debug!(
                        "negotiate: ({}) samplerate changed from {} to {}",
                        id, audio.sample_rate, rate
                    );
                    audio.sample_rate = rate;
                    changed = true;
                }
            }
        }
        StreamProperties::Video(video) => {
            if let Some(width) = fields.width.filter(|&w| w != 0) {
                if width != video.width {
                    debug!(
                        "negotiate: ({}) width changed from {} to {}",
                        id, video.width, width
                    );
                    video.width = width;
                    changed = true;
                }
            }
            if let Some(height) = fields.height.filter(|&h| h != 0) {
                if height != video.height {
                    debug!(
                        "negotiate: ({}) height changed from {} to {}",
                        id, video.height, height
                    );
                    video.height = height;
                    changed = true;
                }
            }
            if let Some(aspect) = fields.aspect.filter(|&a| a >= 0.001) {
                if (aspect - video.aspect).abs() > 0.001 {
                    debug!(
                        "negotiate: ({}) aspect changed from {} to {}",
                        id, video.aspect, aspect
                    );
                    video.aspect = aspect;
                    changed = true;
                }
            }
            if let (Some(rate), Some(scale)) = (fields.fps_rate, fields.fps_scale) {
                if rate != 0 && (video.fps_rate != rate || video.fps_scale != scale) {
                    debug!(
                        "negotiate: ({}) fps changed from {}/{} to {}/{}",
                        id, video.fps_rate, video.fps_scale, rate, scale
                    );
                    video.fps_rate = rate;
                    video.fps_scale = scale;
                    changed = true;
                }
            }
        }
        _ => {}
    }

    if changed {
        desc.bump_changes();
    }
    if freeze {
        desc.freeze();
    }
    changed
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::parser::ParserAdapter;
    use crate::stream::{AudioProperties, VideoProperties, CHANGES_FROZEN};
    use crate::testutil::{ScriptedFactory, ScriptedParser};
    use bytes::Bytes;

    fn video_entry(script: ScriptedParser) -> ClientStream {
        ClientStream {
            desc: StreamDescriptor::new(
                1,
                CodecId::H264,
                StreamProperties::Video(VideoProperties::default()),
            ),
            parser: Some(ParserAdapter::new(Box::new(script))),
        }
    }

    fn audio_entry(script: ScriptedParser) -> ClientStream {
        ClientStream {
            desc: StreamDescriptor::new(
                2,
                CodecId::Aac,
                StreamProperties::Audio(AudioProperties::default()),
            ),
            parser: Some(ParserAdapter::new(Box::new(script))),
        }
    }

    fn pkt(data: &[u8]) -> DemuxPacket {
        DemuxPacket::new(1, Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_scenario_a_change_on_second_packet() {
        // Three packets; the second is the first to reveal 1280x720.
        let script = ScriptedParser::with_script(vec![
            Some(ParsedFields::default()),
            Some(ParsedFields {
                width: Some(1280),
                height: Some(720),
                ..Default::default()
            }),
            Some(ParsedFields {
                width: Some(1280),
                height: Some(720),
                ..Default::default()
            }),
        ]);
        let mut entry = video_entry(script);
        let factory = ScriptedFactory::default();

        assert!(!negotiate(&mut entry, &factory, &pkt(b"p1")));
        assert_eq!(entry.desc.changes, 0);

        assert!(negotiate(&mut entry, &factory, &pkt(b"p2")));
        // width and height both diverged, but one call counts once.
        assert_eq!(entry.desc.changes, 1);
        let video = entry.desc.props.video().unwrap().clone();
        assert_eq!((video.width, video.height), (1280, 720));

        assert!(!negotiate(&mut entry, &factory, &pkt(b"p3")));
        assert_eq!(entry.desc.changes, 1);
    }

    #[test]
    fn test_no_regression_to_unknown() {
        // P2: a later zero/absent observation keeps the learned value.
        let script = ScriptedParser::with_script(vec![
            Some(ParsedFields {
                width: Some(1920),
                height: Some(1080),
                ..Default::default()
            }),
            Some(ParsedFields {
                width: Some(0),
                height: None,
                ..Default::default()
            }),
        ]);
        let mut entry = video_entry(script);
        let factory = ScriptedFactory::default();

        assert!(negotiate(&mut entry, &factory, &pkt(b"p1")));
        assert!(!negotiate(&mut entry, &factory, &pkt(b"p2")));
        let video = entry.desc.props.video().unwrap();
        assert_eq!((video.width, video.height), (1920, 1080));
    }

    #[test]
    fn test_scenario_b_audio_freeze() {
        // Channel counts 2, 2, 6: the first observation freezes the stream,
        // the 6 is never seen.
        let fields = |ch: u32| {
            Some(ParsedFields {
                channels: Some(ch),
                sample_rate: Some(48000),
                ..Default::default()
            })
        };
        let script = ScriptedParser::with_script(vec![fields(2), fields(2), fields(6)]);
        let mut entry = audio_entry(script);
        let factory = ScriptedFactory::default();

        assert!(negotiate(&mut entry, &factory, &pkt(b"p1")));
        assert_eq!(entry.desc.changes, CHANGES_FROZEN);
        let after_first = entry.desc.props.audio().unwrap().clone();
        assert_eq!(after_first.channels, 2);

        // P3: frozen streams never mutate again.
        assert!(!negotiate(&mut entry, &factory, &pkt(b"p2")));
        assert!(!negotiate(&mut entry, &factory, &pkt(b"p3")));
        assert_eq!(entry.desc.props.audio().unwrap().channels, 2);
        assert_eq!(entry.desc.changes, CHANGES_FROZEN);
    }

    #[test]
    fn test_parse_error_is_silent() {
        let script = ScriptedParser::with_script(vec![
            None,
            Some(ParsedFields {
                width: Some(640),
                height: Some(480),
                ..Default::default()
            }),
        ]);
        let mut entry = video_entry(script);
        let factory = ScriptedFactory::default();

        assert!(!negotiate(&mut entry, &factory, &pkt(b"bad")));
        assert_eq!(entry.desc.changes, 0);
        assert!(negotiate(&mut entry, &factory, &pkt(b"good")));
        assert_eq!(entry.desc.props.video().unwrap().width, 640);
    }

    #[test]
    fn test_split_then_probe() {
        // Extradata capture triggers the one-shot probe, and its fields are
        // folded in immediately.
        let mut script = ScriptedParser::with_script(vec![Some(ParsedFields::default())]);
        script.wants_split = true;
        script.split = Some(Bytes::from_static(b"spspps"));
        let mut entry = video_entry(script);
        let factory = ScriptedFactory::with_probe(ParsedFields {
            profile: Some(100),
            level: Some(41),
            ..Default::default()
        });

        assert!(negotiate(&mut entry, &factory, &pkt(b"keyframe")));
        assert_eq!(factory.probe_calls(), 1);
        assert_eq!(entry.desc.extradata.as_deref(), Some(&b"spspps"[..]));
        assert_eq!(entry.desc.profile, 100);
        assert_eq!(entry.desc.level, 41);
        // The split and the probe observation each count once.
        assert_eq!(entry.desc.changes, 2);

        // Captured extradata puts the stream on the cheap path for good.
        assert!(!negotiate(&mut entry, &factory, &pkt(b"next")));
        assert_eq!(factory.probe_calls(), 1);
    }

    #[test]
    fn test_no_parser_means_no_learning() {
        let mut entry = video_entry(ScriptedParser::default());
        entry.parser = None;
        let factory = ScriptedFactory::default();
        assert!(!negotiate(&mut entry, &factory, &pkt(b"data")));
    }

    #[test]
    fn test_inband_codec_skips_learning() {
        let mut entry = video_entry(ScriptedParser::default());
        entry.desc.codec = CodecId::Vp9;
        let factory = ScriptedFactory::default();
        assert!(!negotiate(&mut entry, &factory, &pkt(b"frame")));
    }
}

use bytes::Bytes;

use super::record::{
    AudioEncoding, AudioRecord, MediaRecord, PresentationTime, VideoEncoding, VideoRecord,
};

/// First bytes that mark an H.264 buffer as a keyframe: IDR slices and the
/// SPS/PPS that precede them, with either `nal_ref_idc` seen in the wild.
pub const H264_KEYFRAME_MARKERS: [u8; 4] = [0x65, 0x25, 0x67, 0x68];

/// Negotiated properties of the subsession a buffer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub channels: u32,
    /// RTP timestamp frequency; the sample rate for audio codecs.
    pub clock_rate: u32,
    pub parameter_sets: Option<Bytes>,
}

impl Default for StreamParams {
    fn default() -> Self {
        // G.711 defaults
        Self {
            channels: 1,
            clock_rate: 8000,
            parameter_sets: None,
        }
    }
}

/// Turns one received buffer into a [`MediaRecord`].
///
/// Returns `None` for medium/codec pairings that are not delivered; the
/// caller drops the buffer and keeps pulling.
pub fn classify(
    medium: &str,
    codec: &str,
    data: &[u8],
    presentation_time: PresentationTime,
    params: &StreamParams,
) -> Option<MediaRecord> {
    if medium.eq_ignore_ascii_case("video") {
        classify_video(codec, data, presentation_time, params)
    } else if medium.eq_ignore_ascii_case("audio") {
        classify_audio(codec, presentation_time, params)
    } else {
        None
    }
}

pub fn classify_video(
    codec: &str,
    data: &[u8],
    presentation_time: PresentationTime,
    params: &StreamParams,
) -> Option<MediaRecord> {
    let encoding = video_encoding(codec)?;
    let keyframe = match encoding {
        VideoEncoding::H264 => is_h264_keyframe(data),
        // the container carries its own framing
        VideoEncoding::Mpeg2Ts => false,
    };
    let parameter_sets = match encoding {
        VideoEncoding::H264 => params.parameter_sets.clone(),
        VideoEncoding::Mpeg2Ts => None,
    };

    Some(MediaRecord::Video(VideoRecord {
        encoding,
        keyframe,
        pts: presentation_time.to_90khz(),
        parameter_sets,
    }))
}

pub fn classify_audio(
    codec: &str,
    presentation_time: PresentationTime,
    params: &StreamParams,
) -> Option<MediaRecord> {
    let encoding = audio_encoding(codec)?;
    Some(MediaRecord::Audio(AudioRecord {
        encoding,
        channels: params.channels,
        sample_rate: params.clock_rate,
        pts: presentation_time.to_90khz(),
    }))
}

/// Video codecs that produce records.
pub fn video_encoding(codec: &str) -> Option<VideoEncoding> {
    if codec.eq_ignore_ascii_case("H264") {
        Some(VideoEncoding::H264)
    } else if codec.eq_ignore_ascii_case("MP2T") {
        Some(VideoEncoding::Mpeg2Ts)
    } else {
        None
    }
}

/// Audio codecs that produce records.
pub fn audio_encoding(codec: &str) -> Option<AudioEncoding> {
    if codec.eq_ignore_ascii_case("PCMA") {
        Some(AudioEncoding::Pcma)
    } else if codec.eq_ignore_ascii_case("MPEG4-GENERIC") {
        Some(AudioEncoding::Aac)
    } else {
        None
    }
}

pub fn is_h264_keyframe(data: &[u8]) -> bool {
    data.first()
        .map_or(false, |first| H264_KEYFRAME_MARKERS.contains(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn pt() -> PresentationTime {
        PresentationTime::new(2, 500_000)
    }

    #[test]
    fn test_h264_keyframe_law() {
        let params = StreamParams::default();
        let idr = classify("video", "H264", &[0x65, 0x88, 0x84], pt(), &params).unwrap();
        let slice = classify("video", "H264", &[0x41, 0x9a, 0x02], pt(), &params).unwrap();

        assert!(idr.is_keyframe());
        assert!(!slice.is_keyframe());
        assert_eq!(idr.pts(), 225_000);
    }

    #[test]
    fn test_h264_carries_parameter_sets() {
        let params = StreamParams {
            parameter_sets: Some(Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42])),
            ..StreamParams::default()
        };

        match classify("video", "h264", &[0x67, 0x42], pt(), &params) {
            Some(MediaRecord::Video(video)) => {
                assert_eq!(video.encoding, VideoEncoding::H264);
                assert!(video.keyframe);
                assert_eq!(video.parameter_sets, params.parameter_sets);
            }
            other => panic!("expected video record, got {:?}", other),
        }
    }

    #[test]
    fn test_mpeg_ts_has_no_keyframes() {
        let record = classify("video", "MP2T", &[0x65], pt(), &StreamParams::default()).unwrap();
        assert_eq!(
            record,
            MediaRecord::Video(VideoRecord {
                encoding: VideoEncoding::Mpeg2Ts,
                keyframe: false,
                pts: 225_000,
                parameter_sets: None,
            })
        );
    }

    #[test]
    fn test_audio_reads_stream_params() {
        let params = StreamParams {
            channels: 2,
            clock_rate: 44_100,
            parameter_sets: None,
        };

        let aac = classify("audio", "MPEG4-GENERIC", &[0x21], pt(), &params).unwrap();
        assert_eq!(
            aac,
            MediaRecord::Audio(AudioRecord {
                encoding: AudioEncoding::Aac,
                channels: 2,
                sample_rate: 44_100,
                pts: 225_000,
            })
        );

        let pcma = classify("audio", "PCMA", &[0xd5], pt(), &StreamParams::default()).unwrap();
        assert_eq!(
            pcma,
            MediaRecord::Audio(AudioRecord {
                encoding: AudioEncoding::Pcma,
                channels: 1,
                sample_rate: 8000,
                pts: 225_000,
            })
        );
    }

    #[test]
    fn test_unknown_pairings_are_dropped() {
        let params = StreamParams::default();
        assert_eq!(classify("video", "VP9", &[0x65], pt(), &params), None);
        assert_eq!(classify("audio", "PCMU", &[0xff], pt(), &params), None);
        assert_eq!(classify("application", "H264", &[0x65], pt(), &params), None);
        assert_eq!(classify("video", "H264", &[], pt(), &params).map(|r| r.is_keyframe()), Some(false));
    }

    #[quickcheck]
    fn prop_keyframe_iff_marker(first: u8, rest: Vec<u8>) -> bool {
        let mut data = vec![first];
        data.extend(rest);
        is_h264_keyframe(&data) == [0x65, 0x25, 0x67, 0x68].contains(&first)
    }

    #[quickcheck]
    fn prop_pts_matches_float_formula(secs: u32, micros: u32) -> bool {
        let micros = micros % 1_000_000;
        let pts = PresentationTime::new(secs as i64, micros).to_90khz();
        let exact = secs as i128 * 90_000 + (micros as i128 * 90_000) / 1_000_000;
        pts as i128 == exact
    }
}

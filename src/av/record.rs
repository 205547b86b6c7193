use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock rate of the timestamps carried by [`MediaRecord`]s.
pub const PTS_CLOCK_RATE: i64 = 90_000;

/// Wall-clock presentation time of a frame, split like a `timeval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PresentationTime {
    pub secs: i64,
    pub micros: u32,
}

impl PresentationTime {
    /// Builds a presentation time, carrying whole seconds out of `micros`.
    pub fn new(secs: i64, micros: u32) -> Self {
        Self {
            secs: secs + (micros / 1_000_000) as i64,
            micros: micros % 1_000_000,
        }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::new(since_epoch.as_secs() as i64, since_epoch.subsec_micros())
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Total microseconds since the epoch.
    pub fn as_micros(&self) -> i64 {
        self.secs * 1_000_000 + self.micros as i64
    }

    pub fn from_micros(micros: i64) -> Self {
        Self {
            secs: micros.div_euclid(1_000_000),
            micros: micros.rem_euclid(1_000_000) as u32,
        }
    }

    /// `(secs + micros / 1e6) * 90000`, truncated.
    ///
    /// Evaluated in integers so values like 2.5 s map to exactly 225000.
    pub fn to_90khz(&self) -> i64 {
        self.secs * PTS_CLOCK_RATE + (self.micros as i64 * 9) / 100
    }
}

/// Container or codec of a video record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoEncoding {
    /// One H.264 NAL unit without start code.
    H264,
    /// MPEG transport stream packets.
    Mpeg2Ts,
}

/// Codec of an audio record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEncoding {
    /// G.711 A-law.
    Pcma,
    /// AAC access unit (MPEG4-GENERIC payload).
    Aac,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub encoding: VideoEncoding,
    pub keyframe: bool,
    /// 90 kHz presentation timestamp.
    pub pts: i64,
    /// SPS/PPS announced in the SDP, Annex-B framed (H.264 only).
    pub parameter_sets: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecord {
    pub encoding: AudioEncoding,
    pub channels: u32,
    pub sample_rate: u32,
    /// 90 kHz presentation timestamp.
    pub pts: i64,
}

/// Metadata delivered with every classified frame.
///
/// Built per buffer and only borrowed by the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRecord {
    Video(VideoRecord),
    Audio(AudioRecord),
}

impl MediaRecord {
    pub fn pts(&self) -> i64 {
        match self {
            MediaRecord::Video(video) => video.pts,
            MediaRecord::Audio(audio) => audio.pts,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaRecord::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaRecord::Audio(_))
    }

    /// True for video records flagged as keyframes.
    pub fn is_keyframe(&self) -> bool {
        match self {
            MediaRecord::Video(video) => video.keyframe,
            MediaRecord::Audio(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_time_normalizes() {
        let pt = PresentationTime::new(1, 2_500_000);
        assert_eq!(pt, PresentationTime { secs: 3, micros: 500_000 });
    }

    #[test]
    fn test_90khz_conversion() {
        assert_eq!(PresentationTime::new(2, 500_000).to_90khz(), 225_000);
        assert_eq!(PresentationTime::new(0, 11).to_90khz(), 0);
        assert_eq!(PresentationTime::new(0, 12).to_90khz(), 1);
        assert_eq!(PresentationTime::new(1_700_000_000, 0).to_90khz(), 153_000_000_000_000);
    }

    #[test]
    fn test_micros_round_trip() {
        let pt = PresentationTime::new(12, 345_678);
        assert_eq!(PresentationTime::from_micros(pt.as_micros()), pt);
    }
}

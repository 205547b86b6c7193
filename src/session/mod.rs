//! # Session driving
//!
//! Everything between the URL and the application callback:
//!
//! - [`MediaBackend`]: the asynchronous media library the session runs on
//! - [`SessionDriver`]: the DESCRIBE → SETUP → PLAY handshake and frame pump
//! - [`MediaSink`]: per-subsession frame delivery
//! - the shutdown orchestration shared by every terminal path
//!
//! The driver owns the [`Session`] it builds from the SDP; subsessions are
//! addressed by their index in declaration order.

pub mod backend;
mod context;
mod driver;
mod shutdown;
mod sink;
mod state;

pub use backend::{BackendEvent, CommandError, CommandResult, FrameSource, MediaBackend};
pub use context::{ClientHandle, LifecycleState, SessionContext};
pub use driver::SessionDriver;
pub use shutdown::shutdown_session;
pub use sink::{create_sink, AudioSink, DiscardSink, MediaSink, SharedCallback, VideoSink};
pub use state::HandshakeState;

use std::fmt;
use tokio::time::Instant;

use crate::av::StreamParams;
use crate::codec::h264::{fmtp_parameter, parse_sprop_parameter_sets};
use crate::format::rtsp::{MediaDescription, SessionDescription};
use crate::{LiveError, Result};

/// Application callback: the frame bytes and their metadata, both borrowed
/// for the duration of the call.
pub type FrameCallback = Box<dyn FnMut(&[u8], &crate::av::MediaRecord) + Send>;

/// Range sent with PLAY.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayRange {
    /// `a=range:clock=` times, passed through verbatim.
    Absolute { start: String, end: Option<String> },
    /// Normal play time in seconds; `end <= start` means open-ended.
    Relative { start: f64, end: f64 },
}

impl PlayRange {
    /// Seconds the server will stream for; zero when unknown.
    pub fn duration(&self) -> f64 {
        match self {
            PlayRange::Absolute { .. } => 0.0,
            PlayRange::Relative { start, end } => (end - start).max(0.0),
        }
    }

    /// Value of the `Range` header.
    pub fn to_header(&self) -> String {
        match self {
            PlayRange::Absolute { start, end } => {
                format!("clock={}-{}", start, end.as_deref().unwrap_or(""))
            }
            PlayRange::Relative { start, end } if end > start => {
                format!("npt={:.3}-{:.3}", start, end)
            }
            PlayRange::Relative { start, .. } => format!("npt={:.3}-", start),
        }
    }
}

/// One media substream of the session.
pub struct Subsession {
    pub medium: String,
    pub codec: String,
    pub clock_rate: u32,
    pub channels: u32,
    /// Raw `a=fmtp` value, payload type included.
    pub fmtp: Option<String>,
    /// `a=control` value as declared; relative values resolve against the
    /// backend's base URL.
    pub control: String,
    pub rtcp_muxed: bool,
    /// Negotiated client RTP/RTCP ports.
    pub client_ports: Option<(u16, u16)>,
    /// Present iff the subsession is actively pumping frames.
    pub sink: Option<Box<dyn MediaSink>>,
    pub bye_armed: bool,
}

impl fmt::Debug for Subsession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subsession")
            .field("medium", &self.medium)
            .field("codec", &self.codec)
            .field("clock_rate", &self.clock_rate)
            .field("channels", &self.channels)
            .field("control", &self.control)
            .field("client_ports", &self.client_ports)
            .field("sink", &self.sink.as_ref().map(|s| s.label().to_string()))
            .field("bye_armed", &self.bye_armed)
            .finish()
    }
}

impl Subsession {
    pub fn new(medium: &str, codec: &str) -> Self {
        let defaults = StreamParams::default();
        Self {
            medium: medium.to_string(),
            codec: codec.to_string(),
            clock_rate: defaults.clock_rate,
            channels: defaults.channels,
            fmtp: None,
            control: String::new(),
            rtcp_muxed: false,
            client_ports: None,
            sink: None,
            bye_armed: false,
        }
    }

    pub fn from_media(media: &MediaDescription) -> Self {
        let rtpmap = media.rtpmap();
        let mut sub = Subsession::new(
            &media.media_type,
            rtpmap.as_ref().map_or("", |m| m.encoding.as_str()),
        );
        if let Some(map) = rtpmap {
            sub.clock_rate = map.clock_rate;
            sub.channels = map.channels.unwrap_or(sub.channels);
        }
        sub.fmtp = media.get_attribute("fmtp").map(str::to_string);
        sub.control = media.get_attribute("control").unwrap_or_default().to_string();
        sub.rtcp_muxed = media.attributes.contains_key("rtcp-mux");
        sub
    }

    /// `medium/codec`, as used in log lines.
    pub fn label(&self) -> String {
        format!("{}/{}", self.medium, self.codec)
    }

    pub fn is_audio(&self) -> bool {
        self.medium.eq_ignore_ascii_case("audio")
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    /// Properties the frame classifier reads.
    pub fn stream_params(&self) -> StreamParams {
        let parameter_sets = self
            .codec
            .eq_ignore_ascii_case("H264")
            .then(|| self.fmtp.as_deref())
            .flatten()
            .and_then(|fmtp| fmtp_parameter(fmtp, "sprop-parameter-sets"))
            .and_then(|sprop| parse_sprop_parameter_sets(sprop).ok());

        StreamParams {
            channels: self.channels,
            clock_rate: self.clock_rate,
            parameter_sets,
        }
    }
}

/// The negotiated session: subsessions in SDP order plus play timing.
#[derive(Debug, Default)]
pub struct Session {
    pub subsessions: Vec<Subsession>,
    pub play_start: f64,
    pub play_end: f64,
    pub absolute_start: Option<String>,
    pub absolute_end: Option<String>,
    /// Duration-expiry deadline, armed once PLAY succeeds.
    pub expiry: Option<Instant>,
}

impl Session {
    /// Builds a session from DESCRIBE's SDP.
    pub fn from_sdp(sdp: &str) -> Result<Self> {
        let description = SessionDescription::parse(sdp)?;
        let mut session = Session::default();

        if let Some(range) = description.get_attribute("range") {
            session.apply_range(range)?;
        }

        for media in &description.media {
            // a media-level range can extend the session's
            if let Some(range) = media.get_attribute("range") {
                if let Some((_, end)) = parse_npt_range(range) {
                    session.play_end = session.play_end.max(end.unwrap_or(0.0));
                }
            }
            session.subsessions.push(Subsession::from_media(media));
        }

        Ok(session)
    }

    fn apply_range(&mut self, range: &str) -> Result<()> {
        if let Some(clock) = range.trim().strip_prefix("clock=") {
            let (start, end) = clock.split_once('-').unwrap_or((clock, ""));
            if start.is_empty() {
                return Err(LiveError::Parser(format!("invalid clock range: {}", range)));
            }
            self.absolute_start = Some(start.to_string());
            self.absolute_end = (!end.is_empty()).then(|| end.to_string());
            return Ok(());
        }

        if let Some((start, end)) = parse_npt_range(range) {
            self.play_start = start;
            self.play_end = end.unwrap_or(0.0);
        }
        Ok(())
    }

    /// Absolute range if the session declares one, else start/end times.
    pub fn play_range(&self) -> PlayRange {
        match &self.absolute_start {
            Some(start) => PlayRange::Absolute {
                start: start.clone(),
                end: self.absolute_end.clone(),
            },
            None => PlayRange::Relative {
                start: self.play_start,
                end: self.play_end,
            },
        }
    }

    pub fn active_count(&self) -> usize {
        self.subsessions.iter().filter(|s| s.is_active()).count()
    }

    pub fn has_active_sinks(&self) -> bool {
        self.subsessions.iter().any(Subsession::is_active)
    }
}

/// Parses `npt=<start>-[<end>]`; `now` counts as zero.
pub fn parse_npt_range(range: &str) -> Option<(f64, Option<f64>)> {
    let npt = range.trim().strip_prefix("npt=")?;
    let (start, end) = npt.split_once('-')?;
    let start = match start.trim() {
        "" | "now" => 0.0,
        s => s.parse::<f64>().ok()?,
    };
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse::<f64>().ok()?),
    };
    if !start.is_finite() || end.is_some_and(|e| !e.is_finite()) {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SDP: &str = "\
v=0
o=- 1 1 IN IP4 10.0.0.2
s=Camera
t=0 0
a=range:npt=0-10
m=video 0 RTP/AVP 96
a=rtpmap:96 H264/90000
a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAKeKQFAe2AtwEBAaQeJEV,aM48gA==
a=control:trackID=0
m=audio 0 RTP/AVP 8
a=control:trackID=1
a=rtcp-mux
";

    #[test]
    fn test_session_from_sdp() {
        let session = Session::from_sdp(SDP).unwrap();

        assert_eq!(session.subsessions.len(), 2);
        assert_eq!(session.subsessions[0].label(), "video/H264");
        assert_eq!(session.subsessions[0].control, "trackID=0");
        assert_eq!(session.subsessions[1].label(), "audio/PCMA");
        assert!(session.subsessions[1].is_audio());
        assert!(session.subsessions[1].rtcp_muxed);
        assert_eq!(
            session.play_range(),
            PlayRange::Relative {
                start: 0.0,
                end: 10.0,
            }
        );
        assert_eq!(session.play_range().duration(), 10.0);
        assert_eq!(session.active_count(), 0);
    }

    #[test]
    fn test_stream_params() {
        let session = Session::from_sdp(SDP).unwrap();

        let video = session.subsessions[0].stream_params();
        assert_eq!(video.clock_rate, 90_000);
        let sets = video.parameter_sets.unwrap();
        assert_eq!(&sets[..5], &[0, 0, 0, 1, 0x67]);

        let audio = session.subsessions[1].stream_params();
        assert_eq!(audio, StreamParams::default());
    }

    #[test]
    fn test_absolute_range() {
        let sdp = "v=0\na=range:clock=20240101T000000Z-20240101T000100Z\nm=video 0 RTP/AVP 33\n";
        let session = Session::from_sdp(sdp).unwrap();

        let range = session.play_range();
        assert_eq!(range.duration(), 0.0);
        assert_eq!(range.to_header(), "clock=20240101T000000Z-20240101T000100Z");
        assert_eq!(session.subsessions[0].codec, "MP2T");
    }

    #[test]
    fn test_npt_ranges() {
        assert_eq!(parse_npt_range("npt=0-"), Some((0.0, None)));
        assert_eq!(parse_npt_range("npt=now-"), Some((0.0, None)));
        assert_eq!(parse_npt_range("npt=1.5-30"), Some((1.5, Some(30.0))));
        assert_eq!(parse_npt_range("smpte=0:10:00-"), None);
        assert_eq!(parse_npt_range("npt=0-inf"), None);
        assert_eq!(parse_npt_range("npt=NaN-"), None);

        let open = PlayRange::Relative { start: 0.0, end: 0.0 };
        assert_eq!(open.to_header(), "npt=0.000-");
        let bounded = PlayRange::Relative { start: 0.0, end: 10.0 };
        assert_eq!(bounded.to_header(), "npt=0.000-10.000");
    }

    #[test]
    fn test_sdp_without_media() {
        let session = Session::from_sdp("v=0\ns=empty\n").unwrap();
        assert!(session.subsessions.is_empty());
    }
}

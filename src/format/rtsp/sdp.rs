use std::collections::HashMap;
use std::str::FromStr;

use crate::{LiveError, Result};

/// One `m=` section with its attributes.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    /// First payload format listed on the `m=` line.
    pub format: String,
    pub attributes: HashMap<String, String>,
}

/// Decoded `a=rtpmap` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub encoding: String,
    pub clock_rate: u32,
    pub channels: Option<u32>,
}

impl MediaDescription {
    pub fn new(media_type: &str, port: u16, protocol: &str, format: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            port,
            protocol: protocol.to_string(),
            format: format.to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The `rtpmap` entry for the first payload format, falling back to the
    /// static payload type table of RFC 3551.
    pub fn rtpmap(&self) -> Option<RtpMap> {
        if let Some(value) = self.get_attribute("rtpmap") {
            let (_pt, mapping) = value.split_once(' ')?;
            let mut parts = mapping.trim().split('/');
            let encoding = parts.next()?.to_string();
            let clock_rate = parts.next().and_then(|r| r.parse().ok()).unwrap_or(90_000);
            let channels = parts.next().and_then(|c| c.parse().ok());
            return Some(RtpMap {
                encoding,
                clock_rate,
                channels,
            });
        }

        let (encoding, clock_rate) = match self.format.parse::<u8>().ok()? {
            0 => ("PCMU", 8000),
            8 => ("PCMA", 8000),
            14 => ("MPA", 90_000),
            26 => ("JPEG", 90_000),
            32 => ("MPV", 90_000),
            33 => ("MP2T", 90_000),
            _ => return None,
        };
        Some(RtpMap {
            encoding: encoding.to_string(),
            clock_rate,
            channels: None,
        })
    }
}

/// Parsed SDP document, as returned by DESCRIBE.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub version: i32,
    pub origin: Option<String>,
    pub session_name: Option<String>,
    pub connection: Option<String>,
    pub time: Option<String>,
    pub attributes: HashMap<String, String>,
    /// `m=` sections in declaration order.
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut sdp = SessionDescription::new();
        let mut current_media: Option<MediaDescription> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Each line must be of the form <type>=<value>
            let (typ, value) = match line.split_once('=') {
                Some((t, v)) if t.len() == 1 => (t, v.trim()),
                _ => return Err(LiveError::Parser(format!("invalid SDP line: {}", line))),
            };

            match (typ, current_media.as_mut()) {
                ("v", _) => sdp.version = i32::from_str(value)?,
                ("o", _) => sdp.origin = Some(value.to_string()),
                ("s", _) => sdp.session_name = Some(value.to_string()),
                ("c", None) => sdp.connection = Some(value.to_string()),
                ("t", _) => sdp.time = Some(value.to_string()),
                ("m", _) => {
                    if let Some(media) = current_media.take() {
                        sdp.media.push(media);
                    }

                    // <media> <port>[/<count>] <proto> <fmt> ...
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 4 {
                        return Err(LiveError::Parser(format!(
                            "invalid media description: {}",
                            value
                        )));
                    }

                    let port = parts[1].split('/').next().unwrap_or(parts[1]);
                    current_media = Some(MediaDescription::new(
                        parts[0],
                        u16::from_str(port)?,
                        parts[2],
                        parts[3],
                    ));
                }
                ("a", target) => {
                    let (name, val) = value.split_once(':').unwrap_or((value, ""));
                    let attributes = match target {
                        Some(media) => &mut media.attributes,
                        None => &mut sdp.attributes,
                    };
                    // keep the first rtpmap/fmtp, which belong to the first format
                    attributes
                        .entry(name.to_string())
                        .or_insert_with(|| val.to_string());
                }
                _ => {} // Ignore unknown types
            }
        }

        if let Some(media) = current_media {
            sdp.media.push(media);
        }

        Ok(sdp)
    }

    pub fn get_media(&self, media_type: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media_type == media_type)
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CAMERA_SDP: &str = "\
v=0
o=- 123 456 IN IP4 127.0.0.1
s=Test Session
c=IN IP4 127.0.0.1
t=0 0
a=control:*
a=range:npt=0-
m=video 0 RTP/AVP 96
a=rtpmap:96 H264/90000
a=fmtp:96 profile-level-id=42e01f
a=control:trackID=0
m=audio 0 RTP/AVP 97
a=rtpmap:97 MPEG4-GENERIC/44100/2
a=control:trackID=1
m=audio 0 RTP/AVP 8
a=control:trackID=2
";

    #[test]
    fn test_parse_sdp() {
        let sdp = SessionDescription::parse(CAMERA_SDP).unwrap();

        assert_eq!(sdp.version, 0);
        assert_eq!(sdp.session_name, Some("Test Session".to_string()));
        assert_eq!(sdp.get_attribute("range"), Some("npt=0-"));
        assert_eq!(sdp.media.len(), 3);

        let video = sdp.get_media("video").unwrap();
        assert_eq!(video.format, "96");
        assert_eq!(video.get_attribute("control"), Some("trackID=0"));
        assert_eq!(
            video.rtpmap(),
            Some(RtpMap {
                encoding: "H264".into(),
                clock_rate: 90_000,
                channels: None,
            })
        );

        assert_eq!(sdp.media[1].rtpmap().unwrap().channels, Some(2));
    }

    #[test]
    fn test_static_payload_types() {
        let sdp = SessionDescription::parse(CAMERA_SDP).unwrap();
        let pcma = sdp.media[2].rtpmap().unwrap();
        assert_eq!(pcma.encoding, "PCMA");
        assert_eq!(pcma.clock_rate, 8000);

        let unknown = MediaDescription::new("video", 0, "RTP/AVP", "99");
        assert_eq!(unknown.rtpmap(), None);
    }

    #[test]
    fn test_invalid_sdp() {
        assert!(SessionDescription::parse("v=0\nnot a line\n").is_err());
        assert!(SessionDescription::parse("v=0\nm=video 0\n").is_err());
    }
}

use std::collections::HashMap;
use std::fmt;

/// `Transport` header of SETUP requests and responses.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportInfo {
    pub protocol: String,
    pub cast_type: CastType,
    pub client_port_rtp: Option<u16>,
    pub client_port_rtcp: Option<u16>,
    pub server_port_rtp: Option<u16>,
    pub server_port_rtcp: Option<u16>,
    /// RTP and RTCP channels when interleaved over the RTSP connection.
    pub interleaved: Option<(u8, u8)>,
    pub ssrc: Option<u32>,
    pub mode: Option<String>,
    pub extra_params: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CastType {
    Unicast,
    Multicast,
}

fn parse_pair<T: std::str::FromStr + Copy>(value: &str) -> Option<(T, T)> {
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let single = value.trim().parse().ok()?;
            Some((single, single))
        }
    }
}

impl TransportInfo {
    fn empty(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            cast_type: CastType::Unicast,
            client_port_rtp: None,
            client_port_rtcp: None,
            server_port_rtp: None,
            server_port_rtcp: None,
            interleaved: None,
            ssrc: None,
            mode: None,
            extra_params: HashMap::new(),
        }
    }

    /// Create a new RTP/AVP transport with client ports
    pub fn new_rtp_avp(ports: (u16, u16)) -> Self {
        Self {
            client_port_rtp: Some(ports.0),
            client_port_rtcp: Some(ports.1),
            ..Self::empty("RTP/AVP")
        }
    }

    /// Create an RTP/AVP/TCP transport on the given interleaved channels
    pub fn new_interleaved(channels: (u8, u8)) -> Self {
        Self {
            interleaved: Some(channels),
            ..Self::empty("RTP/AVP/TCP")
        }
    }

    pub fn is_interleaved(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("RTP/AVP/TCP") || self.interleaved.is_some()
    }

    /// Parse a transport string into TransportInfo
    pub fn parse(transport: &str) -> Option<Self> {
        // servers may offer several comma-separated transports; take the first
        let transport = transport.split(',').next()?.trim();
        let mut parts = transport.split(';');
        let protocol = parts.next()?.trim();
        if protocol.is_empty() {
            return None;
        }
        let mut info = Self::empty(protocol);

        for part in parts {
            let part = part.trim();
            if part.eq_ignore_ascii_case("unicast") {
                info.cast_type = CastType::Unicast;
            } else if part.eq_ignore_ascii_case("multicast") {
                info.cast_type = CastType::Multicast;
            } else if let Some((key, value)) = part.split_once('=') {
                match key.trim().to_ascii_lowercase().as_str() {
                    "client_port" => {
                        if let Some((rtp, rtcp)) = parse_pair(value) {
                            info.client_port_rtp = Some(rtp);
                            info.client_port_rtcp = Some(rtcp);
                        }
                    }
                    "server_port" => {
                        if let Some((rtp, rtcp)) = parse_pair(value) {
                            info.server_port_rtp = Some(rtp);
                            info.server_port_rtcp = Some(rtcp);
                        }
                    }
                    "interleaved" => info.interleaved = parse_pair(value),
                    "ssrc" => {
                        info.ssrc = u32::from_str_radix(value.trim().trim_start_matches("0x"), 16).ok();
                    }
                    "mode" => {
                        info.mode = Some(value.trim_matches('"').to_string());
                    }
                    _ => {
                        info.extra_params.insert(key.to_string(), Some(value.to_string()));
                    }
                }
            } else if !part.is_empty() {
                info.extra_params.insert(part.to_string(), None);
            }
        }

        Some(info)
    }
}

impl fmt::Display for TransportInfo {
    /// The header value, as sent in SETUP
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![self.protocol.clone()];

        parts.push(
            match self.cast_type {
                CastType::Unicast => "unicast",
                CastType::Multicast => "multicast",
            }
            .to_string(),
        );

        if let (Some(rtp), Some(rtcp)) = (self.client_port_rtp, self.client_port_rtcp) {
            parts.push(format!("client_port={}-{}", rtp, rtcp));
        }

        if let (Some(rtp), Some(rtcp)) = (self.server_port_rtp, self.server_port_rtcp) {
            parts.push(format!("server_port={}-{}", rtp, rtcp));
        }

        if let Some((rtp, rtcp)) = self.interleaved {
            parts.push(format!("interleaved={}-{}", rtp, rtcp));
        }

        if let Some(ssrc) = self.ssrc {
            parts.push(format!("ssrc={:08X}", ssrc));
        }

        if let Some(ref mode) = self.mode {
            parts.push(format!("mode={}", mode));
        }

        for (key, value) in &self.extra_params {
            match value {
                Some(val) => parts.push(format!("{}={}", key, val)),
                None => parts.push(key.clone()),
            }
        }

        write!(f, "{}", parts.join(";"))
    }
}

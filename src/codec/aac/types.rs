use crate::codec::h264::fmtp_parameter;

/// AU-header layout announced for an `MPEG4-GENERIC` stream (RFC 3640 §3.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuHeaderConfig {
    /// Bits of the AU-size field; zero means the payload carries no AU headers.
    pub size_length: u32,
    /// Bits of the AU-Index field of the first header.
    pub index_length: u32,
    /// Bits of the AU-Index-delta field of every following header.
    pub index_delta_length: u32,
}

impl Default for AuHeaderConfig {
    /// The `AAC-hbr` layout.
    fn default() -> Self {
        Self {
            size_length: 13,
            index_length: 3,
            index_delta_length: 3,
        }
    }
}

impl AuHeaderConfig {
    /// Reads `sizelength`, `indexlength` and `indexdeltalength` from an
    /// `a=fmtp` value, falling back to the `AAC-hbr` layout for missing fields.
    /// Widths above 32 bits are clamped to 32.
    pub fn from_fmtp(fmtp: Option<&str>) -> Self {
        let defaults = Self::default();
        let Some(fmtp) = fmtp else {
            return defaults;
        };
        // header fields are at most 32 bits wide
        let field = |name: &str, default: u32| {
            fmtp_parameter(fmtp, name)
                .and_then(|v| v.parse::<u32>().ok())
                .map_or(default, |bits| bits.min(32))
        };

        Self {
            size_length: field("sizelength", defaults.size_length),
            index_length: field("indexlength", defaults.index_length),
            index_delta_length: field("indexdeltalength", defaults.index_delta_length),
        }
    }
}

/// One access unit cut out of an RTP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Size announced by the AU header.
    pub declared_size: usize,
    /// Bytes present in this payload; shorter than `declared_size` for a fragment.
    pub data: bytes::Bytes,
}

impl AccessUnit {
    pub fn is_fragment(&self) -> bool {
        self.data.len() < self.declared_size
    }
}

/// NAL unit types that matter when unpacking H.264 RTP payloads (RFC 6184 §5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    Unspecified,
    CodedSliceNonIDR,
    CodedSliceIDR,
    SEI,
    SPS,
    PPS,
    AccessUnitDelimiter,
    /// Any other single-NAL type in 1..=23.
    Other(u8),
    /// Single-time aggregation packet.
    StapA,
    /// Fragmentation unit without DON.
    FuA,
    /// Aggregation and fragmentation modes this client does not unpack.
    Unsupported(u8),
}

impl From<u8> for NALUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            0 => NALUnitType::Unspecified,
            1 => NALUnitType::CodedSliceNonIDR,
            5 => NALUnitType::CodedSliceIDR,
            6 => NALUnitType::SEI,
            7 => NALUnitType::SPS,
            8 => NALUnitType::PPS,
            9 => NALUnitType::AccessUnitDelimiter,
            24 => NALUnitType::StapA,
            28 => NALUnitType::FuA,
            t @ 1..=23 => NALUnitType::Other(t),
            t => NALUnitType::Unsupported(t),
        }
    }
}

impl NALUnitType {
    /// True for types carried as a complete NAL unit in one RTP payload.
    pub fn is_single(&self) -> bool {
        !matches!(
            self,
            NALUnitType::Unspecified
                | NALUnitType::StapA
                | NALUnitType::FuA
                | NALUnitType::Unsupported(_)
        )
    }
}

/// Annex-B start code prepended to parameter sets handed to applications.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

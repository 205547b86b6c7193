//! # Real-time Transport Protocol (RTP) Receiving
//!
//! The receive side of RTP as the network backend needs it:
//!
//! - RTP packet parsing
//! - Per-codec depacketization into frames (H.264, MPEG4-GENERIC, passthrough)
//! - Mapping RTP timestamps to wall-clock presentation times
//!
//! ## Example: Unpacking an H.264 FU-A pair
//!
//! ```rust
//! use rtsplive::format::rtp::{Depacketizer, RTPPacket};
//! use bytes::Bytes;
//!
//! let mut depacketizer = Depacketizer::for_codec("H264", None);
//! let mut frames = Vec::new();
//!
//! let start = RTPPacket::new(96, 1, 3000, 7, false, Bytes::from_static(&[0x7c, 0x85, 0xaa]));
//! let end = RTPPacket::new(96, 2, 3000, 7, true, Bytes::from_static(&[0x7c, 0x45, 0xbb]));
//! depacketizer.push(&start, &mut frames);
//! depacketizer.push(&end, &mut frames);
//!
//! assert_eq!(&frames[0].data[..], &[0x65, 0xaa, 0xbb]);
//! ```

mod clock;
mod depacketize;

pub use clock::PresentationClock;
pub use depacketize::{Depacketizer, RtpFrame};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RTP operations
#[derive(Debug, Error)]
pub enum RTPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTP packet")]
    InvalidPacket,
}

/// Specialized Result type for RTP operations
pub type Result<T> = std::result::Result<T, RTPError>;

/// An RTP packet containing media data and metadata
#[derive(Debug, Clone)]
pub struct RTPPacket {
    /// RTP version (should be 2)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Header extension flag
    pub extension: bool,
    /// CSRC count
    pub csrc_count: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type identifier
    pub payload_type: u8,
    /// Packet sequence number
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Packet payload data
    pub payload: Bytes,
}

impl RTPPacket {
    /// Creates a new RTP packet with the specified parameters
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: Bytes,
    ) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Parses an RTP packet from a received datagram or interleaved frame
    ///
    /// CSRC identifiers and header extensions are skipped; the payload is a
    /// zero-copy slice of `data`.
    ///
    /// # Errors
    ///
    /// Returns `RTPError::InvalidPacket` if:
    /// - The packet is shorter than 12 bytes
    /// - The version is not 2
    /// - The CSRC list, extension or padding run past the end of the packet
    pub fn parse(data: &Bytes) -> Result<Self> {
        if data.len() < 12 {
            return Err(RTPError::InvalidPacket);
        }

        let first_byte = data[0];
        let second_byte = data[1];

        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RTPError::InvalidPacket);
        }

        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0f;

        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7f;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12 + csrc_count as usize * 4;
        if offset > data.len() {
            return Err(RTPError::InvalidPacket);
        }

        if extension {
            if offset + 4 > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            let ext_length =
                u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
            offset += 4 + ext_length;
            if offset > data.len() {
                return Err(RTPError::InvalidPacket);
            }
        }

        let end = if padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || offset + padding_len > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            data.len() - padding_len
        } else {
            data.len()
        };

        Ok(Self {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload: data.slice(offset..end),
        })
    }

    /// Serializes the fixed header and payload; CSRCs and extensions are not written.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(12 + self.payload.len());
        out.put_u8(self.version << 6);
        out.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        out.put_u16(self.sequence_number);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }
}

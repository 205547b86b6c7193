//! # RTP Control Protocol (RTCP)
//!
//! The receiver's half of RTCP:
//!
//! - Parsing compound packets (SR, RR, SDES, BYE)
//! - Serializing the RR + SDES compound a receiver sends back
//! - Converting sender-report NTP timestamps to wall-clock time
//!
//! ## Example
//!
//! ```rust
//! use rtsplive::format::rtcp::{RTCPPacket, ReceptionReport};
//!
//! let report = RTCPPacket::ReceiverReport {
//!     ssrc: 0x12345678,
//!     reports: vec![ReceptionReport {
//!         ssrc: 0x87654321,
//!         fraction_lost: 0,
//!         packets_lost: 0,
//!         highest_seq: 1000,
//!         jitter: 0,
//!         last_sr: 0,
//!         delay_last_sr: 0,
//!     }],
//! };
//! let bytes = report.to_bytes();
//! assert_eq!(bytes.len(), 32);
//! assert!(matches!(RTCPPacket::parse(&bytes), Ok(RTCPPacket::ReceiverReport { .. })));
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::av::PresentationTime;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const TYPE_SR: u8 = 200;
const TYPE_RR: u8 = 201;
const TYPE_SDES: u8 = 202;
const TYPE_BYE: u8 = 203;

/// SDES item type for the canonical name.
pub const SDES_CNAME: u8 = 1;

/// Errors that can occur during RTCP packet operations
#[derive(Debug, Error)]
pub enum RTCPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTCP packet")]
    InvalidPacket,

    /// The packet type is not supported by this implementation
    #[error("Unsupported packet type")]
    UnsupportedType,
}

/// Specialized Result type for RTCP operations
pub type Result<T> = std::result::Result<T, RTCPError>;

/// Reception statistics for an RTP source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    /// SSRC of the source this report is for
    pub ssrc: u32,
    /// Fraction of RTP data packets lost since the previous SR/RR
    pub fraction_lost: u8,
    /// Cumulative number of packets lost
    pub packets_lost: u32,
    /// Extended highest sequence number received
    pub highest_seq: u32,
    /// Interarrival jitter
    pub jitter: u32,
    /// Last SR timestamp (LSR)
    pub last_sr: u32,
    /// Delay since last SR (DLSR)
    pub delay_last_sr: u32,
}

/// RTCP packets a receiver deals with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RTCPPacket {
    /// Sender Report (SR) packet, containing transmission and reception statistics
    SenderReport {
        /// Synchronization source identifier
        ssrc: u32,
        /// NTP timestamp in 64-bit fixed point format
        ntp_timestamp: u64,
        /// RTP timestamp corresponding to NTP timestamp
        rtp_timestamp: u32,
        /// Total number of packets sent
        packet_count: u32,
        /// Total number of payload octets sent
        octet_count: u32,
        /// Reception reports for other sources
        reports: Vec<ReceptionReport>,
    },

    /// Receiver Report (RR) packet, containing reception statistics
    ReceiverReport {
        /// Synchronization source identifier
        ssrc: u32,
        /// Reception reports for other sources
        reports: Vec<ReceptionReport>,
    },

    /// Source Description (SDES) packet
    SourceDescription {
        /// List of (SSRC, item list) pairs. Each item is (type, value)
        chunks: Vec<(u32, Vec<(u8, String)>)>,
    },

    /// Goodbye (BYE) packet
    Goodbye {
        /// List of sources leaving the session
        sources: Vec<u32>,
        /// Optional reason for leaving
        reason: Option<String>,
    },
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl RTCPPacket {
    /// Parse a single RTCP packet from raw bytes
    ///
    /// Only the first packet of a compound is read; see [`parse_compound`].
    ///
    /// # Errors
    ///
    /// Returns `RTCPError` if:
    /// - The packet is shorter than 4 bytes
    /// - The version is not 2
    /// - The packet length is invalid
    /// - The packet type is unsupported
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(RTCPError::InvalidPacket);
        }

        let first_byte = data[0];
        let packet_type = data[1];

        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RTCPError::InvalidPacket);
        }

        let padding = (first_byte & 0x20) != 0;
        let count = (first_byte & 0x1f) as usize;

        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let packet_len = (length + 1) * 4;
        if data.len() < packet_len {
            return Err(RTCPError::InvalidPacket);
        }
        let data = &data[..packet_len];

        let mut offset = 4;
        let payload_end = if padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len > data.len() - offset {
                return Err(RTCPError::InvalidPacket);
            }
            data.len() - padding_len
        } else {
            data.len()
        };

        match packet_type {
            TYPE_SR => {
                if payload_end - offset < 24 {
                    return Err(RTCPError::InvalidPacket);
                }

                let ssrc = read_u32(data, offset);
                let ntp_msw = read_u32(data, offset + 4);
                let ntp_lsw = read_u32(data, offset + 8);
                let ntp_timestamp = ((ntp_msw as u64) << 32) | (ntp_lsw as u64);
                let rtp_timestamp = read_u32(data, offset + 12);
                let packet_count = read_u32(data, offset + 16);
                let octet_count = read_u32(data, offset + 20);
                offset += 24;

                let reports = parse_reception_reports(data, offset, payload_end, count)?;

                Ok(RTCPPacket::SenderReport {
                    ssrc,
                    ntp_timestamp,
                    rtp_timestamp,
                    packet_count,
                    octet_count,
                    reports,
                })
            }
            TYPE_RR => {
                if payload_end - offset < 4 {
                    return Err(RTCPError::InvalidPacket);
                }

                let ssrc = read_u32(data, offset);
                offset += 4;

                let reports = parse_reception_reports(data, offset, payload_end, count)?;

                Ok(RTCPPacket::ReceiverReport { ssrc, reports })
            }
            TYPE_SDES => {
                let mut chunks = Vec::with_capacity(count);
                for _ in 0..count {
                    if payload_end - offset < 4 {
                        return Err(RTCPError::InvalidPacket);
                    }
                    let ssrc = read_u32(data, offset);
                    offset += 4;

                    let mut items = Vec::new();
                    loop {
                        if offset >= payload_end {
                            return Err(RTCPError::InvalidPacket);
                        }
                        let item_type = data[offset];
                        if item_type == 0 {
                            // end of list, then pad to the next 32-bit boundary
                            offset = (offset + 4) & !3;
                            break;
                        }
                        if offset + 2 > payload_end {
                            return Err(RTCPError::InvalidPacket);
                        }
                        let item_len = data[offset + 1] as usize;
                        let start = offset + 2;
                        if start + item_len > payload_end {
                            return Err(RTCPError::InvalidPacket);
                        }
                        let value = String::from_utf8_lossy(&data[start..start + item_len]);
                        items.push((item_type, value.into_owned()));
                        offset = start + item_len;
                    }
                    chunks.push((ssrc, items));
                }

                Ok(RTCPPacket::SourceDescription { chunks })
            }
            TYPE_BYE => {
                if payload_end - offset < count * 4 {
                    return Err(RTCPError::InvalidPacket);
                }
                let sources = (0..count).map(|i| read_u32(data, offset + i * 4)).collect();
                offset += count * 4;

                let reason = if offset < payload_end {
                    let len = data[offset] as usize;
                    let start = offset + 1;
                    if start + len > payload_end {
                        return Err(RTCPError::InvalidPacket);
                    }
                    Some(String::from_utf8_lossy(&data[start..start + len]).into_owned())
                } else {
                    None
                };

                Ok(RTCPPacket::Goodbye { sources, reason })
            }
            _ => Err(RTCPError::UnsupportedType),
        }
    }

    /// Serializes the packet into its wire format
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = buf.len();
        match self {
            RTCPPacket::SenderReport {
                ssrc,
                ntp_timestamp,
                rtp_timestamp,
                packet_count,
                octet_count,
                reports,
            } => {
                buf.put_u8(0x80 | reports.len() as u8);
                buf.put_u8(TYPE_SR);
                buf.put_u16(0);
                buf.put_u32(*ssrc);
                buf.put_u64(*ntp_timestamp);
                buf.put_u32(*rtp_timestamp);
                buf.put_u32(*packet_count);
                buf.put_u32(*octet_count);
                reports.iter().for_each(|r| write_reception_report(r, buf));
            }
            RTCPPacket::ReceiverReport { ssrc, reports } => {
                buf.put_u8(0x80 | reports.len() as u8);
                buf.put_u8(TYPE_RR);
                buf.put_u16(0);
                buf.put_u32(*ssrc);
                reports.iter().for_each(|r| write_reception_report(r, buf));
            }
            RTCPPacket::SourceDescription { chunks } => {
                buf.put_u8(0x80 | chunks.len() as u8);
                buf.put_u8(TYPE_SDES);
                buf.put_u16(0);
                for (ssrc, items) in chunks {
                    let chunk_start = buf.len();
                    buf.put_u32(*ssrc);
                    for (item_type, value) in items {
                        let value = &value.as_bytes()[..value.len().min(255)];
                        buf.put_u8(*item_type);
                        buf.put_u8(value.len() as u8);
                        buf.put_slice(value);
                    }
                    // terminating null item plus padding
                    buf.put_u8(0);
                    while (buf.len() - chunk_start) % 4 != 0 {
                        buf.put_u8(0);
                    }
                }
            }
            RTCPPacket::Goodbye { sources, reason } => {
                buf.put_u8(0x80 | sources.len() as u8);
                buf.put_u8(TYPE_BYE);
                buf.put_u16(0);
                sources.iter().for_each(|s| buf.put_u32(*s));
                if let Some(reason) = reason {
                    let reason = &reason.as_bytes()[..reason.len().min(255)];
                    buf.put_u8(reason.len() as u8);
                    buf.put_slice(reason);
                    while (buf.len() - start) % 4 != 0 {
                        buf.put_u8(0);
                    }
                }
            }
        }

        let words = ((buf.len() - start) / 4 - 1) as u16;
        buf[start + 2..start + 4].copy_from_slice(&words.to_be_bytes());
    }
}

/// Parses every packet of a compound RTCP datagram
///
/// Packets of unsupported types are skipped; a malformed packet ends the
/// walk and everything parsed before it is returned.
pub fn parse_compound(data: &[u8]) -> Vec<RTCPPacket> {
    let mut packets = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let packet_len = (length + 1) * 4;
        if offset + packet_len > data.len() {
            break;
        }

        match RTCPPacket::parse(&data[offset..offset + packet_len]) {
            Ok(packet) => packets.push(packet),
            Err(RTCPError::UnsupportedType) => {}
            Err(RTCPError::InvalidPacket) => break,
        }
        offset += packet_len;
    }

    packets
}

/// Serializes several packets into one compound datagram
pub fn build_compound(packets: &[RTCPPacket]) -> Bytes {
    let mut buf = BytesMut::new();
    for packet in packets {
        packet.write_to(&mut buf);
    }
    buf.freeze()
}

fn parse_reception_reports(
    data: &[u8],
    mut offset: usize,
    payload_end: usize,
    count: usize,
) -> Result<Vec<ReceptionReport>> {
    let mut reports = Vec::with_capacity(count);
    for _ in 0..count {
        if payload_end - offset < 24 {
            return Err(RTCPError::InvalidPacket);
        }
        reports.push(parse_reception_report(&data[offset..offset + 24])?);
        offset += 24;
    }
    Ok(reports)
}

/// Parse a reception report block from raw data
///
/// # Errors
///
/// Returns `RTCPError::InvalidPacket` if the data is shorter than 24 bytes
fn parse_reception_report(data: &[u8]) -> Result<ReceptionReport> {
    if data.len() < 24 {
        return Err(RTCPError::InvalidPacket);
    }

    let ssrc = read_u32(data, 0);
    let fraction_lost = data[4];
    let packets_lost = u32::from_be_bytes([0, data[5], data[6], data[7]]) & 0x00FF_FFFF;
    let highest_seq = read_u32(data, 8);
    let jitter = read_u32(data, 12);
    let last_sr = read_u32(data, 16);
    let delay_last_sr = read_u32(data, 20);

    Ok(ReceptionReport {
        ssrc,
        fraction_lost,
        packets_lost,
        highest_seq,
        jitter,
        last_sr,
        delay_last_sr,
    })
}

fn write_reception_report(report: &ReceptionReport, buf: &mut BytesMut) {
    buf.put_u32(report.ssrc);
    buf.put_u8(report.fraction_lost);
    let lost = (report.packets_lost & 0x00FF_FFFF).to_be_bytes();
    buf.put_slice(&lost[1..]);
    buf.put_u32(report.highest_seq);
    buf.put_u32(report.jitter);
    buf.put_u32(report.last_sr);
    buf.put_u32(report.delay_last_sr);
}

/// Middle 32 bits of an NTP timestamp, as echoed in the LSR field
pub fn ntp_middle_bits(ntp_timestamp: u64) -> u32 {
    (ntp_timestamp >> 16) as u32
}

/// Converts a 64-bit NTP timestamp to a Unix-epoch presentation time
pub fn ntp_to_presentation_time(ntp_timestamp: u64) -> PresentationTime {
    let seconds = (ntp_timestamp >> 32) as i64 - NTP_UNIX_OFFSET as i64;
    let fraction = ntp_timestamp & 0xFFFF_FFFF;
    let micros = ((fraction * 1_000_000) >> 32) as u32;
    PresentationTime::new(seconds, micros)
}

use bytes::{BufMut, Bytes, BytesMut};
use log::trace;

use super::RTPPacket;
use crate::codec::aac::{split_access_units, AuHeaderConfig};
use crate::codec::h264::NALUnitType;

/// Samples per AAC access unit, used to stamp units that share a packet.
const AAC_FRAME_SAMPLES: u32 = 1024;

/// One frame recovered from RTP payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    pub data: Bytes,
    pub rtp_timestamp: u32,
}

/// Turns RTP payloads of one subsession back into frames.
#[derive(Debug)]
pub enum Depacketizer {
    /// RFC 6184, non-interleaved mode: one NAL unit per frame.
    H264(H264Depacketizer),
    /// RFC 3640: one access unit per frame.
    Aac(AacDepacketizer),
    /// Every payload is a frame (G.711, MP2T and unknown codecs).
    Passthrough,
}

impl Depacketizer {
    pub fn for_codec(codec: &str, fmtp: Option<&str>) -> Self {
        if codec.eq_ignore_ascii_case("H264") {
            Depacketizer::H264(H264Depacketizer::default())
        } else if codec.eq_ignore_ascii_case("MPEG4-GENERIC") {
            Depacketizer::Aac(AacDepacketizer::new(AuHeaderConfig::from_fmtp(fmtp)))
        } else {
            Depacketizer::Passthrough
        }
    }

    /// Feeds one packet, appending every frame it completes to `out`.
    pub fn push(&mut self, packet: &RTPPacket, out: &mut Vec<RtpFrame>) {
        match self {
            Depacketizer::H264(h264) => h264.push(packet, out),
            Depacketizer::Aac(aac) => aac.push(packet, out),
            Depacketizer::Passthrough => {
                if !packet.payload.is_empty() {
                    out.push(RtpFrame {
                        data: packet.payload.clone(),
                        rtp_timestamp: packet.timestamp,
                    });
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fragment: BytesMut,
    in_fragment: bool,
    last_seq: Option<u16>,
}

impl H264Depacketizer {
    fn push(&mut self, packet: &RTPPacket, out: &mut Vec<RtpFrame>) {
        if let Some(last) = self.last_seq {
            if packet.sequence_number != last.wrapping_add(1) && self.in_fragment {
                trace!("sequence gap inside FU-A, dropping partial NAL unit");
                self.in_fragment = false;
                self.fragment.clear();
            }
        }
        self.last_seq = Some(packet.sequence_number);

        let payload = &packet.payload;
        let Some(&header) = payload.first() else {
            return;
        };
        let ts = packet.timestamp;

        match NALUnitType::from(header) {
            t if t.is_single() => out.push(RtpFrame {
                data: payload.clone(),
                rtp_timestamp: ts,
            }),
            NALUnitType::StapA => {
                let mut offset = 1;
                while offset + 2 <= payload.len() {
                    let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += 2;
                    if size == 0 || offset + size > payload.len() {
                        break;
                    }
                    out.push(RtpFrame {
                        data: payload.slice(offset..offset + size),
                        rtp_timestamp: ts,
                    });
                    offset += size;
                }
            }
            NALUnitType::FuA => {
                if payload.len() < 2 {
                    return;
                }
                let fu_header = payload[1];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;

                if start {
                    self.fragment.clear();
                    self.fragment.put_u8((header & 0xE0) | (fu_header & 0x1F));
                    self.in_fragment = true;
                } else if !self.in_fragment {
                    return;
                }
                self.fragment.put_slice(&payload[2..]);

                if end {
                    self.in_fragment = false;
                    out.push(RtpFrame {
                        data: self.fragment.split().freeze(),
                        rtp_timestamp: ts,
                    });
                }
            }
            other => trace!("dropping unsupported H.264 payload type {:?}", other),
        }
    }
}

#[derive(Debug)]
pub struct AacDepacketizer {
    config: AuHeaderConfig,
    fragment: BytesMut,
    expected: usize,
}

impl AacDepacketizer {
    pub fn new(config: AuHeaderConfig) -> Self {
        Self {
            config,
            fragment: BytesMut::new(),
            expected: 0,
        }
    }

    fn push(&mut self, packet: &RTPPacket, out: &mut Vec<RtpFrame>) {
        let units = match split_access_units(&packet.payload, &self.config) {
            Ok(units) => units,
            Err(e) => {
                trace!("dropping MPEG4-GENERIC payload: {}", e);
                self.fragment.clear();
                return;
            }
        };

        for (i, unit) in units.into_iter().enumerate() {
            let ts = packet
                .timestamp
                .wrapping_add(i as u32 * AAC_FRAME_SAMPLES);

            if unit.is_fragment() || !self.fragment.is_empty() {
                if self.fragment.is_empty() {
                    self.expected = unit.declared_size;
                }
                self.fragment.put_slice(&unit.data);
                if self.fragment.len() >= self.expected || packet.marker {
                    out.push(RtpFrame {
                        data: self.fragment.split().freeze(),
                        rtp_timestamp: ts,
                    });
                }
                continue;
            }

            out.push(RtpFrame {
                data: unit.data,
                rtp_timestamp: ts,
            });
        }
    }
}

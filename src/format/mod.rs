//! Wire formats: RTSP signalling, RTP media packets and RTCP control.

pub mod rtcp;
pub mod rtp;
pub mod rtsp;

pub use self::rtcp::{RTCPPacket, ReceptionReport};
pub use self::rtp::{Depacketizer, PresentationClock, RTPPacket};
pub use self::rtsp::{MediaDescription, NetworkBackend, RTSPClient, SessionDescription, TransportInfo};

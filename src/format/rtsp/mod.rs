//! RTSP client side: requests and responses on the control connection, SDP,
//! `Transport` negotiation, and the per-subsession RTP receivers that feed
//! [`NetworkBackend`].

mod backend;
mod client;
mod connection;
pub mod sdp;
mod stream;
mod transport;

pub use backend::NetworkBackend;
pub use client::{resolve_control, split_response, RTSPClient, RTSPResponse};
pub use connection::{parse_message, RTSPMessage};
pub use sdp::{MediaDescription, RtpMap, SessionDescription};
pub use stream::{StreamCommand, StreamStatistics};
pub use transport::{CastType, TransportInfo};

#![doc(html_root_url = "https://docs.rs/rtsplive/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # rtsplive - live RTSP frames for a callback
//!
//! `rtsplive` opens an RTSP stream, negotiates every subsession the server
//! describes, and hands each received frame to an application callback
//! together with a typed record: codec, keyframe flag, 90 kHz presentation
//! timestamp and, for audio, channel count and sample rate.
//!
//! ## Features
//!
//! - DESCRIBE → SETUP → PLAY handshake driven from a single event loop
//! - RTP over UDP or interleaved on the RTSP connection
//! - H.264 (single NAL, STAP-A, FU-A) and AAC (RFC 3640) depacketization
//! - RTCP sender-report synchronization and periodic receiver reports
//! - Orderly teardown on stop, stream end, RTCP BYE or duration expiry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtsplive::{LiveClient, MediaRecord};
//!
//! let client = LiveClient::new();
//! client
//!     .run("rtsp://camera.local/live", |data: &[u8], record: &MediaRecord| {
//!         if record.is_keyframe() {
//!             println!("keyframe, {} bytes", data.len());
//!         }
//!     })
//!     .unwrap();
//!
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! client.stop();
//! ```
//!
//! ## Module Overview
//!
//! - `controller`: [`LiveClient`], the run/stop lifecycle
//! - `session`: the handshake state machine, sinks and shutdown
//! - `av`: media records and the frame classifier
//! - `codec`: H.264 and AAC payload helpers
//! - `format`: RTSP, SDP, RTP and RTCP on the wire
//! - `config`: [`ClientConfig`] from defaults, environment and file
//! - `error`: [`LiveError`] and the crate [`Result`]
//! - `utils`: bitstream reading

/// Media records and frame classification
pub mod av;

/// Codec payload helpers for H.264 and AAC
pub mod codec;

/// Client configuration
pub mod config;

/// Session lifecycle controller
pub mod controller;

/// Error types and utilities
pub mod error;

/// Wire formats (RTSP, SDP, RTP, RTCP)
pub mod format;

/// Session driver, sinks and shutdown orchestration
pub mod session;

/// Common utilities and helper functions
pub mod utils;

pub use av::MediaRecord;
pub use config::{ClientConfig, FrameShutdownPolicy};
pub use controller::LiveClient;
pub use error::{LiveError, Result};

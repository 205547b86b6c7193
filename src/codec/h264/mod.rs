//! # H.264 helpers
//!
//! What the client needs from H.264 to unpack RTP payloads and describe
//! streams to applications:
//!
//! - NAL unit type classification, including the RTP-only aggregation and
//!   fragmentation types
//! - `sprop-parameter-sets` decoding into Annex-B parameter sets
//!
//! ```rust
//! use rtsplive::codec::h264::{fmtp_parameter, parse_sprop_parameter_sets};
//!
//! let fmtp = "96 packetization-mode=1;sprop-parameter-sets=Z0IAKeKQFAe2AtwEBAaQeJEV,aM48gA==";
//! let sprop = fmtp_parameter(fmtp, "sprop-parameter-sets").unwrap();
//! let sets = parse_sprop_parameter_sets(sprop).unwrap();
//! assert_eq!(&sets[..4], &[0, 0, 0, 1]);
//! ```

/// `sprop-parameter-sets` and fmtp parsing
pub mod parser;
mod types;

#[doc(inline)]
pub use parser::*;
pub use types::*;

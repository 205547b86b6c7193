//! AAC access-unit extraction for `MPEG4-GENERIC` RTP payloads (RFC 3640).

/// AU-header parsing
pub mod parser;
mod types;

pub use parser::split_access_units;
pub use types::*;

pub mod aac;
pub mod h264;

// Re-export common types and functions
pub use aac::{split_access_units, AuHeaderConfig};
pub use h264::NALUnitType;

//! Typed media records and the classifier that produces them.
//!
//! Every buffer a subsession delivers is run through [`classify`]; when the
//! medium/codec pairing is one the client understands, a [`MediaRecord`] is
//! built and handed to the application callback together with the raw bytes.

mod classify;
mod record;

pub use classify::*;
pub use record::*;

use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

use super::types::START_CODE;
use crate::{LiveError, Result};

/// Decodes the `sprop-parameter-sets` value of an H.264 `a=fmtp` line.
///
/// The comma-separated base64 NAL units (normally SPS then PPS) are joined
/// into one Annex-B buffer, each behind a 4-byte start code.
pub fn parse_sprop_parameter_sets(value: &str) -> Result<Bytes> {
    let mut out = BytesMut::new();

    for encoded in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let nal = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| LiveError::Parser(format!("bad sprop-parameter-sets: {}", e)))?;
        if nal.is_empty() {
            continue;
        }
        out.put_slice(&START_CODE);
        out.put_slice(&nal);
    }

    if out.is_empty() {
        return Err(LiveError::InvalidData("sprop-parameter-sets is empty".into()));
    }
    Ok(out.freeze())
}

/// Looks up a parameter in an `a=fmtp` value such as
/// `96 packetization-mode=1;sprop-parameter-sets=Z0IA...,aM4...`.
pub fn fmtp_parameter<'a>(fmtp: &'a str, name: &str) -> Option<&'a str> {
    let params = match fmtp.split_once(' ') {
        Some((_, params)) => params,
        None => fmtp,
    };

    params.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

#[cfg(test)]
#[path = "parser_test.rs"]
mod tests;

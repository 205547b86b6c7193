use bytes::Bytes;

use super::types::{AccessUnit, AuHeaderConfig};
use crate::utils::BitReader;
use crate::{LiveError, Result};

/// Splits an `MPEG4-GENERIC` RTP payload into its access units.
///
/// With a zero `size_length` the whole payload is a single unit. Otherwise
/// the 16-bit AU-headers-length is followed by the bit-packed headers and
/// then the concatenated units. A lone unit announced larger than the bytes
/// present is returned as a fragment for the caller to reassemble.
pub fn split_access_units(payload: &Bytes, config: &AuHeaderConfig) -> Result<Vec<AccessUnit>> {
    if config.size_length == 0 {
        return Ok(vec![AccessUnit {
            declared_size: payload.len(),
            data: payload.clone(),
        }]);
    }

    if payload.len() < 2 {
        return Err(LiveError::InvalidData("AU-headers-length missing".into()));
    }

    let headers_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let headers_bytes = (headers_bits + 7) / 8;
    if payload.len() < 2 + headers_bytes {
        return Err(LiveError::InvalidData("AU headers truncated".into()));
    }

    let mut reader = BitReader::new(&payload[2..2 + headers_bytes]);
    let mut sizes = Vec::new();
    let mut consumed = 0;
    while consumed < headers_bits {
        let index_bits = if sizes.is_empty() {
            config.index_length
        } else {
            config.index_delta_length
        };
        let header_bits = config.size_length as usize + index_bits as usize;
        if consumed + header_bits > headers_bits {
            break;
        }
        sizes.push(reader.read_bits(config.size_length)? as usize);
        reader.skip_bits(index_bits)?;
        consumed += header_bits;
    }

    let mut offset = 2 + headers_bytes;
    let mut units = Vec::with_capacity(sizes.len());
    for (i, size) in sizes.iter().copied().enumerate() {
        let remaining = payload.len() - offset;
        if size > remaining {
            if sizes.len() == 1 && i == 0 {
                units.push(AccessUnit {
                    declared_size: size,
                    data: payload.slice(offset..),
                });
                break;
            }
            return Err(LiveError::InvalidData(format!(
                "AU {} claims {} bytes but only {} remain",
                i, size, remaining
            )));
        }
        units.push(AccessUnit {
            declared_size: size,
            data: payload.slice(offset..offset + size),
        });
        offset += size;
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two AAC-hbr headers: sizes 3 and 2.
    fn two_units() -> Bytes {
        // 32 bits of headers: size=3 idx=0, size=2 delta=0
        let h1: u16 = 3 << 3;
        let h2: u16 = 2 << 3;
        let mut data = vec![0x00, 0x20];
        data.extend_from_slice(&h1.to_be_bytes());
        data.extend_from_slice(&h2.to_be_bytes());
        data.extend_from_slice(&[0xa1, 0xa2, 0xa3, 0xb1, 0xb2]);
        Bytes::from(data)
    }

    #[test]
    fn test_split_two_units() {
        let units = split_access_units(&two_units(), &AuHeaderConfig::default()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].data[..], &[0xa1, 0xa2, 0xa3]);
        assert_eq!(&units[1].data[..], &[0xb1, 0xb2]);
        assert!(!units[0].is_fragment());
    }

    #[test]
    fn test_fragment_of_single_unit() {
        let header: u16 = 10 << 3;
        let mut data = vec![0x00, 0x10];
        data.extend_from_slice(&header.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);

        let units = split_access_units(&Bytes::from(data), &AuHeaderConfig::default()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].declared_size, 10);
        assert!(units[0].is_fragment());
    }

    #[test]
    fn test_no_au_headers() {
        let config = AuHeaderConfig {
            size_length: 0,
            index_length: 0,
            index_delta_length: 0,
        };
        let payload = Bytes::from_static(&[9, 8, 7]);
        let units = split_access_units(&payload, &config).unwrap();
        assert_eq!(units[0].data, payload);
    }

    #[test]
    fn test_truncated_headers() {
        let payload = Bytes::from_static(&[0x00, 0x20, 0x00]);
        assert!(split_access_units(&payload, &AuHeaderConfig::default()).is_err());
    }

    #[test]
    fn test_oversized_header_widths() {
        let config = AuHeaderConfig::from_fmtp(Some(
            "97 mode=AAC-hbr;sizelength=4294967295;indexlength=3;indexdeltalength=99",
        ));
        assert_eq!(config.size_length, 32);
        assert_eq!(config.index_delta_length, 32);

        let config = AuHeaderConfig {
            size_length: u32::MAX,
            index_length: u32::MAX,
            index_delta_length: 3,
        };
        let units = split_access_units(&two_units(), &config).unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_config_from_fmtp() {
        let config = AuHeaderConfig::from_fmtp(Some(
            "97 streamtype=5;profile-level-id=15;mode=AAC-lbr;sizelength=6;indexlength=2;indexdeltalength=2;config=1210",
        ));
        assert_eq!(config.size_length, 6);
        assert_eq!(config.index_length, 2);
        assert_eq!(AuHeaderConfig::from_fmtp(None), AuHeaderConfig::default());
    }
}

use super::*;
use crate::codec::h264::NALUnitType;

#[test]
fn test_parse_sprop_parameter_sets() {
    let sets = parse_sprop_parameter_sets("Z0IAKeKQFAe2AtwEBAaQeJEV,aM48gA==").unwrap();

    assert_eq!(&sets[..5], &[0x00, 0x00, 0x00, 0x01, 0x67]);
    let pps_at = sets
        .windows(5)
        .rposition(|w| w == [0x00, 0x00, 0x00, 0x01, 0x68])
        .unwrap();
    assert_eq!(&sets[pps_at + 4..], &[0x68, 0xce, 0x3c, 0x80]);
}

#[test]
fn test_parse_sprop_parameter_sets_rejects_garbage() {
    assert!(parse_sprop_parameter_sets("!!!").is_err());
    assert!(parse_sprop_parameter_sets(" , ").is_err());
}

#[test]
fn test_fmtp_parameter() {
    let fmtp = "96 packetization-mode=1; profile-level-id=42e01f;sprop-parameter-sets=Z0IA,aM4=";
    assert_eq!(fmtp_parameter(fmtp, "packetization-mode"), Some("1"));
    assert_eq!(fmtp_parameter(fmtp, "Profile-Level-Id"), Some("42e01f"));
    assert_eq!(fmtp_parameter(fmtp, "sprop-parameter-sets"), Some("Z0IA,aM4="));
    assert_eq!(fmtp_parameter(fmtp, "missing"), None);
}

#[test]
fn test_nal_unit_type() {
    assert_eq!(NALUnitType::from(0x65), NALUnitType::CodedSliceIDR);
    assert_eq!(NALUnitType::from(0x41), NALUnitType::CodedSliceNonIDR);
    assert_eq!(NALUnitType::from(0x7c), NALUnitType::FuA);
    assert_eq!(NALUnitType::from(0x18), NALUnitType::StapA);
    assert_eq!(NALUnitType::from(0x19), NALUnitType::Unsupported(25));
    assert!(NALUnitType::from(0x0c).is_single());
    assert!(!NALUnitType::from(0x1c).is_single());
}

use super::*;

#[test]
fn test_read_bits() {
    let data = &[0b10110011, 0b01011010];
    let mut reader = BitReader::new(data);

    assert_eq!(reader.read_bits(3).unwrap(), 0b101);
    assert_eq!(reader.read_bits(5).unwrap(), 0b10011);
    assert_eq!(reader.read_bits(4).unwrap(), 0b0101);
    assert_eq!(reader.available_bits(), 4);
}

#[test]
fn test_read_unaligned_au_header() {
    // 13-bit size 0x0123 followed by a 3-bit index 0b101
    let data = &[0x09, 0x1d];
    let mut reader = BitReader::new(data);

    assert_eq!(reader.read_bits(13).unwrap(), 0x0123);
    assert_eq!(reader.read_bits(3).unwrap(), 0b101);
}

#[test]
fn test_end_of_data() {
    let data = &[0xff];
    let mut reader = BitReader::new(data);

    reader.skip_bits(8).unwrap();
    assert!(reader.read_bit().is_err());
    assert!(BitReader::new(data).read_bits(33).is_err());
}

//! Tests for the decoder safety limits (allocation-bomb resistance).

use crate::encoding::*;

#[test]
fn byte_vec_length_over_limit_rejected() {
    // Claim a length just past MAX_BYTE_LEN with no payload behind it.
    let bytes = (MAX_BYTE_LEN + 1).to_le_bytes().to_vec();
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn vec_element_count_over_limit_rejected() {
    let bytes = (MAX_VEC_ELEMENTS + 1).to_le_bytes().to_vec();
    let err = decode_vec::<u64>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn byte_vec_length_at_limit_but_truncated() {
    // A length claim within the limit but larger than the buffer must fail
    // with EOF, not allocate the claimed size and crash later.
    let mut bytes = 1024u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0u8; 16]);
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

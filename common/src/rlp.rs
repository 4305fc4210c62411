//! Recursive-length-prefix encoding, limited to what legacy transaction
//! envelopes need: byte strings, trimmed big-endian integers and flat lists.

use primitive_types::U256;

// Append the RLP encoding of a byte string
pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        encode_length(out, bytes.len(), 0x80);
        out.extend_from_slice(bytes);
    }
}

// Integers are encoded as their minimal big-endian representation,
// zero as the empty string
pub fn encode_u64(out: &mut Vec<u8>, value: u64) {
    let bytes = value.to_be_bytes();
    encode_bytes(out, trim_leading_zeros(&bytes));
}

pub fn encode_u256(out: &mut Vec<u8>, value: U256) {
    let bytes = value.to_big_endian();
    encode_bytes(out, trim_leading_zeros(&bytes));
}

// Wrap an already-encoded payload in a list header
pub fn encode_list(out: &mut Vec<u8>, payload: &[u8]) {
    encode_length(out, payload.len(), 0xc0);
    out.extend_from_slice(payload);
}

fn encode_length(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len <= 55 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let trimmed = trim_leading_zeros(&len_bytes);
        out.push(offset + 55 + trimmed.len() as u8);
        out.extend_from_slice(trimmed);
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

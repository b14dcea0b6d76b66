//! EBML primitive encoding: variable-length integers, master elements, and
//! the scalar types Matroska builds its tree out of.

use bytes::BufMut;

use crate::error::{Error, Result};

/// Largest vint length this encoder will produce. Matroska IDs and sizes
/// never need more than 8 octets (56 value bits).
const MAX_VLEN_LEN: u8 = 8;

fn minimal_vlen_len(value: u64) -> Result<u8> {
	for len in 1..=MAX_VLEN_LEN {
		// Reserve the all-ones value at this length for the unknown-size sentinel.
		let max = (1u64 << (7 * len)) - 2;
		if value <= max {
			return Ok(len);
		}
	}
	Err(Error::BufferTooSmall {
		need: (MAX_VLEN_LEN + 1) as usize,
		have: MAX_VLEN_LEN as usize,
	})
}

fn write_vlen_known_len(value: u64, len: u8, out: &mut dyn BufMut) -> Result<usize> {
	if out.remaining_mut() < len as usize {
		return Err(Error::BufferTooSmall {
			need: len as usize,
			have: out.remaining_mut(),
		});
	}
	let encoded = (1u64 << (7 * len)) | value;
	for i in (0..len).rev() {
		out.put_u8(((encoded >> (8 * i)) & 0xFF) as u8);
	}
	Ok(len as usize)
}

/// Encode an EBML variable-length integer, choosing the smallest length that
/// fits unless `min_bytes` forces a larger one.
pub fn encode_vlen(value: u64, min_bytes: Option<u8>) -> Result<Vec<u8>> {
	let minimal = minimal_vlen_len(value)?;
	let len = min_bytes.map(|m| m.max(minimal)).unwrap_or(minimal);
	let mut out = Vec::with_capacity(len as usize);
	write_vlen_known_len(value, len, &mut out)?;
	Ok(out)
}

/// Streaming variant of [`encode_vlen`] writing into a caller-owned buffer.
pub fn encode_vlen_into(value: u64, min_bytes: Option<u8>, out: &mut dyn BufMut) -> Result<usize> {
	let minimal = minimal_vlen_len(value)?;
	let len = min_bytes.map(|m| m.max(minimal)).unwrap_or(minimal);
	write_vlen_known_len(value, len, out)
}

/// The all-ones vint of length `len`, used for unknown-size streaming
/// masters (Segment, Cluster) whose final size isn't known up front.
pub fn encode_unknown_size(len: u8) -> Vec<u8> {
	let value = (1u64 << (7 * len)) - 1;
	let mut out = Vec::with_capacity(len as usize);
	write_vlen_known_len(value, len, &mut out).expect("unknown-size vint always fits");
	out
}

/// Wrap `body` in a master element: `id ++ size_vlen ++ body`. `id` is the
/// element's canonical byte sequence (see [`crate::mkv::ids`]), not
/// re-derived from an integer.
pub fn encode_master(id: &[u8], body: &[u8]) -> Result<Vec<u8>> {
	let size = encode_vlen(body.len() as u64, None)?;
	let mut out = Vec::with_capacity(id.len() + size.len() + body.len());
	out.extend_from_slice(id);
	out.extend_from_slice(&size);
	out.extend_from_slice(body);
	Ok(out)
}

/// Header for a master element whose size is not yet known (streaming
/// Segment/Cluster). The caller appends child elements directly after.
pub fn encode_master_unknown_size(id: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(id.len() + MAX_VLEN_LEN as usize);
	out.extend_from_slice(id);
	out.extend_from_slice(&encode_unknown_size(MAX_VLEN_LEN));
	out
}

/// Minimal big-endian unsigned integer (at least one byte, even for zero).
pub fn encode_uint(value: u64) -> Vec<u8> {
	if value == 0 {
		return vec![0];
	}
	let bytes = value.to_be_bytes();
	let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap();
	bytes[first_nonzero..].to_vec()
}

/// Minimal big-endian two's-complement signed integer.
pub fn encode_int(value: i64) -> Vec<u8> {
	if value == 0 {
		return vec![0];
	}
	let bytes = value.to_be_bytes();
	if value > 0 {
		let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(7);
		// Keep a leading zero byte if the high bit of the next byte would
		// otherwise flip the sign.
		let start = if bytes[first_nonzero] & 0x80 != 0 && first_nonzero > 0 {
			first_nonzero - 1
		} else {
			first_nonzero
		};
		bytes[start..].to_vec()
	} else {
		let first = bytes.iter().position(|&b| b != 0xFF).unwrap_or(7);
		let start = if bytes[first] & 0x80 == 0 && first > 0 {
			first - 1
		} else {
			first
		};
		bytes[start..].to_vec()
	}
}

pub fn encode_float32(value: f32) -> [u8; 4] {
	value.to_be_bytes()
}

pub fn encode_float64(value: f64) -> [u8; 8] {
	value.to_be_bytes()
}

pub fn encode_string(value: &str) -> Vec<u8> {
	value.as_bytes().to_vec()
}

pub fn encode_binary(value: &[u8]) -> Vec<u8> {
	value.to_vec()
}

pub fn encode_uuid(value: [u8; 16]) -> Vec<u8> {
	value.to_vec()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vlen_single_byte() {
		assert_eq!(encode_vlen(0, None).unwrap(), vec![0x80]);
		assert_eq!(encode_vlen(5, None).unwrap(), vec![0x85]);
		assert_eq!(encode_vlen(0x7E, None).unwrap(), vec![0xFE]);
	}

	#[test]
	fn vlen_two_bytes() {
		// 0x7F exceeds the 1-byte safe max (0x7E), promotes to 2 bytes.
		assert_eq!(encode_vlen(0x7F, None).unwrap(), vec![0x40, 0x7F]);
	}

	#[test]
	fn vlen_min_bytes_forces_length() {
		assert_eq!(encode_vlen(1, Some(4)).unwrap(), vec![0x10, 0x00, 0x00, 0x01]);
	}

	#[test]
	fn vlen_buffer_too_small() {
		let mut buf = [0u8; 1];
		let mut slice: &mut [u8] = &mut buf;
		let err = encode_vlen_into(0x7F, None, &mut slice).unwrap_err();
		assert_eq!(
			err,
			Error::BufferTooSmall {
				need: 2,
				have: 1
			}
		);
	}

	#[test]
	fn uint_roundtrip_zero_is_one_byte() {
		assert_eq!(encode_uint(0), vec![0]);
		assert_eq!(encode_uint(256), vec![1, 0]);
	}

	#[test]
	fn int_negative_minimal() {
		assert_eq!(encode_int(-1), vec![0xFF]);
		assert_eq!(encode_int(127), vec![0x7F]);
		assert_eq!(encode_int(128), vec![0x00, 0x80]);
	}

	#[test]
	fn master_wraps_id_size_body() {
		let body = [1u8, 2, 3];
		let out = encode_master(&[0x80], &body).unwrap();
		assert_eq!(out, vec![0x80, 0x83, 1, 2, 3]);
	}

	#[test]
	fn unknown_size_is_all_ones() {
		assert_eq!(encode_unknown_size(8), vec![0xFF; 8]);
	}
}

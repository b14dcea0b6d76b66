//! Conversion between Annex-B (start-code-delimited) and AVCC
//! (length-prefixed) NAL-unit framing, and codec-private-data record
//! construction for H.264 (`avcC`) and H.265 (`hvcC`).

use crate::error::{Error, Result};
use crate::sps;

/// H.264/H.265 NAL unit type extracted from the first header byte(s).
fn h264_nal_type(nal: &[u8]) -> Option<u8> {
	nal.first().map(|b| b & 0x1F)
}

fn h265_nal_type(nal: &[u8]) -> Option<u8> {
	nal.first().map(|b| (b >> 1) & 0x3F)
}

/// One Annex-B NAL occurrence: its byte range within the source buffer.
struct StartCode {
	pos: usize,
	len: usize,
}

fn scan_start_codes(input: &[u8]) -> Vec<StartCode> {
	let mut out = Vec::new();
	let mut i = 0;
	while i + 2 < input.len() {
		if input[i] == 0 && input[i + 1] == 0 {
			if input[i + 2] == 1 {
				out.push(StartCode { pos: i, len: 3 });
				i += 3;
				continue;
			} else if i + 3 < input.len() && input[i + 2] == 0 && input[i + 3] == 1 {
				out.push(StartCode { pos: i, len: 4 });
				i += 4;
				continue;
			}
		}
		i += 1;
	}
	out
}

/// Splits off a trailing run of zero bytes — padding left between NALs by
/// some encoders that doesn't form a start code and isn't part of the
/// preceding NAL's RBSP.
fn split_trailing_zero_pad(body: &[u8]) -> (&[u8], &[u8]) {
	let mut end = body.len();
	while end > 0 && body[end - 1] == 0 {
		end -= 1;
	}
	if end == 0 {
		return (body, &[]);
	}
	(&body[..end], &body[end..])
}

/// Iterates the Annex-B NAL units in `input`, in order, skipping pure
/// padding runs between start codes.
pub struct AnnexBScanner<'a> {
	input: &'a [u8],
	codes: Vec<StartCode>,
	next: usize,
}

impl<'a> AnnexBScanner<'a> {
	pub fn new(input: &'a [u8]) -> Self {
		let codes = scan_start_codes(input);
		Self { input, codes, next: 0 }
	}
}

impl<'a> Iterator for AnnexBScanner<'a> {
	type Item = &'a [u8];

	fn next(&mut self) -> Option<Self::Item> {
		while self.next < self.codes.len() {
			let code = &self.codes[self.next];
			let body_start = code.pos + code.len;
			let body_end = self.codes.get(self.next + 1).map(|c| c.pos).unwrap_or(self.input.len());
			self.next += 1;
			let (nal, _pad) = split_trailing_zero_pad(&self.input[body_start..body_end]);
			if !nal.is_empty() {
				return Some(nal);
			}
		}
		None
	}
}

/// Converts a frame payload from Annex-B start-code framing to AVCC
/// 4-byte length-prefixed framing. Zero-padding between NALs that doesn't
/// form a start code is preserved verbatim, unprefixed, at the point it
/// occurred.
pub fn annexb_to_avcc_frame(input: &[u8]) -> Result<Vec<u8>> {
	let codes = scan_start_codes(input);
	if codes.is_empty() {
		return if input.is_empty() { Ok(Vec::new()) } else { Err(Error::NoStartCode) };
	}

	let mut out = Vec::with_capacity(input.len() + 4 * codes.len());
	for (idx, code) in codes.iter().enumerate() {
		let body_start = code.pos + code.len;
		let body_end = codes.get(idx + 1).map(|c| c.pos).unwrap_or(input.len());
		let (nal, pad) = split_trailing_zero_pad(&input[body_start..body_end]);
		if nal.is_empty() {
			continue;
		}
		if nal.len() > u32::MAX as usize {
			return Err(Error::TruncatedNal);
		}
		out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
		out.extend_from_slice(nal);
		out.extend_from_slice(pad);
	}
	Ok(out)
}

/// Rewrites AVCC 4-byte length prefixes to Annex-B `00 00 00 01` start
/// codes, in place (both framings use 4 bytes per prefix/start-code, so the
/// total length never changes).
pub fn avcc_to_annexb_in_place(buf: &mut [u8]) -> Result<()> {
	let mut i = 0;
	while i + 4 <= buf.len() {
		let len = u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]) as usize;
		if i + 4 + len > buf.len() {
			return Err(Error::TruncatedNal);
		}
		buf[i] = 0;
		buf[i + 1] = 0;
		buf[i + 2] = 0;
		buf[i + 3] = 1;
		i += 4 + len;
	}
	Ok(())
}

/// Extracts the first SPS NAL (H.264 type 7, H.265 type 33) from
/// codec-private data in Annex-B, avcC/hvcC, or raw-NAL form.
pub fn extract_first_sps(cpd: &[u8], is_hevc: bool) -> Result<Vec<u8>> {
	if cpd.first() == Some(&0x01) {
		return extract_first_sps_from_record(cpd, is_hevc);
	}
	if looks_like_annex_b_start(cpd) {
		for nal in AnnexBScanner::new(cpd) {
			if matches_sps(nal, is_hevc) {
				let body = if is_hevc { &nal[2..] } else { &nal[1..] };
				return Ok(body.to_vec());
			}
		}
		return Err(Error::InvalidCpd);
	}
	// Raw SPS with no framing at all.
	if matches_sps(cpd, is_hevc) {
		let body = if is_hevc { &cpd[2..] } else { &cpd[1..] };
		return Ok(body.to_vec());
	}
	Err(Error::InvalidCpd)
}

fn looks_like_annex_b_start(data: &[u8]) -> bool {
	data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

fn matches_sps(nal: &[u8], is_hevc: bool) -> bool {
	if is_hevc {
		h265_nal_type(nal) == Some(33)
	} else {
		h264_nal_type(nal) == Some(7)
	}
}

fn extract_first_sps_from_record(record: &[u8], is_hevc: bool) -> Result<Vec<u8>> {
	if is_hevc {
		// hvcC: skip the 22-byte fixed header, then walk the array list.
		if record.len() < 23 {
			return Err(Error::InvalidCpd);
		}
		let num_arrays = record[22] as usize;
		let mut pos = 23;
		for _ in 0..num_arrays {
			if pos + 3 > record.len() {
				return Err(Error::InvalidCpd);
			}
			let nal_type = record[pos] & 0x3F;
			let num_nalus = u16::from_be_bytes([record[pos + 1], record[pos + 2]]) as usize;
			pos += 3;
			for _ in 0..num_nalus {
				if pos + 2 > record.len() {
					return Err(Error::InvalidCpd);
				}
				let len = u16::from_be_bytes([record[pos], record[pos + 1]]) as usize;
				pos += 2;
				if pos + len > record.len() {
					return Err(Error::InvalidCpd);
				}
				if nal_type == 33 {
					return Ok(record[pos..pos + len].to_vec());
				}
				pos += len;
			}
		}
		Err(Error::InvalidCpd)
	} else {
		// avcC: configurationVersion, profile, compat, level, length-size,
		// numSps, then (len u16, sps) pairs.
		if record.len() < 6 {
			return Err(Error::InvalidCpd);
		}
		let num_sps = (record[5] & 0x1F) as usize;
		let mut pos = 6;
		for _ in 0..num_sps {
			if pos + 2 > record.len() {
				return Err(Error::InvalidCpd);
			}
			let len = u16::from_be_bytes([record[pos], record[pos + 1]]) as usize;
			pos += 2;
			if pos + len > record.len() {
				return Err(Error::InvalidCpd);
			}
			return Ok(record[pos..pos + len].to_vec());
		}
		Err(Error::InvalidCpd)
	}
}

/// Builds the `avcC` codec-private-data record from Annex-B SPS and PPS
/// NALs (including their 1-byte NAL header).
pub fn build_avcc_cpd(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
	if sps.len() < 4 || pps.is_empty() {
		return Err(Error::MissingParameterSets);
	}
	let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
	out.push(0x01); // configurationVersion
	out.push(sps[1]); // AVCProfileIndication
	out.push(sps[2]); // profile_compatibility
	out.push(sps[3]); // AVCLevelIndication
	out.push(0xFF); // reserved(6) + lengthSizeMinusOne=3
	out.push(0xE1); // reserved(3) + numOfSequenceParameterSets=1
	out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
	out.extend_from_slice(sps);
	out.push(0x01); // numOfPictureParameterSets
	out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
	out.extend_from_slice(pps);
	Ok(out)
}

/// Builds the `hvcC` codec-private-data record from Annex-B VPS, SPS, and
/// PPS NALs (including their 2-byte NAL headers).
pub fn build_hvcc_cpd(vps: &[u8], sps_nal: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
	if vps.is_empty() || sps_nal.len() < 3 || pps.is_empty() {
		return Err(Error::MissingParameterSets);
	}
	let rbsp = crate::bitreader::strip_emulation_prevention(&sps_nal[2..]);
	let parsed = sps::parse_h265_sps(&rbsp)?;

	let mut out = Vec::with_capacity(23 + vps.len() + sps_nal.len() + pps.len() + 15);
	out.push(0x01); // configurationVersion
	out.push((parsed.general_profile_space << 6) | ((parsed.general_tier_flag as u8) << 5) | parsed.general_profile_idc);
	out.extend_from_slice(&parsed.general_profile_compatibility_flags.to_be_bytes());
	let constraint_bytes = parsed.general_constraint_indicator_flags.to_be_bytes();
	out.extend_from_slice(&constraint_bytes[2..]); // low 48 bits
	out.push(parsed.general_level_idc);
	out.extend_from_slice(&[0xF0, 0x00]); // reserved(4)=1111 + min_spatial_segmentation_idc=0
	out.push(0xFC); // reserved(6) + parallelismType=0
	out.push(0xFC); // reserved(6) + chromaFormat=1 (default 4:2:0 placeholder bits reserved)
	out.push(0xF8); // reserved(5) + bitDepthLumaMinus8=0
	out.push(0xF8); // reserved(5) + bitDepthChromaMinus8=0
	out.extend_from_slice(&[0x00, 0x00]); // avgFrameRate
	out.push(0x0F); // constantFrameRate=0,numTemporalLayers=0,temporalIdNested=0,lengthSizeMinusOne=3
	out.push(0x03); // numOfArrays: VPS, SPS, PPS

	for (nal_type, nal) in [(32u8, vps), (33u8, sps_nal), (34u8, pps)] {
		out.push(0x80 | nal_type); // array_completeness=1, reserved=0, NAL_unit_type
		out.extend_from_slice(&1u16.to_be_bytes()); // numNalus
		out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
		out.extend_from_slice(nal);
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn annexb_to_avcc_single_nal_with_trailing_pad() {
		let input = [0, 0, 0, 1, 6, 0, 0, 0, 0];
		let out = annexb_to_avcc_frame(&input).unwrap();
		assert_eq!(out, vec![0, 0, 0, 1, 6, 0, 0, 0, 0]);
	}

	#[test]
	fn annexb_to_avcc_two_nals_with_interior_pad() {
		let input = [0, 0, 0, 1, 2, 3, 4, 5, 0, 0, 0, 0, 0, 0, 0, 1, 6, 0, 0, 0, 0];
		let out = annexb_to_avcc_frame(&input).unwrap();
		assert_eq!(
			out,
			vec![0, 0, 0, 4, 2, 3, 4, 5, 0, 0, 0, 0, 0, 0, 0, 1, 6, 0, 0, 0, 0]
		);
	}

	#[test]
	fn annexb_avcc_roundtrip() {
		let mut buf = vec![0, 0, 0, 4, 9, 9, 9, 9, 0, 0, 0, 2, 1, 1];
		let original = buf.clone();
		avcc_to_annexb_in_place(&mut buf).unwrap();
		assert_eq!(buf, vec![0, 0, 0, 1, 9, 9, 9, 9, 0, 0, 0, 1, 1, 1]);

		// Converting back with the Annex-B scanner recovers the same NALs.
		let nals: Vec<&[u8]> = AnnexBScanner::new(&buf).collect();
		assert_eq!(nals, vec![&[9u8, 9, 9, 9][..], &[1u8, 1][..]]);
		let _ = original;
	}

	#[test]
	fn no_start_code_errors() {
		assert_eq!(annexb_to_avcc_frame(&[1, 2, 3]).unwrap_err(), Error::NoStartCode);
	}

	#[test]
	fn avcc_cpd_requires_sps_and_pps() {
		assert_eq!(build_avcc_cpd(&[0x67], &[]).unwrap_err(), Error::MissingParameterSets);
	}

	#[test]
	fn avcc_cpd_layout() {
		let sps = [0x67, 0x42, 0x00, 0x1F, 0xAA];
		let pps = [0x68, 0xCE];
		let cpd = build_avcc_cpd(&sps, &pps).unwrap();
		assert_eq!(cpd[0], 0x01);
		assert_eq!(cpd[1], 0x42);
		assert_eq!(cpd[2], 0x00);
		assert_eq!(cpd[3], 0x1F);
		assert_eq!(cpd[4], 0xFF);
		assert_eq!(cpd[5], 0xE1);
		assert_eq!(&cpd[6..8], &(sps.len() as u16).to_be_bytes());
		assert_eq!(&cpd[8..13], &sps);
		assert_eq!(cpd[13], 0x01);
	}
}

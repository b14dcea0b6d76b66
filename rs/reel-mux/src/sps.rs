//! Parameter-set parsing: recover width/height from H.264/H.265
//! codec-private data, and parse the AAC `AudioSpecificConfig`.

use crate::bitreader::{strip_emulation_prevention, BitReader};
use crate::error::{Error, Result};
use crate::nal;

/// Decoded resolution and profile fields from an H.264 SPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264Sps {
	pub profile_idc: u8,
	pub constraint_flags: u8,
	pub level_idc: u8,
	pub width: u32,
	pub height: u32,
}

const HIGH_PROFILES_WITH_CHROMA_INFO: &[u8] = &[100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Parses an H.264 SPS RBSP (emulation-prevention bytes already stripped by
/// the caller, or call [`parse_h264_sps_nal`] to strip them here).
pub fn parse_h264_sps(rbsp: &[u8]) -> Result<H264Sps> {
	if rbsp.len() < 4 {
		return Err(Error::InvalidCpd);
	}
	let mut r = BitReader::new(rbsp);
	let profile_idc = r.read_bits(8)? as u8;
	let constraint_flags = r.read_bits(8)? as u8;
	let level_idc = r.read_bits(8)? as u8;
	let _seq_parameter_set_id = r.read_ue()?;

	let mut chroma_format_idc = 1u64;
	let mut separate_colour_plane_flag = false;
	if HIGH_PROFILES_WITH_CHROMA_INFO.contains(&profile_idc) {
		chroma_format_idc = r.read_ue()?;
		if chroma_format_idc == 3 {
			separate_colour_plane_flag = r.read_bit()? == 1;
		}
		let _bit_depth_luma_minus8 = r.read_ue()?;
		let _bit_depth_chroma_minus8 = r.read_ue()?;
		let _qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
		let seq_scaling_matrix_present = r.read_bit()? == 1;
		if seq_scaling_matrix_present {
			// Scaling-list parsing isn't needed for width/height recovery and
			// none of our callers emit one; reject rather than mis-parse.
			return Err(Error::InvalidCpd);
		}
	}

	let _log2_max_frame_num_minus4 = r.read_ue()?;
	let pic_order_cnt_type = r.read_ue()?;
	if pic_order_cnt_type == 0 {
		let _log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?;
	} else if pic_order_cnt_type == 1 {
		let _delta_pic_order_always_zero_flag = r.read_bit()?;
		let _offset_for_non_ref_pic = r.read_se()?;
		let _offset_for_top_to_bottom_field = r.read_se()?;
		let num_ref_frames_in_pic_order_cnt_cycle = r.read_ue()?;
		for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
			let _ = r.read_se()?;
		}
	}
	let _max_num_ref_frames = r.read_ue()?;
	let _gaps_in_frame_num_value_allowed_flag = r.read_bit()?;
	let pic_width_in_mbs_minus1 = r.read_ue()?;
	let pic_height_in_map_units_minus1 = r.read_ue()?;
	let frame_mbs_only_flag = r.read_bit()? == 1;
	if !frame_mbs_only_flag {
		let _mb_adaptive_frame_field_flag = r.read_bit()?;
	}
	let _direct_8x8_inference_flag = r.read_bit()?;
	let frame_cropping_flag = r.read_bit()? == 1;
	let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0u64, 0u64, 0u64, 0u64);
	if frame_cropping_flag {
		crop_left = r.read_ue()?;
		crop_right = r.read_ue()?;
		crop_top = r.read_ue()?;
		crop_bottom = r.read_ue()?;
	}

	let width_mbs = pic_width_in_mbs_minus1 + 1;
	let height_map_units = pic_height_in_map_units_minus1 + 1;
	let frame_height_in_mbs = (2 - frame_mbs_only_flag as u64) * height_map_units;
	let mut width = width_mbs * 16;
	let mut height = frame_height_in_mbs * 16;

	let chroma_array_type = if separate_colour_plane_flag { 0 } else { chroma_format_idc };
	let (sub_width_c, sub_height_c) = match chroma_array_type {
		1 => (2u64, 2u64),
		2 => (2, 1),
		3 => (1, 1),
		_ => (1, 1),
	};
	let crop_unit_x = if chroma_array_type == 0 { 1 } else { sub_width_c };
	let crop_unit_y = if chroma_array_type == 0 {
		2 - frame_mbs_only_flag as u64
	} else {
		sub_height_c * (2 - frame_mbs_only_flag as u64)
	};
	width = width.saturating_sub(crop_unit_x * (crop_left + crop_right));
	height = height.saturating_sub(crop_unit_y * (crop_top + crop_bottom));

	Ok(H264Sps {
		profile_idc,
		constraint_flags,
		level_idc,
		width: width as u32,
		height: height as u32,
	})
}

/// Decoded resolution and general profile/tier/level from an H.265 SPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H265Sps {
	pub general_profile_space: u8,
	pub general_tier_flag: bool,
	pub general_profile_idc: u8,
	pub general_profile_compatibility_flags: u32,
	pub general_constraint_indicator_flags: u64,
	pub general_level_idc: u8,
	pub width: u32,
	pub height: u32,
}

struct ProfileTierLevelGeneral {
	profile_space: u8,
	tier_flag: bool,
	profile_idc: u8,
	compatibility_flags: u32,
	constraint_flags: u64,
	level_idc: u8,
}

fn parse_profile_tier_level(r: &mut BitReader, max_sub_layers_minus1: u64) -> Result<ProfileTierLevelGeneral> {
	let profile_space = r.read_bits(2)? as u8;
	let tier_flag = r.read_bit()? == 1;
	let profile_idc = r.read_bits(5)? as u8;
	let compatibility_flags = r.read_bits(32)? as u32;
	// progressive/interlaced/non_packed/frame_only (4 bits) + 43 reserved/constraint bits + 1 bit.
	let constraint_flags = r.read_bits(48)?;
	let level_idc = r.read_bits(8)? as u8;

	let mut sub_layer_profile_present = [false; 8];
	let mut sub_layer_level_present = [false; 8];
	for i in 0..max_sub_layers_minus1 as usize {
		sub_layer_profile_present[i] = r.read_bit()? == 1;
		sub_layer_level_present[i] = r.read_bit()? == 1;
	}
	if max_sub_layers_minus1 > 0 {
		for _ in max_sub_layers_minus1..8 {
			r.skip_bits(2)?;
		}
	}
	for i in 0..max_sub_layers_minus1 as usize {
		if sub_layer_profile_present[i] {
			r.skip_bits(2 + 1 + 5 + 32 + 48)?;
		}
		if sub_layer_level_present[i] {
			r.skip_bits(8)?;
		}
	}

	Ok(ProfileTierLevelGeneral {
		profile_space,
		tier_flag,
		profile_idc,
		compatibility_flags,
		constraint_flags,
		level_idc,
	})
}

pub fn parse_h265_sps(rbsp: &[u8]) -> Result<H265Sps> {
	if rbsp.len() < 12 {
		return Err(Error::InvalidCpd);
	}
	let mut r = BitReader::new(rbsp);
	let _sps_video_parameter_set_id = r.read_bits(4)?;
	let sps_max_sub_layers_minus1 = r.read_bits(3)?;
	let _sps_temporal_id_nesting_flag = r.read_bit()?;
	let ptl = parse_profile_tier_level(&mut r, sps_max_sub_layers_minus1)?;

	let _sps_seq_parameter_set_id = r.read_ue()?;
	let chroma_format_idc = r.read_ue()?;
	let separate_colour_plane_flag = if chroma_format_idc == 3 { r.read_bit()? == 1 } else { false };
	let mut width = r.read_ue()? as u32;
	let mut height = r.read_ue()? as u32;

	let conformance_window_flag = r.read_bit()? == 1;
	if conformance_window_flag {
		let left = r.read_ue()? as u32;
		let right = r.read_ue()? as u32;
		let top = r.read_ue()? as u32;
		let bottom = r.read_ue()? as u32;

		let chroma_array_type = if separate_colour_plane_flag { 0 } else { chroma_format_idc };
		let (sub_width_c, sub_height_c) = match chroma_array_type {
			1 => (2u32, 2u32),
			2 => (2, 1),
			3 => (1, 1),
			_ => (1, 1),
		};
		width = width.saturating_sub(sub_width_c * (left + right));
		height = height.saturating_sub(sub_height_c * (top + bottom));
	}

	Ok(H265Sps {
		general_profile_space: ptl.profile_space,
		general_tier_flag: ptl.tier_flag,
		general_profile_idc: ptl.profile_idc,
		general_profile_compatibility_flags: ptl.compatibility_flags,
		general_constraint_indicator_flags: ptl.constraint_flags,
		general_level_idc: ptl.level_idc,
		width,
		height,
	})
}

/// `AudioSpecificConfig`, 2-byte form (no explicit sampling frequency).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
	pub object_type: u8,
	pub sampling_hz: u32,
	pub channels: u8,
}

const AAC_SAMPLE_RATES: [u32; 13] = [
	96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

pub fn parse_aac_config(cpd: &[u8]) -> Result<AacConfig> {
	if cpd.len() < 2 {
		return Err(Error::InvalidCpd);
	}
	let mut r = BitReader::new(cpd);
	let object_type = r.read_bits(5)? as u8;
	let sampling_freq_index = r.read_bits(4)? as usize;
	let sampling_hz = if sampling_freq_index == 0xF {
		r.read_bits(24)? as u32
	} else {
		*AAC_SAMPLE_RATES.get(sampling_freq_index).ok_or(Error::InvalidCpd)?
	};
	let channels = r.read_bits(4)? as u8;
	Ok(AacConfig {
		object_type,
		sampling_hz,
		channels,
	})
}

/// A `BITMAPINFOHEADER`-prefixed codec-private blob (uncompressed/image
/// tracks). Only the fixed 40-byte header fields relevant to packaging are
/// surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
	pub width: i32,
	pub height: i32,
	pub bit_count: u16,
}

pub fn parse_bitmap_info_header(cpd: &[u8]) -> Result<BitmapInfoHeader> {
	if cpd.len() < 40 {
		return Err(Error::InvalidBihCpd);
	}
	let bi_size = u32::from_le_bytes([cpd[0], cpd[1], cpd[2], cpd[3]]);
	if bi_size != 40 {
		return Err(Error::InvalidBihCpd);
	}
	let width = i32::from_le_bytes([cpd[4], cpd[5], cpd[6], cpd[7]]);
	let height = i32::from_le_bytes([cpd[8], cpd[9], cpd[10], cpd[11]]);
	let bit_count = u16::from_le_bytes([cpd[14], cpd[15]]);
	Ok(BitmapInfoHeader {
		width,
		height,
		bit_count,
	})
}

/// Recovered resolution, codec-agnostic, for callers that only need
/// width/height out of whatever container form the CPD arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
	pub width: u32,
	pub height: u32,
}

/// Dispatches on the leading bytes of `cpd` per the container-detection
/// rules (`01` => avcC/hvcC, Annex-B start code => raw Annex-B, else BIH) and
/// returns the resolution encoded within.
pub fn parse_video_resolution(cpd: &[u8], is_hevc: bool) -> Result<Resolution> {
	if cpd.len() >= 40 {
		let bi_size = u32::from_le_bytes([cpd[0], cpd[1], cpd[2], cpd[3]]);
		if bi_size == 40 {
			let bih = parse_bitmap_info_header(cpd)?;
			return Ok(Resolution {
				width: bih.width.unsigned_abs(),
				height: bih.height.unsigned_abs(),
			});
		}
	}

	let sps_nal = nal::extract_first_sps(cpd, is_hevc)?;
	let rbsp = strip_emulation_prevention(&sps_nal);
	if is_hevc {
		let sps = parse_h265_sps(&rbsp)?;
		Ok(Resolution {
			width: sps.width,
			height: sps.height,
		})
	} else {
		let sps = parse_h264_sps(&rbsp)?;
		Ok(Resolution {
			width: sps.width,
			height: sps.height,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aac_lc_stereo_44100() {
		let config = parse_aac_config(&[0x12, 0x10]).unwrap();
		assert_eq!(config.object_type, 2); // AAC LC
		assert_eq!(config.sampling_hz, 44100);
		assert_eq!(config.channels, 2);
	}

	#[test]
	fn bih_rejects_short_input() {
		assert_eq!(parse_bitmap_info_header(&[0u8; 10]).unwrap_err(), Error::InvalidBihCpd);
	}
}

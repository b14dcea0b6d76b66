//! Canonical Matroska element IDs, encoded as their raw EBML byte sequences
//! (the ID itself is already a vint with its marker bit set — it is never
//! re-derived from an integer via [`crate::ebml::encode_vlen`]).

pub const EBML: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
pub const EBML_VERSION: &[u8] = &[0x42, 0x86];
pub const EBML_READ_VERSION: &[u8] = &[0x42, 0xF7];
pub const EBML_MAX_ID_LENGTH: &[u8] = &[0x42, 0xF2];
pub const EBML_MAX_SIZE_LENGTH: &[u8] = &[0x42, 0xF3];
pub const DOC_TYPE: &[u8] = &[0x42, 0x82];
pub const DOC_TYPE_VERSION: &[u8] = &[0x42, 0x87];
pub const DOC_TYPE_READ_VERSION: &[u8] = &[0x42, 0x85];

pub const SEGMENT: &[u8] = &[0x18, 0x53, 0x80, 0x67];

pub const SEGMENT_INFO: &[u8] = &[0x15, 0x49, 0xA9, 0x66];
pub const TIMECODE_SCALE: &[u8] = &[0x2A, 0xD7, 0xB1];
pub const MUXING_APP: &[u8] = &[0x4D, 0x80];
pub const WRITING_APP: &[u8] = &[0x57, 0x41];
pub const DURATION: &[u8] = &[0x44, 0x89];

pub const TRACKS: &[u8] = &[0x16, 0x54, 0xAE, 0x6B];
pub const TRACK_ENTRY: &[u8] = &[0xAE];
pub const TRACK_NUMBER: &[u8] = &[0xD7];
pub const TRACK_UID: &[u8] = &[0x73, 0xC5];
pub const TRACK_TYPE: &[u8] = &[0x83];
pub const FLAG_LACING: &[u8] = &[0x9C];
pub const CODEC_ID: &[u8] = &[0x86];
pub const CODEC_PRIVATE: &[u8] = &[0x63, 0xA2];
pub const NAME: &[u8] = &[0x53, 0x6E];

pub const VIDEO: &[u8] = &[0xE0];
pub const PIXEL_WIDTH: &[u8] = &[0xB0];
pub const PIXEL_HEIGHT: &[u8] = &[0xBA];

pub const AUDIO: &[u8] = &[0xE1];
pub const SAMPLING_FREQUENCY: &[u8] = &[0xB5];
pub const CHANNELS: &[u8] = &[0x9F];
pub const BIT_DEPTH: &[u8] = &[0x62, 0x64];

pub const CLUSTER: &[u8] = &[0x1F, 0x43, 0xB6, 0x75];
pub const TIMECODE: &[u8] = &[0xE7];
pub const SIMPLE_BLOCK: &[u8] = &[0xA3];

pub const TAGS: &[u8] = &[0x12, 0x54, 0xC3, 0x67];
pub const TAG: &[u8] = &[0x73, 0x73];
pub const TARGETS: &[u8] = &[0x63, 0xC0];
pub const SIMPLE_TAG: &[u8] = &[0x67, 0xC8];
pub const TAG_NAME: &[u8] = &[0x45, 0xA3];
pub const TAG_STRING: &[u8] = &[0x44, 0x87];

pub const VOID: &[u8] = &[0xEC];

/// SimpleBlock flag bits (single-byte flags octet, laconic lacing unused).
pub mod block_flags {
	pub const KEY_FRAME: u8 = 0x80;
	pub const INVISIBLE: u8 = 0x08;
	pub const DISCARDABLE: u8 = 0x01;
}

//! Shared input types for the packager: the frame an application hands to
//! `put_frame`, and the per-track configuration the generator packages it
//! against.

/// Bit flags on a [`Frame`]. Plain `u8` constants rather than a bitflags
/// crate — four bits doesn't earn the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
	pub const NONE: u8 = 0;
	pub const KEY_FRAME: u8 = 0b0001;
	pub const DISCARDABLE: u8 = 0b0010;
	pub const INVISIBLE: u8 = 0b0100;
	pub const END_OF_FRAGMENT: u8 = 0b1000;

	pub fn contains(&self, bit: u8) -> bool {
		self.0 & bit == bit
	}
}

/// One encoded access unit, timestamped in 100-ns ticks.
#[derive(Debug, Clone)]
pub struct Frame {
	pub presentation_ts: u64,
	pub decoding_ts: u64,
	pub duration: u64,
	pub flags: FrameFlags,
	pub track_id: u64,
	pub payload: bytes::Bytes,
}

impl Frame {
	pub fn is_key_frame(&self) -> bool {
		self.flags.contains(FrameFlags::KEY_FRAME)
	}

	pub fn is_end_of_fragment(&self) -> bool {
		self.flags.contains(FrameFlags::END_OF_FRAGMENT)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
	Video,
	Audio,
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
	pub width: u32,
	pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
	pub sampling_hz: u32,
	pub channels: u8,
	pub bit_depth: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMedia {
	Video(VideoInfo),
	Audio(AudioInfo),
	None,
}

/// Per-track configuration and, once known, codec parameters. The
/// generator writes `codec_private_data` and the video/audio fields back
/// in here when it extracts them from a key frame's inline parameter sets.
#[derive(Debug, Clone)]
pub struct TrackInfo {
	pub track_id: u64,
	pub codec_id: String,
	pub track_name: String,
	pub track_type: TrackKind,
	pub codec_private_data: Option<bytes::Bytes>,
	pub media: TrackMedia,
}

impl TrackInfo {
	pub fn is_hevc(&self) -> bool {
		self.codec_id.eq_ignore_ascii_case("V_MPEGH/ISO/HEVC")
	}

	pub fn is_avc(&self) -> bool {
		self.codec_id.eq_ignore_ascii_case("V_MPEG4/ISO/AVC")
	}
}

pub mod generator;
pub mod ids;

pub use crate::model::{AudioInfo, Frame, FrameFlags, TrackInfo, TrackKind, TrackMedia, VideoInfo};

/// Which in-place transforms the generator applies to a frame's payload
/// and/or codec-private data before packaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NalAdaptationMask {
	#[default]
	None,
	AnnexBNals,
	AnnexBCpdNals,
	AvccNals,
}

/// A well-formed `Tags` master containing a single `SimpleTag`, producible
/// outside the normal frame stream.
#[derive(Debug, Clone)]
pub struct Tag {
	pub name: String,
	pub value: String,
}

impl Tag {
	pub const MAX_LEN: usize = 128;
}

/// One unit of packaged output from the generator.
#[derive(Debug, Clone)]
pub struct PackagedFrame {
	pub bytes: bytes::Bytes,
	pub fragment_start: bool,
	pub cluster_start: bool,
	pub stream_start: bool,
	pub fragment_pts: u64,
	pub fragment_dts: u64,
	pub session_sequence: u64,
}

/// Errors raised while packaging frames into Matroska, adapting NAL framing,
/// or parsing codec-private data.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	#[error("buffer too small: need {need}, have {have}")]
	BufferTooSmall { need: usize, have: usize },

	#[error("no NAL start code found")]
	NoStartCode,

	#[error("NAL length prefix overruns buffer")]
	TruncatedNal,

	#[error("missing parameter sets for codec private data")]
	MissingParameterSets,

	#[error("invalid codec private data")]
	InvalidCpd,

	#[error("invalid BITMAPINFOHEADER codec private data")]
	InvalidBihCpd,

	#[error("frame timecode exceeds the 16-bit signed cluster-relative range")]
	LargeFrameTimecode,

	#[error("generator is not in a state that accepts this operation")]
	InvalidState,

	#[error("track id {0} is not known to this generator")]
	UnknownTrack(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the content store, content view, stream, and client.
/// Variant names follow the error-kind taxonomy the frame/ack pipeline is
/// specified against, not Rust naming convention, so callers can map them
/// back to the taxonomy directly.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArg(String),

	#[error("out of range: {0}")]
	OutOfRange(String),

	#[error("not enough memory in the content store")]
	NotEnoughMemory,

	#[error("stream is not in a state that accepts frames")]
	StreamNotReady,

	#[error("frame payload is empty")]
	EmptyPayload,

	#[error("decoding timestamp went backwards for this track")]
	NonMonotonicDts,

	#[error("presentation timestamp precedes decoding timestamp")]
	PresentationBeforeDecoding,

	#[error("decoding timestamp jumped by more than 2^45 relative to the last frame")]
	DtsDiscontinuity,

	#[error(transparent)]
	Mux(#[from] reel_mux::Error),

	#[error("unknown upload session handle {0}")]
	UnknownUploadSession(u64),

	#[error("unknown stream handle {0}")]
	UnknownStream(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

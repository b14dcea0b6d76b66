mod metrics;
mod stream_info;

pub use metrics::StreamMetrics;
pub use stream_info::{
	ContentStorePressurePolicy, ContentViewOverflowPolicy, FrameOrderMode, StreamInfo, StreamState, StreamingType,
};

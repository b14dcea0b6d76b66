//! Host-supplied hooks for stream lifecycle events. All methods default to
//! a no-op so applications only override what they care about.

use crate::model::{StreamMetrics, StreamState};

pub trait ProducerCallbacks: Send + Sync {
	fn on_stream_ready(&self, _stream_id: u64) {}

	fn on_stream_closed(&self, _stream_id: u64, _state: StreamState) {}

	fn on_data_available(&self, _stream_id: u64, _duration_available: std::time::Duration) {}

	fn on_connection_stale(&self, _stream_id: u64, _last_ack_age: std::time::Duration) {}

	fn on_latency_pressure(&self, _stream_id: u64, _current_latency: std::time::Duration) {}

	fn on_buffer_duration_overflow(&self, _stream_id: u64, _overflow_by: std::time::Duration) {}

	fn on_fragment_ack(&self, _stream_id: u64, _fragment_timecode: u64) {}

	fn on_dropped_frame(&self, _stream_id: u64, _track_id: u64, _presentation_ts: u64) {}

	fn on_dropped_fragment(&self, _stream_id: u64, _fragment_timecode: u64) {}

	fn on_stream_error(&self, _stream_id: u64, _error: &crate::Error) {}

	fn on_storage_overflow(&self, _stream_id: u64, _bytes_dropped: u64) {}

	fn on_metrics(&self, _stream_id: u64, _metrics: StreamMetrics) {}
}

/// A callback set that logs every event via `tracing` and otherwise does
/// nothing. Used as the default when the host doesn't supply one.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallbacks;

impl ProducerCallbacks for TracingCallbacks {
	fn on_stream_ready(&self, stream_id: u64) {
		tracing::info!(stream_id, "stream-ready");
	}

	fn on_stream_closed(&self, stream_id: u64, state: StreamState) {
		tracing::info!(stream_id, ?state, "stream-closed");
	}

	fn on_connection_stale(&self, stream_id: u64, last_ack_age: std::time::Duration) {
		tracing::warn!(stream_id, ?last_ack_age, "connection-stale");
	}

	fn on_dropped_frame(&self, stream_id: u64, track_id: u64, presentation_ts: u64) {
		tracing::warn!(stream_id, track_id, presentation_ts, "dropped-frame");
	}

	fn on_dropped_fragment(&self, stream_id: u64, fragment_timecode: u64) {
		tracing::warn!(stream_id, fragment_timecode, "dropped-fragment");
	}

	fn on_stream_error(&self, stream_id: u64, error: &crate::Error) {
		tracing::error!(stream_id, %error, "stream-error");
	}

	fn on_storage_overflow(&self, stream_id: u64, bytes_dropped: u64) {
		tracing::warn!(stream_id, bytes_dropped, "storage-overflow");
	}
}

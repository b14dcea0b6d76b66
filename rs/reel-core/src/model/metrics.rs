use std::time::Duration;

/// A point-in-time snapshot of a stream's buffering state, recomputed on
/// demand from the content view and content store rather than tracked
/// incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamMetrics {
	pub current_view_duration: Duration,
	pub overall_view_duration: Duration,
	pub current_view_size: u64,
	pub overall_view_size: u64,
	pub current_buffer_duration: Duration,
	pub overall_buffer_duration: Duration,
	pub buffer_size: u64,
	pub content_store_available_size: u64,
}

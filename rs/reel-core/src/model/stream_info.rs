use std::time::Duration;

use reel_mux::{NalAdaptationMask, TrackInfo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingType {
	Realtime,
	Offline,
	NearRealtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentStorePressurePolicy {
	DropTailItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentViewOverflowPolicy {
	DropUntilFragmentStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrderMode {
	SingleTrack,
	MultiTrackInterleave,
}

/// Configuration for one stream, supplied by the host application when it
/// calls `Client::create_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct StreamInfo {
	pub stream_name: String,
	pub retention: Duration,
	pub streaming_type: StreamingType,
	pub content_type: String,
	pub max_latency: Duration,
	pub target_fragment_duration: Duration,
	/// Nanoseconds per Matroska tick.
	pub timecode_scale_ns: u64,
	pub key_frame_fragmentation: bool,
	pub absolute_timecode: bool,
	pub fragment_ack_required: bool,
	pub replay_duration: Duration,
	pub connection_staleness_threshold: Duration,
	pub buffer_duration: Duration,
	pub average_bandwidth_bps: u64,
	pub content_store_pressure_policy: ContentStorePressurePolicy,
	pub content_view_overflow_policy: ContentViewOverflowPolicy,
	#[serde(skip)]
	pub nal_adaptation_mask: NalAdaptationMask,
	pub frame_order_mode: FrameOrderMode,
	#[serde(skip)]
	pub tracks: Vec<TrackInfo>,
}

impl Default for StreamInfo {
	fn default() -> Self {
		Self {
			stream_name: String::new(),
			retention: Duration::ZERO,
			streaming_type: StreamingType::Realtime,
			content_type: "video/x-matroska".to_string(),
			max_latency: Duration::from_secs(60),
			target_fragment_duration: Duration::from_secs(2),
			timecode_scale_ns: 1_000_000,
			key_frame_fragmentation: false,
			absolute_timecode: false,
			fragment_ack_required: true,
			replay_duration: Duration::from_secs(40),
			connection_staleness_threshold: Duration::from_secs(30),
			buffer_duration: Duration::from_secs(120),
			average_bandwidth_bps: 4_000_000,
			content_store_pressure_policy: ContentStorePressurePolicy::DropTailItem,
			content_view_overflow_policy: ContentViewOverflowPolicy::DropUntilFragmentStart,
			nal_adaptation_mask: NalAdaptationMask::None,
			frame_order_mode: FrameOrderMode::SingleTrack,
			tracks: Vec::new(),
		}
	}
}

impl StreamInfo {
	pub fn validate(&self) -> Result<(), crate::Error> {
		if self.tracks.is_empty() || self.tracks.len() > 8 {
			return Err(crate::Error::OutOfRange("tracks must be 1..=8".to_string()));
		}
		Ok(())
	}

	pub fn primary_video_track(&self) -> Option<u64> {
		self.tracks
			.iter()
			.find(|t| t.track_type == reel_mux::TrackKind::Video)
			.map(|t| t.track_id)
	}
}

/// Internal lifecycle state of a [`crate::stream::Stream`], read-only to the
/// application via `Stream::state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamState {
	New,
	Ready,
	Streaming,
	Stopped,
	Error,
}

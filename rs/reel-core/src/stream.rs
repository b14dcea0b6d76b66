//! Per-stream state machine: frame packaging, content-view feeding, and ACK
//! processing. One [`Stream`] is created per `Client::create_stream` call and
//! is driven exclusively by its owning [`crate::client::Client`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reel_mux::{Frame, Generator, GeneratorConfig, PackagedFrame, TrackInfo};

use crate::callback::ProducerCallbacks;
use crate::error::{Error, Result};
use crate::model::{FrameOrderMode, StreamInfo, StreamMetrics, StreamState};
use crate::store::ContentStore;
use crate::view::{self, ContentViewConsumer, ContentViewProducer, EntryFlags};

/// What `Stream::put_frame` actually did with the frame it was handed.
#[derive(Debug, Clone)]
pub enum PutFrameOutcome {
	Packaged(PackagedFrame),
	/// The content store or content view was under pressure and this frame
	/// was discarded per the stream's configured drop policy.
	Dropped,
	/// `frame_order_mode: multi-track-interleave` only: the frame is held
	/// pending a peer track's frame before it can be ordered and packaged.
	Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
	Buffering,
	Received,
	Persisted,
	Error { code: u32 },
	Idle,
}

#[derive(Debug, Clone)]
pub struct Ack {
	pub kind: AckKind,
	pub fragment_timecode: u64,
	pub message: Option<String>,
}

const CONTENT_VIEW_ENTRY_CAPACITY: usize = 4096;

/// Largest allowed per-track dts step between consecutive frames, `2^45`.
const MAX_DTS_STEP: u64 = 1 << 45;

pub struct Stream {
	stream_id: u64,
	info: StreamInfo,
	state: StreamState,
	generator: Generator,
	tracks: Vec<TrackInfo>,
	store: Arc<ContentStore>,
	view: ContentViewProducer,
	callbacks: Arc<dyn ProducerCallbacks>,
	last_dts_by_track: HashMap<u64, u64>,
	last_ack_at: Option<Instant>,
	stale_notified: bool,
	metrics: StreamMetrics,
	/// `frame_order_mode: multi-track-interleave` only: at most one
	/// not-yet-released frame per track, keyed by `track_id`.
	pending_frames: HashMap<u64, Frame>,
}

impl Stream {
	pub fn new(stream_id: u64, info: StreamInfo, store: Arc<ContentStore>, callbacks: Arc<dyn ProducerCallbacks>) -> Result<(Self, ContentViewConsumer)> {
		info.validate()?;
		let primary_video_track = info.primary_video_track();
		let generator_config = GeneratorConfig {
			timecode_scale_ns: info.timecode_scale_ns,
			target_fragment_duration: to_100ns_ticks(info.target_fragment_duration),
			key_frame_fragmentation: info.key_frame_fragmentation,
			nal_adaptation_mask: info.nal_adaptation_mask,
		};
		let generator = Generator::new(generator_config, primary_video_track);
		let tracks = info.tracks.clone();
		let (view, consumer) = view::new(store.clone(), CONTENT_VIEW_ENTRY_CAPACITY);

		let stream = Self {
			stream_id,
			info,
			state: StreamState::New,
			generator,
			tracks,
			store,
			view,
			callbacks,
			last_dts_by_track: HashMap::new(),
			last_ack_at: None,
			stale_notified: false,
			metrics: StreamMetrics::default(),
			pending_frames: HashMap::new(),
		};
		Ok((stream, consumer))
	}

	pub fn id(&self) -> u64 {
		self.stream_id
	}

	pub fn state(&self) -> StreamState {
		self.state
	}

	pub fn new_consumer(&self) -> ContentViewConsumer {
		self.view.new_consumer()
	}

	/// Called by the upload-session layer once endpoint discovery and
	/// authentication have succeeded; frames are rejected before this.
	pub fn mark_ready(&mut self) {
		if self.state == StreamState::New {
			self.state = StreamState::Ready;
		}
	}

	/// Packages one frame and appends it to the content view.
	///
	/// 1. stream must be `Ready` or later
	/// 2. payload must be non-empty
	/// 3. pts must be >= dts
	/// 4. dts must be monotonic non-decreasing per track, within `±2^45`
	/// 5. `multi-track-interleave` mode buffers the frame until every track
	///    has one pending, then releases them in cross-track dts order
	/// 6. content-store pressure is checked before allocating
	/// 7. the frame is packaged via the MKV generator
	/// 8. the packaged bytes are appended to the content view and metrics updated
	#[tracing::instrument(skip(self, frame), fields(stream_id = self.stream_id, track_id = frame.track_id))]
	pub fn put_frame(&mut self, frame: &Frame) -> Result<PutFrameOutcome> {
		if self.state < StreamState::Ready {
			return Err(Error::StreamNotReady);
		}
		if frame.payload.is_empty() {
			return Err(Error::EmptyPayload);
		}
		if frame.presentation_ts < frame.decoding_ts {
			return Err(Error::PresentationBeforeDecoding);
		}
		if let Some(&last) = self.last_dts_by_track.get(&frame.track_id) {
			if frame.decoding_ts <= last {
				return Err(Error::NonMonotonicDts);
			}
			if frame.decoding_ts - last > MAX_DTS_STEP {
				return Err(Error::DtsDiscontinuity);
			}
		}

		if self.info.frame_order_mode == FrameOrderMode::MultiTrackInterleave && self.tracks.len() > 1 {
			return self.put_frame_interleaved(frame);
		}
		self.package_and_append(frame)
	}

	/// Buffers `frame` against its peer tracks and releases whichever
	/// pending frame sorts first by `(decoding_ts, track_id)` once every
	/// track has one buffered. If this track already had a frame pending,
	/// that frame is released immediately instead of being dropped, out of
	/// strict cross-track order.
	fn put_frame_interleaved(&mut self, frame: &Frame) -> Result<PutFrameOutcome> {
		if let Some(evicted) = self.pending_frames.insert(frame.track_id, frame.clone()) {
			return self.package_and_append(&evicted);
		}
		if self.pending_frames.len() < self.tracks.len() {
			return Ok(PutFrameOutcome::Buffered);
		}
		let release_track_id = *self
			.pending_frames
			.iter()
			.min_by_key(|(&track_id, pending)| (pending.decoding_ts, track_id))
			.map(|(track_id, _)| track_id)
			.expect("pending_frames is non-empty");
		let release_frame = self.pending_frames.remove(&release_track_id).expect("just selected");
		self.package_and_append(&release_frame)
	}

	fn package_and_append(&mut self, frame: &Frame) -> Result<PutFrameOutcome> {
		if self.store.capacity_available() < frame.payload.len() {
			// DROP_TAIL_ITEM: free up this stream's own newest, not-yet-acked
			// bytes before giving up on the incoming frame.
			let freed = self.view.evict_tail_for_pressure(frame.payload.len());
			let available = self.store.capacity_available();
			if freed > 0 {
				self.callbacks.on_storage_overflow(self.stream_id, available as u64);
			}
			if available < frame.payload.len() {
				self.callbacks.on_dropped_frame(self.stream_id, frame.track_id, frame.presentation_ts);
				return Ok(PutFrameOutcome::Dropped);
			}
		}

		let packaged = self.generator.put_frame(frame, &mut self.tracks)?;
		self.last_dts_by_track.insert(frame.track_id, frame.decoding_ts);

		let mut flags = EntryFlags(EntryFlags::NONE);
		if packaged.fragment_start {
			flags = EntryFlags(flags.0 | EntryFlags::FRAGMENT_START);
		}
		self.view
			.append(&packaged.bytes, frame.duration, packaged.fragment_dts, flags)?;

		self.metrics.current_view_size = self.view.tail_offset() - self.view.head_offset();
		self.metrics.overall_view_size += packaged.bytes.len() as u64;
		self.metrics.content_store_available_size = self.store.capacity_available() as u64;

		if self.state == StreamState::Ready {
			self.state = StreamState::Streaming;
			self.callbacks.on_stream_ready(self.stream_id);
		}
		self.callbacks
			.on_data_available(self.stream_id, Duration::from_nanos(frame.duration * 100));

		Ok(PutFrameOutcome::Packaged(packaged))
	}

	/// Releases any frames still buffered by `multi-track-interleave`
	/// ordering, in cross-track dts order, so nothing is silently lost when
	/// the stream stops.
	fn flush_pending_frames(&mut self) {
		let mut pending: Vec<Frame> = self.pending_frames.drain().map(|(_, frame)| frame).collect();
		pending.sort_by_key(|frame| (frame.decoding_ts, frame.track_id));
		for frame in pending {
			if let Err(err) = self.package_and_append(&frame) {
				self.callbacks.on_stream_error(self.stream_id, &err);
			}
		}
	}

	#[tracing::instrument(skip(self, ack), fields(stream_id = self.stream_id))]
	pub fn process_ack(&mut self, ack: &Ack) {
		self.last_ack_at = Some(Instant::now());
		self.stale_notified = false;
		match ack.kind {
			AckKind::Buffering | AckKind::Received => {
				// Informational only; no state change required.
			}
			AckKind::Persisted => {
				self.view.trim_to_fragment_ack(ack.fragment_timecode);
				self.callbacks.on_fragment_ack(self.stream_id, ack.fragment_timecode);
			}
			AckKind::Error { code } => {
				tracing::warn!(code, message = ?ack.message, "fragment-ack-error");
				self.callbacks.on_dropped_fragment(self.stream_id, ack.fragment_timecode);
			}
			AckKind::Idle => {}
		}
	}

	pub fn is_connection_stale(&self, now: Instant) -> bool {
		match self.last_ack_at {
			Some(last) => now.duration_since(last) >= self.info.connection_staleness_threshold,
			None => false,
		}
	}

	/// Fires [`ProducerCallbacks::on_connection_stale`] once per staleness
	/// episode: the callback runs the first time `now` crosses the
	/// configured threshold since the last ack, and stays quiet on
	/// subsequent polls until an ack arrives and resets the episode.
	pub fn check_connection_staleness(&mut self, now: Instant) {
		let Some(last) = self.last_ack_at else {
			return;
		};
		let age = now.duration_since(last);
		if age >= self.info.connection_staleness_threshold {
			if !self.stale_notified {
				self.stale_notified = true;
				self.callbacks.on_connection_stale(self.stream_id, age);
			}
		} else {
			self.stale_notified = false;
		}
	}

	/// Resets the packager without discarding buffered data, used when the
	/// upload session must reconnect after a retriable network failure.
	pub fn reset_connection(&mut self) {
		self.generator.reset();
		self.last_ack_at = None;
		tracing::info!(stream_id = self.stream_id, "stream-connection-reset");
	}

	pub fn metrics(&self) -> StreamMetrics {
		self.metrics
	}

	pub fn stop(&mut self) {
		self.flush_pending_frames();
		self.generator.close();
		self.state = StreamState::Stopped;
		self.callbacks.on_stream_closed(self.stream_id, self.state);
	}
}

fn to_100ns_ticks(duration: Duration) -> u64 {
	(duration.as_nanos() / 100) as u64
}

#[cfg(test)]
mod tests {
	use super::*;
	use reel_mux::{FrameFlags, TrackKind, TrackMedia};

	fn video_track() -> TrackInfo {
		TrackInfo {
			track_id: 1,
			codec_id: "V_MPEG4/ISO/AVC".to_string(),
			track_name: String::new(),
			track_type: TrackKind::Video,
			codec_private_data: None,
			media: TrackMedia::None,
		}
	}

	fn key_frame(track_id: u64, dts: u64) -> Frame {
		let sps_pps_idr = [
			0, 0, 0, 1, 0x67, 0x42, 0x40, 0x1F, 0x96, 0x54, 0x02, 0x80, 0x2D, 0xC8, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, 0, 0, 0, 1, 0x65, 0xAA,
			0xBB,
		];
		Frame {
			presentation_ts: dts,
			decoding_ts: dts,
			duration: 33,
			flags: FrameFlags(FrameFlags::KEY_FRAME),
			track_id,
			payload: bytes::Bytes::copy_from_slice(&sps_pps_idr),
		}
	}

	fn stream() -> (Stream, ContentViewConsumer) {
		let mut info = StreamInfo {
			tracks: vec![video_track()],
			..Default::default()
		};
		info.nal_adaptation_mask = reel_mux::NalAdaptationMask::AnnexBNals;
		let store = Arc::new(ContentStore::new(1 << 20));
		let (mut stream, consumer) = Stream::new(1, info, store, Arc::new(crate::callback::TracingCallbacks)).unwrap();
		stream.mark_ready();
		(stream, consumer)
	}

	fn audio_track() -> TrackInfo {
		TrackInfo {
			track_id: 2,
			codec_id: "A_AAC".to_string(),
			track_name: String::new(),
			track_type: TrackKind::Audio,
			codec_private_data: Some(bytes::Bytes::from_static(&[0x12, 0x10])),
			media: TrackMedia::None,
		}
	}

	fn audio_frame(dts: u64) -> Frame {
		Frame {
			presentation_ts: dts,
			decoding_ts: dts,
			duration: 20,
			flags: FrameFlags(FrameFlags::NONE),
			track_id: 2,
			payload: bytes::Bytes::from_static(&[0xAB, 0xCD]),
		}
	}

	fn interleaved_stream() -> (Stream, ContentViewConsumer) {
		let mut info = StreamInfo {
			tracks: vec![video_track(), audio_track()],
			frame_order_mode: crate::model::FrameOrderMode::MultiTrackInterleave,
			..Default::default()
		};
		info.nal_adaptation_mask = reel_mux::NalAdaptationMask::AnnexBNals;
		let store = Arc::new(ContentStore::new(1 << 20));
		let (mut stream, consumer) = Stream::new(1, info, store, Arc::new(crate::callback::TracingCallbacks)).unwrap();
		stream.mark_ready();
		(stream, consumer)
	}

	#[test]
	fn first_frame_transitions_to_streaming() {
		let (mut stream, _consumer) = stream();
		let outcome = stream.put_frame(&key_frame(1, 0)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Packaged(_)));
		assert_eq!(stream.state(), StreamState::Streaming);
	}

	#[test]
	fn non_monotonic_dts_is_rejected() {
		let (mut stream, _consumer) = stream();
		stream.put_frame(&key_frame(1, 1000)).unwrap();
		let err = stream.put_frame(&key_frame(1, 500)).unwrap_err();
		assert_eq!(err, Error::NonMonotonicDts);
	}

	#[test]
	fn equal_dts_is_rejected() {
		let (mut stream, _consumer) = stream();
		stream.put_frame(&key_frame(1, 1000)).unwrap();
		let err = stream.put_frame(&key_frame(1, 1000)).unwrap_err();
		assert_eq!(err, Error::NonMonotonicDts);
	}

	#[test]
	fn dts_jump_beyond_2_45_is_rejected() {
		let (mut stream, _consumer) = stream();
		stream.put_frame(&key_frame(1, 0)).unwrap();
		let err = stream.put_frame(&key_frame(1, MAX_DTS_STEP + 1)).unwrap_err();
		assert_eq!(err, Error::DtsDiscontinuity);
	}

	#[test]
	fn dts_jump_at_exactly_2_45_is_accepted() {
		let (mut stream, _consumer) = stream();
		stream.put_frame(&key_frame(1, 0)).unwrap();
		let outcome = stream.put_frame(&key_frame(1, MAX_DTS_STEP)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Packaged(_)));
	}

	#[test]
	fn persisted_ack_trims_view() {
		let (mut stream, _consumer) = stream();
		let outcome = stream.put_frame(&key_frame(1, 0)).unwrap();
		let PutFrameOutcome::Packaged(packaged) = outcome else {
			panic!("expected the frame to be packaged");
		};
		let tail = stream.view.tail_offset();
		stream.process_ack(&Ack {
			kind: AckKind::Persisted,
			fragment_timecode: packaged.fragment_dts,
			message: None,
		});
		assert_eq!(stream.view.head_offset(), tail);
	}

	#[test]
	fn persisted_ack_for_unknown_fragment_is_a_no_op() {
		let (mut stream, _consumer) = stream();
		stream.put_frame(&key_frame(1, 0)).unwrap();
		let head_before = stream.view.head_offset();
		stream.process_ack(&Ack {
			kind: AckKind::Persisted,
			fragment_timecode: 0xDEAD_BEEF,
			message: None,
		});
		assert_eq!(stream.view.head_offset(), head_before);
	}

	#[test]
	fn storage_pressure_drops_frame() {
		let (mut stream, _consumer) = stream();
		// Exhaust the store with a direct allocation to force the next
		// put_frame to observe NotEnoughMemory-level pressure.
		let huge = stream.store.capacity_available();
		let handle = stream.store.alloc(huge).unwrap();
		let outcome = stream.put_frame(&key_frame(1, 0)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Dropped));
		stream.store.free(handle);
	}

	#[test]
	fn check_connection_staleness_fires_once_per_episode() {
		use std::sync::atomic::{AtomicUsize, Ordering};

		#[derive(Default)]
		struct CountingCallbacks(AtomicUsize);
		impl ProducerCallbacks for CountingCallbacks {
			fn on_connection_stale(&self, _stream_id: u64, _last_ack_age: Duration) {
				self.0.fetch_add(1, Ordering::SeqCst);
			}
		}

		let mut info = StreamInfo {
			tracks: vec![video_track()],
			connection_staleness_threshold: Duration::from_millis(10),
			..Default::default()
		};
		info.nal_adaptation_mask = reel_mux::NalAdaptationMask::AnnexBNals;
		let store = Arc::new(ContentStore::new(1 << 20));
		let callbacks = Arc::new(CountingCallbacks::default());
		let (mut stream, _consumer) = Stream::new(1, info, store, callbacks.clone()).unwrap();
		stream.mark_ready();
		stream.put_frame(&key_frame(1, 0)).unwrap();
		stream.process_ack(&Ack {
			kind: AckKind::Buffering,
			fragment_timecode: 0,
			message: None,
		});

		let past_threshold = Instant::now() + Duration::from_millis(50);
		stream.check_connection_staleness(past_threshold);
		stream.check_connection_staleness(past_threshold);
		assert_eq!(callbacks.0.load(Ordering::SeqCst), 1);

		stream.process_ack(&Ack {
			kind: AckKind::Buffering,
			fragment_timecode: 0,
			message: None,
		});
		stream.check_connection_staleness(past_threshold + Duration::from_millis(50));
		assert_eq!(callbacks.0.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn storage_pressure_evicts_tail_before_dropping() {
		let (mut stream, _consumer) = stream();
		// Buffer one fragment, then exhaust every remaining byte directly so
		// the next put_frame has nothing to allocate from.
		stream.put_frame(&key_frame(1, 0)).unwrap();
		let remaining = stream.store.capacity_available();
		let handle = stream.store.alloc(remaining).unwrap();
		assert_eq!(stream.store.capacity_available(), 0);

		// DROP_TAIL_ITEM should free the already-buffered fragment, making
		// room for the new one instead of dropping it outright.
		let outcome = stream.put_frame(&key_frame(1, 33)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Packaged(_)));
		stream.store.free(handle);
	}

	#[test]
	fn interleave_buffers_until_every_track_has_a_pending_frame() {
		let (mut stream, _consumer) = interleaved_stream();
		let outcome = stream.put_frame(&key_frame(1, 100)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Buffered));
	}

	#[test]
	fn interleave_releases_lowest_dts_frame_first() {
		let (mut stream, _consumer) = interleaved_stream();
		stream.put_frame(&key_frame(1, 100)).unwrap();
		let outcome = stream.put_frame(&audio_frame(50)).unwrap();
		match outcome {
			PutFrameOutcome::Packaged(packaged) => assert_eq!(packaged.fragment_dts, 50),
			other => panic!("expected the lower-dts audio frame to release first, got {other:?}"),
		}
	}

	#[test]
	fn interleave_ties_break_on_ascending_track_id() {
		let (mut stream, _consumer) = interleaved_stream();
		stream.put_frame(&key_frame(1, 100)).unwrap();
		let outcome = stream.put_frame(&audio_frame(100)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Packaged(_)));
		// track 1 (video) sorts before track 2 (audio) at equal dts, so it
		// is the one released, leaving the audio frame still pending.
		assert!(!stream.pending_frames.contains_key(&1));
		assert!(stream.pending_frames.contains_key(&2));
	}

	#[test]
	fn interleave_flushes_pending_frames_on_stop() {
		let (mut stream, _consumer) = interleaved_stream();
		let outcome = stream.put_frame(&key_frame(1, 100)).unwrap();
		assert!(matches!(outcome, PutFrameOutcome::Buffered));
		stream.stop();
		// The lone pending video frame was flushed into the view rather
		// than lost, so the view is no longer empty.
		assert!(stream.view.tail_offset() > stream.view.head_offset());
	}

	#[test]
	fn interleave_releases_second_frame_on_same_track_immediately() {
		let (mut stream, _consumer) = interleaved_stream();
		stream.put_frame(&key_frame(1, 100)).unwrap();
		// A second video frame arrives before any audio frame; the first
		// should be released now instead of being dropped.
		let outcome = stream.put_frame(&key_frame(1, 200)).unwrap();
		match outcome {
			PutFrameOutcome::Packaged(packaged) => assert_eq!(packaged.fragment_dts, 100),
			other => panic!("expected the displaced video frame to release, got {other:?}"),
		}
	}
}

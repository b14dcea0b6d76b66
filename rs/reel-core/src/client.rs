//! Owns the shared content store and the set of active streams. One
//! [`Client`] corresponds to one producer identity against the ingestion
//! service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reel_mux::Frame;

use crate::callback::{ProducerCallbacks, TracingCallbacks};
use crate::error::{Error, Result};
use crate::model::{StreamInfo, StreamMetrics};
use crate::store::ContentStore;
use crate::stream::{Ack, PutFrameOutcome, Stream};
use crate::view::ContentViewConsumer;

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub content_store_size: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			content_store_size: 64 * 1024 * 1024,
		}
	}
}

/// A handle-based registry of streams, avoiding the cyclic
/// `Client -> Stream -> Client` references a naive ownership model would
/// need for callbacks and shared storage.
pub struct Client {
	store: Arc<ContentStore>,
	streams: parking_lot::RwLock<HashMap<u64, Stream>>,
	next_stream_id: AtomicU64,
	callbacks: Arc<dyn ProducerCallbacks>,
}

impl Client {
	pub fn new(config: ClientConfig) -> Self {
		Self::with_callbacks(config, Arc::new(TracingCallbacks))
	}

	pub fn with_callbacks(config: ClientConfig, callbacks: Arc<dyn ProducerCallbacks>) -> Self {
		Self {
			store: Arc::new(ContentStore::new(config.content_store_size)),
			streams: parking_lot::RwLock::new(HashMap::new()),
			next_stream_id: AtomicU64::new(1),
			callbacks,
		}
	}

	pub fn create_stream(&self, info: StreamInfo) -> Result<(u64, ContentViewConsumer)> {
		let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
		let (mut stream, consumer) = Stream::new(stream_id, info, self.store.clone(), self.callbacks.clone())?;
		stream.mark_ready();
		self.streams.write().insert(stream_id, stream);
		Ok((stream_id, consumer))
	}

	pub fn stop_stream(&self, stream_id: u64) -> Result<()> {
		let mut streams = self.streams.write();
		let stream = streams.get_mut(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
		stream.stop();
		Ok(())
	}

	pub fn remove_stream(&self, stream_id: u64) -> Option<Stream> {
		self.streams.write().remove(&stream_id)
	}

	pub fn put_frame(&self, stream_id: u64, frame: &Frame) -> Result<PutFrameOutcome> {
		let mut streams = self.streams.write();
		let stream = streams.get_mut(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
		stream.put_frame(frame)
	}

	pub fn process_ack(&self, stream_id: u64, ack: &Ack) -> Result<()> {
		let mut streams = self.streams.write();
		let stream = streams.get_mut(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
		stream.process_ack(ack);
		Ok(())
	}

	pub fn metrics(&self, stream_id: u64) -> Result<StreamMetrics> {
		let streams = self.streams.read();
		let stream = streams.get(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
		Ok(stream.metrics())
	}

	/// Total bytes committed in the shared content store across all live
	/// streams. Always `<= content_store_size`.
	pub fn total_in_flight_bytes(&self) -> u64 {
		(self.store.capacity() - self.store.capacity_available()) as u64
	}

	pub fn stale_streams(&self, now: Instant) -> Vec<u64> {
		self.streams
			.read()
			.iter()
			.filter(|(_, s)| s.is_connection_stale(now))
			.map(|(id, _)| *id)
			.collect()
	}

	/// Drives [`Stream::check_connection_staleness`] for every live stream,
	/// firing `on_connection_stale` for streams that just crossed their
	/// configured threshold. Meant to be polled periodically by the upload
	/// session layer, not called per-frame.
	pub fn check_staleness(&self, now: Instant) {
		let mut streams = self.streams.write();
		for stream in streams.values_mut() {
			stream.check_connection_staleness(now);
		}
	}

	pub fn reset_stream_connection(&self, stream_id: u64) -> Result<()> {
		let mut streams = self.streams.write();
		let stream = streams.get_mut(&stream_id).ok_or(Error::UnknownStream(stream_id))?;
		stream.reset_connection();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use reel_mux::{FrameFlags, TrackInfo, TrackKind, TrackMedia};

	fn sample_info() -> StreamInfo {
		StreamInfo {
			tracks: vec![TrackInfo {
				track_id: 1,
				codec_id: "V_MPEG4/ISO/AVC".to_string(),
				track_name: String::new(),
				track_type: TrackKind::Video,
				codec_private_data: Some(bytes::Bytes::from_static(&[1, 2, 3])),
				media: TrackMedia::None,
			}],
			..Default::default()
		}
	}

	#[test]
	fn create_and_remove_stream() {
		let client = Client::new(ClientConfig::default());
		let (id, _consumer) = client.create_stream(sample_info()).unwrap();
		assert!(client.remove_stream(id).is_some());
		assert!(client.remove_stream(id).is_none());
	}

	#[test]
	fn unknown_stream_errors() {
		let client = Client::new(ClientConfig::default());
		let frame = Frame {
			presentation_ts: 0,
			decoding_ts: 0,
			duration: 1,
			flags: FrameFlags(FrameFlags::KEY_FRAME),
			track_id: 1,
			payload: bytes::Bytes::from_static(&[0]),
		};
		assert_eq!(client.put_frame(99, &frame).unwrap_err(), Error::UnknownStream(99));
	}

	#[test]
	fn total_in_flight_bytes_tracks_store_usage() {
		let client = Client::new(ClientConfig::default());
		let (id, _consumer) = client.create_stream(sample_info()).unwrap();
		let before = client.total_in_flight_bytes();
		let frame = Frame {
			presentation_ts: 0,
			decoding_ts: 0,
			duration: 1,
			flags: FrameFlags(FrameFlags::KEY_FRAME),
			track_id: 1,
			payload: bytes::Bytes::from_static(&[0, 0, 0, 1, 0x65, 1, 2, 3]),
		};
		client.put_frame(id, &frame).unwrap();
		assert!(client.total_in_flight_bytes() > before);
	}
}

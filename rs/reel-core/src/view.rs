//! Ring-buffered index of packaged bytes, with independent read cursors
//! per upload session ("fanout", mirroring the producer/consumer split a
//! `moq_lite` track uses for its groups).

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::Result;
use crate::store::ContentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(pub u8);

impl EntryFlags {
	pub const NONE: u8 = 0;
	pub const FRAGMENT_START: u8 = 0b01;
	pub const SESSION_TERMINATOR: u8 = 0b10;

	pub fn contains(&self, bit: u8) -> bool {
		self.0 & bit == bit
	}
}

/// One packaged-byte region recorded in the view. `handle` is this entry's
/// backing allocation in the shared [`ContentStore`].
#[derive(Debug, Clone, Copy)]
pub struct Entry {
	pub offset: u64,
	pub size: u32,
	pub duration: u64,
	pub timestamp_ack_key: u64,
	pub flags: EntryFlags,
	pub index: u64,
	pub handle: crate::store::Handle,
}

struct State {
	entries: VecDeque<Entry>,
	capacity: usize,
	tail_offset: u64,
	trim_cursor: u64,
	next_index: u64,
}

impl State {
	fn head_offset(&self) -> u64 {
		self.entries.front().map(|e| e.offset).unwrap_or(self.tail_offset)
	}

	/// Frees and drops every entry fully covered by `up_to_offset`.
	fn evict_through(&mut self, store: &ContentStore, up_to_offset: u64) {
		while let Some(front) = self.entries.front() {
			if front.offset + front.size as u64 > up_to_offset {
				break;
			}
			let entry = self.entries.pop_front().unwrap();
			store.free(entry.handle);
		}
	}
}

struct Shared {
	state: Mutex<State>,
	store: Arc<ContentStore>,
	notify: watch::Sender<u64>,
}

/// The append side of a content view. Owned by the [`crate::stream::Stream`].
#[derive(Clone)]
pub struct ContentViewProducer {
	shared: Arc<Shared>,
}

/// A read cursor against a content view, one per upload session.
#[derive(Clone)]
pub struct ContentViewConsumer {
	shared: Arc<Shared>,
	notify: watch::Receiver<u64>,
	read_offset: u64,
}

pub fn new(store: Arc<ContentStore>, capacity: usize) -> (ContentViewProducer, ContentViewConsumer) {
	let (tx, rx) = watch::channel(0u64);
	let shared = Arc::new(Shared {
		state: Mutex::new(State {
			entries: VecDeque::new(),
			capacity,
			tail_offset: 0,
			trim_cursor: 0,
			next_index: 0,
		}),
		store,
		notify: tx,
	});
	(
		ContentViewProducer { shared: shared.clone() },
		ContentViewConsumer {
			shared,
			notify: rx,
			read_offset: 0,
		},
	)
}

impl ContentViewProducer {
	/// Appends `bytes` as one entry at the current tail offset. Returns the
	/// entry that was recorded (after whatever eviction the overflow policy
	/// applied).
	pub fn append(&self, bytes: &[u8], duration: u64, timestamp_ack_key: u64, flags: EntryFlags) -> Result<Entry> {
		let handle = self.shared.store.alloc(bytes.len())?;
		self.shared.store.write(handle, bytes)?;

		let mut state = self.shared.state.lock();
		let offset = state.tail_offset;
		let index = state.next_index;
		state.next_index += 1;
		state.tail_offset += bytes.len() as u64;

		let entry = Entry {
			offset,
			size: bytes.len() as u32,
			duration,
			timestamp_ack_key,
			flags,
			index,
			handle,
		};
		state.entries.push_back(entry);

		if state.entries.len() > state.capacity {
			self.apply_overflow_policy(&mut state);
		}

		drop(state);
		self.shared.notify.send_modify(|gen| *gen += 1);
		Ok(entry)
	}

	/// `DROP_UNTIL_FRAGMENT_START`: discard from head up to and including the
	/// next fragment-start entry.
	fn apply_overflow_policy(&self, state: &mut State) {
		let mut dropped = 0;
		while state.entries.len() > state.capacity {
			let Some(entry) = state.entries.pop_front() else { break };
			self.shared.store.free(entry.handle);
			dropped += 1;
			if entry.flags.contains(EntryFlags::FRAGMENT_START) {
				break;
			}
		}
		if dropped > 0 {
			tracing::warn!(dropped, "content-view-head-moved");
		}
	}

	/// Advances the trim cursor to `max(current, offset)` and frees any
	/// fully-covered entries. Idempotent: an older offset arriving after a
	/// newer one is a no-op.
	pub fn trim_to(&self, offset: u64) {
		let mut state = self.shared.state.lock();
		if offset <= state.trim_cursor {
			return;
		}
		state.trim_cursor = offset;
		state.evict_through(&self.shared.store, offset);
	}

	/// Trims everything belonging to the fragment acked as `PERSISTED`.
	/// Acks carry a fragment *timecode*, not a byte offset — every entry
	/// packaged as part of the same fragment shares that timecode in
	/// [`Entry::timestamp_ack_key`], so this frees through the last (highest
	/// offset) entry with a matching key rather than trusting the ack value
	/// as an offset directly. Returns `false` if no entry with that key is
	/// currently in the view (already trimmed, or the ack is stale/unknown).
	pub fn trim_to_fragment_ack(&self, fragment_timecode: u64) -> bool {
		let mut state = self.shared.state.lock();
		let trim_offset = state
			.entries
			.iter()
			.filter(|e| e.timestamp_ack_key == fragment_timecode)
			.map(|e| e.offset + e.size as u64)
			.max();
		let Some(trim_offset) = trim_offset else {
			return false;
		};
		if trim_offset > state.trim_cursor {
			state.trim_cursor = trim_offset;
			state.evict_through(&self.shared.store, trim_offset);
		}
		true
	}

	/// `DROP_TAIL_ITEM`: used when the shared content store is under pressure.
	/// Discards the most recently appended, not-yet-acked entries from this
	/// view — newest first — until the store has `needed` bytes free or the
	/// view runs out of entries. Returns the number of bytes freed.
	pub fn evict_tail_for_pressure(&self, needed: usize) -> u64 {
		let mut state = self.shared.state.lock();
		let mut freed = 0u64;
		while self.shared.store.capacity_available() < needed {
			let Some(entry) = state.entries.pop_back() else { break };
			freed += entry.size as u64;
			self.shared.store.free(entry.handle);
		}
		if freed > 0 {
			tracing::warn!(freed, "content-view-tail-dropped");
		}
		freed
	}

	pub fn head_offset(&self) -> u64 {
		self.shared.state.lock().head_offset()
	}

	pub fn tail_offset(&self) -> u64 {
		self.shared.state.lock().tail_offset
	}

	pub fn new_consumer(&self) -> ContentViewConsumer {
		ContentViewConsumer {
			shared: self.shared.clone(),
			notify: self.shared.notify.subscribe(),
			read_offset: self.shared.state.lock().tail_offset,
		}
	}
}

impl ContentViewConsumer {
	pub fn seek(&mut self, offset: u64) {
		self.read_offset = offset;
	}

	pub fn read_offset(&self) -> u64 {
		self.read_offset
	}

	/// The entry at this consumer's current read offset, if any has been
	/// appended yet.
	pub fn current_item(&self) -> Option<Entry> {
		let state = self.shared.state.lock();
		state.entries.iter().find(|e| e.offset == self.read_offset).copied()
	}

	/// Rewinds this consumer to the nearest fragment-start entry at or
	/// before its current read offset — used when an upload session
	/// restarts after a retriable failure.
	pub fn rollback_current_to_fragment_start(&mut self) {
		let state = self.shared.state.lock();
		if let Some(entry) = state
			.entries
			.iter()
			.rev()
			.find(|e| e.offset <= self.read_offset && e.flags.contains(EntryFlags::FRAGMENT_START))
		{
			self.read_offset = entry.offset;
		}
	}

	/// Pulls the next contiguous chunk of packaged bytes, blocking until at
	/// least one entry becomes available at this consumer's read offset.
	pub async fn next_chunk(&mut self) -> Result<Bytes> {
		loop {
			if let Some(entry) = self.current_item() {
				let bytes = self.shared.store.read(entry.handle)?;
				self.read_offset += entry.size as u64;
				return Ok(bytes);
			}
			// Nothing ready yet at our offset: wait for the producer to append.
			if self.notify.changed().await.is_err() {
				// Producer dropped; report end-of-stream as an empty chunk.
				return Ok(Bytes::new());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn harness() -> (ContentViewProducer, ContentViewConsumer) {
		let store = Arc::new(ContentStore::new(1 << 20));
		new(store, 64)
	}

	#[test]
	fn append_advances_monotonic_offsets() {
		let (producer, _consumer) = harness();
		let e1 = producer.append(b"abc", 0, 0, EntryFlags(0)).unwrap();
		let e2 = producer.append(b"de", 0, 0, EntryFlags(0)).unwrap();
		assert_eq!(e1.offset, 0);
		assert_eq!(e2.offset, 3);
		assert_eq!(producer.tail_offset(), 5);
	}

	#[test]
	fn trim_to_is_idempotent_and_monotonic() {
		let (producer, _consumer) = harness();
		producer.append(b"abc", 0, 0, EntryFlags(0)).unwrap();
		producer.append(b"de", 0, 0, EntryFlags(0)).unwrap();
		producer.trim_to(5);
		producer.trim_to(3); // older offset arriving late: no-op
		assert_eq!(producer.head_offset(), 5);
	}

	#[tokio::test]
	async fn consumer_blocks_until_data_available() {
		let (producer, mut consumer) = harness();
		consumer.seek(0);
		let reader = tokio::spawn(async move { consumer.next_chunk().await.unwrap() });
		tokio::task::yield_now().await;
		producer.append(b"hello", 0, 0, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		let chunk = reader.await.unwrap();
		assert_eq!(chunk.as_ref(), b"hello");
	}

	#[test]
	fn trim_to_fragment_ack_frees_all_entries_sharing_the_key() {
		let (producer, _consumer) = harness();
		producer.append(b"aa", 0, 100, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		producer.append(b"bb", 0, 100, EntryFlags(0)).unwrap();
		producer.append(b"cc", 0, 200, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		assert!(producer.trim_to_fragment_ack(100));
		assert_eq!(producer.head_offset(), 4);
	}

	#[test]
	fn trim_to_fragment_ack_unknown_key_is_a_no_op() {
		let (producer, _consumer) = harness();
		producer.append(b"aa", 0, 100, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		assert!(!producer.trim_to_fragment_ack(999));
		assert_eq!(producer.head_offset(), 0);
	}

	#[test]
	fn evict_tail_for_pressure_drops_newest_entries_first() {
		let store = Arc::new(ContentStore::new(1024));
		let (producer, _consumer) = new(store.clone(), 64);
		producer.append(&[0u8; 100], 0, 0, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		producer.append(&[0u8; 100], 0, 0, EntryFlags(0)).unwrap();
		let available_before = store.capacity_available();
		let freed = producer.evict_tail_for_pressure(available_before + 1);
		assert!(freed > 0);
		// The oldest entry (fragment start) survives; only the newest was dropped.
		assert_eq!(producer.head_offset(), 0);
	}

	#[test]
	fn rollback_finds_fragment_start() {
		let (producer, mut consumer) = harness();
		producer.append(b"aaaa", 0, 0, EntryFlags(EntryFlags::FRAGMENT_START)).unwrap();
		producer.append(b"bb", 0, 0, EntryFlags(0)).unwrap();
		consumer.seek(6);
		consumer.rollback_current_to_fragment_start();
		assert_eq!(consumer.read_offset(), 0);
	}
}

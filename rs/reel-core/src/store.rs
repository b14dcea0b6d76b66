//! Fixed-capacity byte arena shared by all streams of a [`crate::client::Client`].
//! Allocation is O(1) amortized via a segregated free list bucketed by
//! power-of-two size; fragmentation is bounded to at most one bucket's
//! worth of slack per allocation.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};

const MIN_BUCKET: usize = 256;

fn bucket_size(requested: usize) -> usize {
	requested.max(MIN_BUCKET).next_power_of_two()
}

/// An opaque reference to one allocation. Only valid against the
/// [`ContentStore`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
	id: u64,
	size: u32,
}

impl Handle {
	pub fn len(&self) -> usize {
		self.size as usize
	}

	pub fn is_empty(&self) -> bool {
		self.size == 0
	}
}

#[derive(Debug, Clone, Copy)]
struct Block {
	offset: usize,
	bucket: usize,
}

struct Arena {
	data: Vec<u8>,
	capacity: usize,
	high_water: usize,
	free_lists: HashMap<usize, Vec<usize>>,
	allocations: HashMap<u64, Block>,
	next_handle: u64,
}

pub struct ContentStore {
	inner: Mutex<Arena>,
}

impl ContentStore {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Mutex::new(Arena {
				data: vec![0u8; capacity],
				capacity,
				high_water: 0,
				free_lists: HashMap::new(),
				allocations: HashMap::new(),
				next_handle: 1,
			}),
		}
	}

	pub fn capacity(&self) -> usize {
		self.inner.lock().capacity
	}

	pub fn capacity_available(&self) -> usize {
		let arena = self.inner.lock();
		let used: usize = arena.allocations.values().map(|b| b.bucket).sum();
		arena.capacity.saturating_sub(used)
	}

	pub fn alloc(&self, size: usize) -> Result<Handle> {
		if size == 0 || size > u32::MAX as usize {
			return Err(Error::InvalidArg("content store allocation size out of range".to_string()));
		}
		let bucket = bucket_size(size);
		let mut arena = self.inner.lock();

		let offset = if let Some(offset) = arena.free_lists.get_mut(&bucket).and_then(|list| list.pop()) {
			offset
		} else if arena.high_water + bucket <= arena.capacity {
			let offset = arena.high_water;
			arena.high_water += bucket;
			offset
		} else {
			return Err(Error::NotEnoughMemory);
		};

		let id = arena.next_handle;
		arena.next_handle += 1;
		arena.allocations.insert(id, Block { offset, bucket });

		Ok(Handle { id, size: size as u32 })
	}

	pub fn free(&self, handle: Handle) {
		let mut arena = self.inner.lock();
		if let Some(block) = arena.allocations.remove(&handle.id) {
			arena.free_lists.entry(block.bucket).or_default().push(block.offset);
		}
	}

	pub fn write(&self, handle: Handle, data: &[u8]) -> Result<()> {
		if data.len() != handle.len() {
			return Err(Error::InvalidArg("write length does not match allocation size".to_string()));
		}
		let mut arena = self.inner.lock();
		let block = *arena
			.allocations
			.get(&handle.id)
			.ok_or_else(|| Error::InvalidArg("unknown content-store handle".to_string()))?;
		arena.data[block.offset..block.offset + data.len()].copy_from_slice(data);
		Ok(())
	}

	/// Copies the allocation's bytes out into an owned buffer. The lock is
	/// held only for the copy; the caller reads the returned bytes unlocked.
	pub fn read(&self, handle: Handle) -> Result<Bytes> {
		let arena = self.inner.lock();
		let block = *arena
			.allocations
			.get(&handle.id)
			.ok_or_else(|| Error::InvalidArg("unknown content-store handle".to_string()))?;
		Ok(Bytes::copy_from_slice(&arena.data[block.offset..block.offset + handle.len()]))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn alloc_write_read_roundtrip() {
		let store = ContentStore::new(4096);
		let handle = store.alloc(100).unwrap();
		store.write(handle, &vec![7u8; 100]).unwrap();
		assert_eq!(store.read(handle).unwrap().as_ref(), &vec![7u8; 100][..]);
	}

	#[test]
	fn free_reuses_bucket() {
		let store = ContentStore::new(4096);
		let a = store.alloc(100).unwrap();
		store.free(a);
		let available_before = store.capacity_available();
		let b = store.alloc(100).unwrap();
		// Reused the same bucket rather than advancing the high-water mark.
		assert_eq!(store.capacity_available(), available_before - 256);
		store.free(b);
	}

	#[test]
	fn out_of_memory_when_capacity_exhausted() {
		let store = ContentStore::new(256);
		store.alloc(200).unwrap();
		assert_eq!(store.alloc(200).unwrap_err(), Error::NotEnoughMemory);
	}
}

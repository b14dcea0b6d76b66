//! Caches data-plane endpoints returned by `GetDataEndpoint`, keyed by
//! `(stream name, API name)`, so repeated upload sessions against the same
//! stream don't re-describe the endpoint on every reconnect.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
	stream_name: String,
	api: String,
}

struct CacheEntry {
	endpoint: String,
	expires_at: Instant,
}

pub struct EndpointCache {
	ttl: Duration,
	entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Default for EndpointCache {
	fn default() -> Self {
		Self::with_ttl(DEFAULT_TTL)
	}
}

impl EndpointCache {
	pub fn with_ttl(ttl: Duration) -> Self {
		Self {
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}

	pub fn get(&self, stream_name: &str, api: &str, now: Instant) -> Option<String> {
		let key = CacheKey {
			stream_name: stream_name.to_string(),
			api: api.to_string(),
		};
		let mut entries = self.entries.lock();
		match entries.get(&key) {
			Some(entry) if entry.expires_at > now => Some(entry.endpoint.clone()),
			Some(_) => {
				entries.remove(&key);
				None
			}
			None => None,
		}
	}

	pub fn put(&self, stream_name: &str, api: &str, endpoint: String, now: Instant) {
		let key = CacheKey {
			stream_name: stream_name.to_string(),
			api: api.to_string(),
		};
		self.entries.lock().insert(
			key,
			CacheEntry {
				endpoint,
				expires_at: now + self.ttl,
			},
		);
	}

	pub fn invalidate(&self, stream_name: &str, api: &str) {
		let key = CacheKey {
			stream_name: stream_name.to_string(),
			api: api.to_string(),
		};
		self.entries.lock().remove(&key);
	}
}

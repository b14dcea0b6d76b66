//! Ties one [`reel_core::Stream`] to the network: drives it through
//! [`run_stream_setup`], spawns its chunked upload loop, pumps parsed acks
//! back into [`reel_core::Client`], and reconnects on failure by rolling the
//! content view back to the last fragment boundary.
//!
//! This is the glue `reel-core` deliberately doesn't know about: it has no
//! concept of HTTP, signing, or control-plane calls, and `reel-net`'s other
//! modules have no concept of a stream's lifecycle beyond one request.

use std::sync::Arc;
use std::time::Duration;

use reel_core::{Ack, Client, ContentViewConsumer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::service::ServiceCaller;
use crate::state_machine::{run_stream_setup, StreamStateMachine};
use crate::upload::{self, UploadSessionConfig};

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 8,
			base_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(30),
		}
	}
}

/// A running upload session for one stream. Dropping this does not stop the
/// background task; call [`StreamSession::abort`] or let the stream run to
/// a clean EOF (the producer side calling `Client::stop_stream`, which
/// drains the content view and lets `next_chunk` return empty).
pub struct StreamSession {
	stream_id: u64,
	handle: JoinHandle<()>,
}

impl StreamSession {
	/// Runs `DESCRIBE`/`CREATE`/`GET_ENDPOINT` setup to completion, then
	/// spawns the upload loop and ack pump in the background. Returns once
	/// setup succeeds; setup failures (bad credentials, unreachable control
	/// plane) surface here rather than silently failing in the background.
	#[tracing::instrument(skip(client, http, service, consumer), fields(stream_id))]
	pub async fn start(
		client: Arc<Client>,
		http: reqwest::Client,
		service: Arc<ServiceCaller>,
		upload_config: UploadSessionConfig,
		reconnect: ReconnectPolicy,
		stream_name: String,
		retention_hours: u32,
		stream_id: u64,
		consumer: ContentViewConsumer,
	) -> Result<Self> {
		let mut machine = StreamStateMachine::new();
		run_stream_setup(&mut machine, &service, &stream_name, retention_hours).await?;

		let (ack_tx, ack_rx) = mpsc::channel(64);
		let consumer = Arc::new(Mutex::new(consumer));
		let handle = tokio::spawn(run_with_reconnect(
			client,
			http,
			service,
			upload_config,
			reconnect,
			stream_name,
			stream_id,
			consumer,
			ack_tx,
			ack_rx,
		));

		Ok(Self { stream_id, handle })
	}

	pub fn stream_id(&self) -> u64 {
		self.stream_id
	}

	pub fn abort(&self) {
		self.handle.abort();
	}
}

#[allow(clippy::too_many_arguments)]
async fn run_with_reconnect(
	client: Arc<Client>,
	http: reqwest::Client,
	service: Arc<ServiceCaller>,
	upload_config: UploadSessionConfig,
	reconnect: ReconnectPolicy,
	stream_name: String,
	stream_id: u64,
	consumer: Arc<Mutex<ContentViewConsumer>>,
	ack_tx: mpsc::Sender<Ack>,
	ack_rx: mpsc::Receiver<Ack>,
) {
	let ack_pump = tokio::spawn(pump_acks(client.clone(), stream_id, ack_rx));
	let staleness_pump = tokio::spawn(poll_staleness(client.clone()));

	let mut attempt = 0u32;
	let mut delay = reconnect.base_delay;
	loop {
		match upload::run(&http, &service, &upload_config, &stream_name, consumer.clone(), ack_tx.clone()).await {
			Ok(()) => {
				tracing::info!(stream_id, "upload session ended cleanly");
				break;
			}
			Err(err) if attempt + 1 < reconnect.max_attempts => {
				tracing::warn!(stream_id, attempt, error = %err, "upload session failed, reconnecting");
				service.invalidate_endpoint(&stream_name, "PUT_MEDIA");
				if client.reset_stream_connection(stream_id).is_err() {
					// Stream was removed from the client while we were uploading; stop.
					break;
				}
				consumer.lock().await.rollback_current_to_fragment_start();
				tokio::time::sleep(delay).await;
				delay = (delay * 2).min(reconnect.max_delay);
				attempt += 1;
			}
			Err(err) => {
				tracing::error!(stream_id, attempts = attempt + 1, error = %err, "upload session exhausted reconnect attempts");
				break;
			}
		}
	}

	drop(ack_tx);
	let _ = ack_pump.await;
	staleness_pump.abort();
}

/// Forwards parsed acks into `Client::process_ack` until the upload loop
/// drops its sender, which happens once `run_with_reconnect` gives up or the
/// session ends cleanly.
async fn pump_acks(client: Arc<Client>, stream_id: u64, mut ack_rx: mpsc::Receiver<Ack>) {
	while let Some(ack) = ack_rx.recv().await {
		if let Err(err) = client.process_ack(stream_id, &ack) {
			tracing::warn!(stream_id, error = %err, "dropping ack for unknown stream");
		}
	}
}

/// Periodically drives [`Client::check_staleness`] across every stream this
/// client owns, so `on_connection_stale` fires even while no ack or upload
/// activity is otherwise touching the client. Runs for the lifetime of the
/// session; the caller aborts it once the upload loop and ack pump finish.
const STALENESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

async fn poll_staleness(client: Arc<Client>) {
	let mut ticker = tokio::time::interval(STALENESS_POLL_INTERVAL);
	loop {
		ticker.tick().await;
		client.check_staleness(std::time::Instant::now());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reconnect_policy_defaults_are_bounded() {
		let policy = ReconnectPolicy::default();
		assert!(policy.max_attempts > 0);
		assert!(policy.base_delay <= policy.max_delay);
	}
}

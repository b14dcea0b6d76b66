//! Drives one HTTP chunked-upload session against the data plane: streams
//! packaged bytes out of a [`ContentViewConsumer`] as the request body and
//! parses the newline-delimited ACK fragments from the response.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use reel_core::{Ack, AckKind, ContentViewConsumer};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::service::ServiceCaller;

#[derive(Debug, Clone)]
pub struct UploadSessionConfig {
	pub region: String,
	pub service_name: String,
	pub producer_start_timestamp: Option<OffsetDateTime>,
}

impl Default for UploadSessionConfig {
	fn default() -> Self {
		Self {
			region: "us-east-1".to_string(),
			service_name: "kinesisvideo".to_string(),
			producer_start_timestamp: None,
		}
	}
}

#[derive(Debug, Deserialize)]
struct AckMessage {
	#[serde(rename = "EventType")]
	event_type: String,
	#[serde(rename = "FragmentTimecode", default)]
	fragment_timecode: u64,
	#[serde(rename = "ErrorId", default)]
	error_id: Option<u32>,
	#[serde(rename = "ErrorMessage", default)]
	error_message: Option<String>,
}

impl AckMessage {
	fn into_ack(self) -> Ack {
		let kind = match self.event_type.as_str() {
			"BUFFERING" => AckKind::Buffering,
			"RECEIVED" => AckKind::Received,
			"PERSISTED" => AckKind::Persisted,
			"ERROR" => AckKind::Error {
				code: self.error_id.unwrap_or(0),
			},
			"IDLE" => AckKind::Idle,
			_ => AckKind::Idle,
		};
		Ack {
			kind,
			fragment_timecode: self.fragment_timecode,
			message: self.error_message,
		}
	}
}

/// Runs one upload session to completion (until the connection drops or the
/// content view's producer is gone). Returns normally on a clean EOF;
/// network failures surface as an `Err` so the caller can decide whether to
/// reconnect and `rollback_current_to_fragment_start`.
///
/// The consumer is shared behind a mutex rather than moved in, so the
/// [`crate::session`] reconnect loop can roll it back to the last fragment
/// boundary after this call returns an error.
pub async fn run(
	http: &reqwest::Client,
	service: &ServiceCaller,
	config: &UploadSessionConfig,
	stream_name: &str,
	consumer: Arc<Mutex<ContentViewConsumer>>,
	ack_tx: tokio::sync::mpsc::Sender<Ack>,
) -> Result<()> {
	let endpoint = service.get_data_endpoint(stream_name, "PUT_MEDIA").await?;
	let url = format!("{endpoint}/putMedia");

	let body_stream = futures::stream::unfold(consumer, |consumer| async move {
		let mut guard = consumer.lock().await;
		let next = guard.next_chunk().await;
		drop(guard);
		match next {
			Ok(bytes) if bytes.is_empty() => None,
			Ok(bytes) => Some((Ok::<Bytes, std::io::Error>(bytes), consumer)),
			Err(err) => Some((Err(std::io::Error::other(err.to_string())), consumer)),
		}
	});

	let parsed = reqwest::Url::parse(&url).map_err(|e| Error::EndpointDiscovery {
		api: "PutMedia".to_string(),
		message: e.to_string(),
	})?;
	let host = parsed.host_str().unwrap_or_default().to_string();
	let signed = service.sign_put_media(&host, parsed.path(), stream_name)?;

	let mut builder = http
		.post(parsed)
		.header("content-type", "application/json")
		.header("x-amzn-stream-name", stream_name)
		.header("transfer-encoding", "chunked")
		.header("x-amz-date", signed.x_amz_date)
		.header("authorization", signed.authorization)
		.body(reqwest::Body::wrap_stream(body_stream));
	if let Some(token) = signed.x_amz_security_token {
		builder = builder.header("x-amz-security-token", token);
	}
	if let Some(ts) = config.producer_start_timestamp {
		builder = builder.header("x-amzn-producer-start-timestamp", ts.unix_timestamp().to_string());
	}

	let response = builder.send().await.map_err(Error::Http)?;
	if !response.status().is_success() {
		let status = response.status().as_u16();
		let body = response.text().await.unwrap_or_default();
		return Err(Error::ServiceError { status, body });
	}

	let mut bytes_stream = response.bytes_stream();
	let mut buf = Vec::new();
	while let Some(chunk) = bytes_stream.next().await {
		let chunk = chunk.map_err(Error::Http)?;
		buf.extend_from_slice(&chunk);
		while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
			let line: Vec<u8> = buf.drain(..=pos).collect();
			let line = &line[..line.len() - 1];
			if line.is_empty() {
				continue;
			}
			match serde_json::from_slice::<AckMessage>(line) {
				Ok(msg) => {
					let ack = msg.into_ack();
					if ack.kind == AckKind::Persisted {
						info!(fragment_timecode = ack.fragment_timecode, "fragment-persisted");
					}
					if ack_tx.send(ack).await.is_err() {
						return Ok(());
					}
				}
				Err(err) => {
					warn!(error = %err, "malformed ack line");
				}
			}
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn persisted_event_maps_to_persisted_ack() {
		let raw = br#"{"EventType":"PERSISTED","FragmentTimecode":12345}"#;
		let msg: AckMessage = serde_json::from_slice(raw).unwrap();
		let ack = msg.into_ack();
		assert_eq!(ack.kind, AckKind::Persisted);
		assert_eq!(ack.fragment_timecode, 12345);
	}

	#[test]
	fn error_event_carries_code() {
		let raw = br#"{"EventType":"ERROR","FragmentTimecode":1,"ErrorId":4001,"ErrorMessage":"bad fragment"}"#;
		let msg: AckMessage = serde_json::from_slice(raw).unwrap();
		let ack = msg.into_ack();
		assert_eq!(ack.kind, AckKind::Error { code: 4001 });
		assert_eq!(ack.message.as_deref(), Some("bad fragment"));
	}
}

//! Explicit state machines driving client and stream setup against the
//! control plane, one step per `advance()` call so the caller can interleave
//! setup with its own event loop rather than being blocked inside a single
//! opaque async call.

use crate::error::{Error, Result};
use crate::service::ServiceCaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	New,
	Create,
	CreateDevice,
	GetToken,
	Ready,
}

pub struct ClientStateMachine {
	state: ClientState,
}

impl Default for ClientStateMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl ClientStateMachine {
	pub fn new() -> Self {
		Self { state: ClientState::New }
	}

	pub fn state(&self) -> ClientState {
		self.state
	}

	/// Moves to the next state in the `NEW -> CREATE -> CREATE_DEVICE ->
	/// GET_TOKEN -> READY` chain. Calling this from `Ready` is a bug in the
	/// caller, not a retriable failure.
	pub fn advance(&mut self) -> Result<ClientState> {
		self.state = match self.state {
			ClientState::New => ClientState::Create,
			ClientState::Create => ClientState::CreateDevice,
			ClientState::CreateDevice => ClientState::GetToken,
			ClientState::GetToken => ClientState::Ready,
			ClientState::Ready => return Err(Error::Core(reel_core::Error::InvalidArg("client already ready".to_string()))),
		};
		tracing::debug!(state = ?self.state, "client-state-advance");
		Ok(self.state)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	New,
	Describe,
	Create,
	TagStream,
	GetEndpoint,
	GetToken,
	Ready,
	PutStream,
	Terminated,
	Stopped,
}

/// Drives one stream through setup: `DESCRIBE`, optionally `CREATE` if the
/// stream doesn't exist yet, `TAG_STREAM`, `GET_ENDPOINT`, `GET_TOKEN`, then
/// `READY`. Once streaming, `PUT_STREAM` is a terminal working state left by
/// either `terminate()` (unrecoverable) or `stop()` (clean shutdown).
pub struct StreamStateMachine {
	state: StreamState,
	stream_exists: bool,
}

impl StreamStateMachine {
	pub fn new() -> Self {
		Self {
			state: StreamState::New,
			stream_exists: false,
		}
	}

	pub fn state(&self) -> StreamState {
		self.state
	}

	pub fn advance(&mut self) -> Result<StreamState> {
		self.state = match self.state {
			StreamState::New => StreamState::Describe,
			StreamState::Describe => {
				if self.stream_exists {
					StreamState::TagStream
				} else {
					StreamState::Create
				}
			}
			StreamState::Create => StreamState::TagStream,
			StreamState::TagStream => StreamState::GetEndpoint,
			StreamState::GetEndpoint => StreamState::GetToken,
			StreamState::GetToken => StreamState::Ready,
			StreamState::Ready => StreamState::PutStream,
			StreamState::PutStream | StreamState::Terminated | StreamState::Stopped => {
				return Err(Error::Core(reel_core::Error::InvalidArg(
					"stream is already streaming or closed; use terminate()/stop()".to_string(),
				)));
			}
		};
		tracing::debug!(state = ?self.state, "stream-state-advance");
		Ok(self.state)
	}

	pub fn terminate(&mut self) {
		tracing::warn!(previous_state = ?self.state, "stream-terminated");
		self.state = StreamState::Terminated;
	}

	pub fn stop(&mut self) {
		self.state = StreamState::Stopped;
	}
}

impl Default for StreamStateMachine {
	fn default() -> Self {
		Self::new()
	}
}

/// Runs a [`StreamStateMachine`] through `DESCRIBE`/`CREATE`/`GET_ENDPOINT`
/// against the control plane, returning the `PUT_MEDIA` data endpoint once
/// the machine reaches `READY`.
#[tracing::instrument(skip(machine, service), fields(stream_name))]
pub async fn run_stream_setup(machine: &mut StreamStateMachine, service: &ServiceCaller, stream_name: &str, retention_hours: u32) -> Result<String> {
	loop {
		match machine.state() {
			StreamState::New => {
				machine.advance()?;
			}
			StreamState::Describe => {
				match service.describe_stream(stream_name).await {
					Ok(_) => machine.stream_exists = true,
					Err(Error::ServiceError { status: 404, .. }) => machine.stream_exists = false,
					Err(err) => return Err(err),
				}
				machine.advance()?;
			}
			StreamState::Create => {
				service.create_stream(stream_name, retention_hours).await?;
				machine.advance()?;
			}
			StreamState::TagStream => {
				// No tags configured by default; advance straight through.
				machine.advance()?;
			}
			StreamState::GetEndpoint => {
				let endpoint = service.get_data_endpoint(stream_name, "PUT_MEDIA").await?;
				machine.advance()?; // -> GetToken
				machine.advance()?; // -> Ready; credentials are already resolved by ServiceCaller's provider
				return Ok(endpoint);
			}
			StreamState::GetToken | StreamState::Ready | StreamState::PutStream | StreamState::Terminated | StreamState::Stopped => {
				return Err(Error::Core(reel_core::Error::InvalidArg("unreachable stream setup state".to_string())));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_state_advances_in_order() {
		let mut machine = ClientStateMachine::new();
		assert_eq!(machine.advance().unwrap(), ClientState::Create);
		assert_eq!(machine.advance().unwrap(), ClientState::CreateDevice);
		assert_eq!(machine.advance().unwrap(), ClientState::GetToken);
		assert_eq!(machine.advance().unwrap(), ClientState::Ready);
		assert!(machine.advance().is_err());
	}

	#[test]
	fn stream_skips_create_when_stream_exists() {
		let mut machine = StreamStateMachine::new();
		machine.advance().unwrap(); // -> Describe
		machine.stream_exists = true;
		assert_eq!(machine.advance().unwrap(), StreamState::TagStream);
	}

	#[test]
	fn stream_creates_when_absent() {
		let mut machine = StreamStateMachine::new();
		machine.advance().unwrap(); // -> Describe
		machine.stream_exists = false;
		assert_eq!(machine.advance().unwrap(), StreamState::Create);
		assert_eq!(machine.advance().unwrap(), StreamState::TagStream);
	}

	#[test]
	fn terminate_is_reachable_from_any_state() {
		let mut machine = StreamStateMachine::new();
		machine.terminate();
		assert_eq!(machine.state(), StreamState::Terminated);
	}
}

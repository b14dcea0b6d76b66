#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error("credential provider failed: {0}")]
	Credentials(String),

	#[error("endpoint discovery failed for api {api}: {message}")]
	EndpointDiscovery { api: String, message: String },

	#[error("http request failed")]
	Http(#[from] reqwest::Error),

	#[error("service returned {status}: {body}")]
	ServiceError { status: u16, body: String },

	#[error("malformed ack payload: {0}")]
	MalformedAck(String),

	#[error("retries exhausted after {attempts} attempts")]
	RetriesExhausted { attempts: u32 },

	#[error(transparent)]
	Core(#[from] reel_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

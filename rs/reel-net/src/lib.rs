pub mod credentials;
pub mod endpoint_cache;
pub mod error;
pub mod service;
pub mod session;
pub mod signing;
pub mod state_machine;
pub mod upload;

pub use credentials::{CredentialProvider, Credentials, StaticCredentialProvider};
pub use error::{Error, Result};
pub use service::{ServiceCaller, ServiceConfig};
pub use session::{ReconnectPolicy, StreamSession};
pub use state_machine::{ClientState, ClientStateMachine, StreamState as NetStreamState, StreamStateMachine};
pub use upload::UploadSessionConfig;

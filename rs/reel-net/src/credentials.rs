//! Access-key credentials used to sign requests to the ingestion service.

use time::OffsetDateTime;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Credentials {
	pub access_key_id: String,
	pub secret_access_key: String,
	pub session_token: Option<String>,
	/// When these credentials stop being valid, if known. `ServiceCaller`
	/// doesn't cache credentials across calls, so this is informational for
	/// callers building their own refresh-on-expiry provider.
	pub expiration: Option<OffsetDateTime>,
}

/// Supplies credentials on demand, so a long-lived [`crate::service::ServiceCaller`]
/// can pick up rotated or STS-refreshed keys without being reconstructed.
pub trait CredentialProvider: Send + Sync {
	fn credentials(&self) -> Result<Credentials>;
}

/// A provider that always returns the same credentials, for static
/// access keys or tests.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider(Credentials);

impl StaticCredentialProvider {
	pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
		Self(Credentials {
			access_key_id: access_key_id.into(),
			secret_access_key: secret_access_key.into(),
			session_token: None,
			expiration: None,
		})
	}

	pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
		self.0.session_token = Some(token.into());
		self
	}
}

impl CredentialProvider for StaticCredentialProvider {
	fn credentials(&self) -> Result<Credentials> {
		if self.0.access_key_id.is_empty() || self.0.secret_access_key.is_empty() {
			return Err(Error::Credentials("access key id and secret must be non-empty".to_string()));
		}
		Ok(self.0.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn static_provider_returns_configured_keys() {
		let provider = StaticCredentialProvider::new("AKID", "secret");
		let creds = provider.credentials().unwrap();
		assert_eq!(creds.access_key_id, "AKID");
		assert!(creds.session_token.is_none());
	}

	#[test]
	fn empty_keys_are_rejected() {
		let provider = StaticCredentialProvider::new("", "");
		assert!(provider.credentials().is_err());
	}
}

//! SigV4-style request signing: canonical request, string-to-sign, and the
//! HMAC-SHA256 key-derivation chain, independent of any particular HTTP
//! client so it can be unit tested against fixed timestamps.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone)]
pub struct SigningContext {
	pub region: String,
	pub service: String,
}

/// Either the request body to hash inline, or `UNSIGNED-PAYLOAD` for a
/// chunked upload whose length isn't known up front.
pub enum PayloadHash<'a> {
	Bytes(&'a [u8]),
	Unsigned,
}

/// Everything needed to build a canonical request, already normalized by
/// the caller (sorted query params, lower-cased header names).
pub struct RequestToSign<'a> {
	pub method: &'a str,
	pub uri_path: &'a str,
	pub canonical_query: &'a str,
	/// `(lowercase-name, trimmed-value)` pairs, already sorted by name.
	pub canonical_headers: &'a [(String, String)],
	pub signed_headers: &'a str,
	pub payload: PayloadHash<'a>,
}

fn sha256_hex(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
	mac.update(data);
	mac.finalize().into_bytes().to_vec()
}

fn canonical_request(req: &RequestToSign) -> String {
	let headers: String = req
		.canonical_headers
		.iter()
		.map(|(k, v)| format!("{k}:{v}\n"))
		.collect();
	let payload_hash = match req.payload {
		PayloadHash::Bytes(bytes) => sha256_hex(bytes),
		PayloadHash::Unsigned => "UNSIGNED-PAYLOAD".to_string(),
	};
	format!(
		"{}\n{}\n{}\n{}\n{}\n{}",
		req.method, req.uri_path, req.canonical_query, headers, req.signed_headers, payload_hash,
	)
}

fn credential_scope(date: &str, ctx: &SigningContext) -> String {
	format!("{date}/{}/{}/aws4_request", ctx.region, ctx.service)
}

fn signing_key(secret: &str, date: &str, ctx: &SigningContext) -> Vec<u8> {
	let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
	let k_region = hmac(&k_date, ctx.region.as_bytes());
	let k_service = hmac(&k_region, ctx.service.as_bytes());
	hmac(&k_service, b"aws4_request")
}

/// The headers an upload-session request must carry, ready to merge into
/// the outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
	pub x_amz_date: String,
	pub authorization: String,
	pub x_amz_security_token: Option<String>,
}

pub fn sign(req: &RequestToSign, creds: &Credentials, ctx: &SigningContext, now: OffsetDateTime) -> SignedHeaders {
	let amz_date = format!(
		"{:04}{:02}{:02}T{:02}{:02}{:02}Z",
		now.year(),
		u8::from(now.month()),
		now.day(),
		now.hour(),
		now.minute(),
		now.second(),
	);
	let date_stamp = &amz_date[..8];

	let canonical = canonical_request(req);
	let scope = credential_scope(date_stamp, ctx);
	let string_to_sign = format!("{ALGORITHM}\n{amz_date}\n{scope}\n{}", sha256_hex(canonical.as_bytes()));

	let key = signing_key(&creds.secret_access_key, date_stamp, ctx);
	let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

	let authorization = format!(
		"{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
		creds.access_key_id, req.signed_headers,
	);

	SignedHeaders {
		x_amz_date: amz_date,
		authorization,
		x_amz_security_token: creds.session_token.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;

	fn creds() -> Credentials {
		Credentials {
			access_key_id: "AKIDEXAMPLE".to_string(),
			secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
			session_token: None,
			expiration: None,
		}
	}

	#[test]
	fn signature_is_stable_for_fixed_inputs() {
		let ctx = SigningContext {
			region: "us-east-1".to_string(),
			service: "kinesisvideo".to_string(),
		};
		let headers = vec![("host".to_string(), "example.amazonaws.com".to_string())];
		let req = RequestToSign {
			method: "POST",
			uri_path: "/putMedia",
			canonical_query: "",
			canonical_headers: &headers,
			signed_headers: "host",
			payload: PayloadHash::Bytes(b""),
		};
		let now = datetime!(2020-01-01 00:00:00 UTC);
		let signed = sign(&req, &creds(), &ctx, now);
		assert_eq!(signed.x_amz_date, "20200101T000000Z");
		assert!(signed.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20200101/us-east-1/kinesisvideo/aws4_request"));

		// Same inputs must always produce the same signature.
		let signed_again = sign(&req, &creds(), &ctx, now);
		assert_eq!(signed.authorization, signed_again.authorization);
	}

	#[test]
	fn session_token_is_carried_through() {
		let ctx = SigningContext {
			region: "us-east-1".to_string(),
			service: "kinesisvideo".to_string(),
		};
		let mut c = creds();
		c.session_token = Some("token123".to_string());
		let headers = vec![];
		let req = RequestToSign {
			method: "GET",
			uri_path: "/",
			canonical_query: "",
			canonical_headers: &headers,
			signed_headers: "",
			payload: PayloadHash::Bytes(b""),
		};
		let signed = sign(&req, &c, &ctx, datetime!(2020-01-01 00:00:00 UTC));
		assert_eq!(signed.x_amz_security_token.as_deref(), Some("token123"));
	}
}

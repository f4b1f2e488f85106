//! Secure secret wrapper that redacts access tokens and refresh handles.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const HANDLE_BYTES: usize = 32;

/// Redacted token wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Generates an opaque random handle (32 bytes, URL-safe base64 without padding).
	pub fn generate() -> Self {
		let bytes: [u8; HANDLE_BYTES] = rand::random();

		Self(URL_SAFE_NO_PAD.encode(bytes))
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// SHA-256 digest of the secret, used as the storage key so raw handles never hit the store.
	pub fn fingerprint(&self) -> String {
		URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn generated_handles_are_unique_and_fingerprints_stable() {
		let handle = TokenSecret::generate();

		assert_ne!(handle, TokenSecret::generate());
		assert_eq!(handle.fingerprint(), TokenSecret::new(handle.expose()).fingerprint());
		assert_ne!(handle.fingerprint(), handle.expose());
	}
}

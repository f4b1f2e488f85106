//! One-time code generation and one-way hashing.

// crates.io
use argon2::{
	Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
	password_hash::SaltString,
};
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

const SALT_BYTES: usize = 16;

/// Plain one-time code. Only ever handed to the delivery collaborator; never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);
impl OtpCode {
	/// Wraps an existing code (tests and replays from the outbox).
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Draws a fresh numeric code of `length` digits.
	pub fn generate(length: usize) -> Self {
		let mut rng = rand::rng();
		let code = (0..length).map(|_| char::from(b'0' + rng.random_range(0..10_u8))).collect();

		Self(code)
	}

	/// Returns the plain code.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for OtpCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OtpCode(<redacted>)")
	}
}

/// Argon2id hasher for stored OTP digests.
///
/// Hashing runs on the blocking pool so request tasks never stall on memory-hard work.
#[derive(Clone, Debug)]
pub struct OtpHasher {
	params: Params,
}
impl OtpHasher {
	/// Creates a hasher with the given memory cost (KiB) and iteration count.
	pub fn new(memory_kib: u32, iterations: u32) -> Result<Self, ConfigError> {
		let params = Params::new(memory_kib, iterations, 1, None).map_err(|_| {
			ConfigError::InvalidPolicy {
				field: "otp.hash_memory_kib",
				reason: "rejected by argon2",
			}
		})?;

		Ok(Self { params })
	}

	/// Produces a salted PHC-format digest of `code`.
	pub async fn hash(&self, code: &OtpCode) -> Result<String> {
		let hasher = self.clone();
		let code = code.clone();

		tokio::task::spawn_blocking(move || hasher.hash_now(&code))
			.await
			.map_err(|e| Error::crypto("otp hashing task", e))?
	}

	/// Checks `supplied` against a stored digest. A malformed digest is an internal failure.
	pub async fn verify(&self, supplied: &str, digest: &str) -> Result<bool> {
		let hasher = self.clone();
		let supplied = supplied.to_owned();
		let digest = digest.to_owned();

		tokio::task::spawn_blocking(move || hasher.verify_now(&supplied, &digest))
			.await
			.map_err(|e| Error::crypto("otp verification task", e))?
	}

	fn argon2(&self) -> Argon2<'static> {
		Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
	}

	fn hash_now(&self, code: &OtpCode) -> Result<String> {
		let salt_bytes: [u8; SALT_BYTES] = rand::random();
		let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| Error::crypto("otp salt", e))?;

		self.argon2()
			.hash_password(code.expose().as_bytes(), &salt)
			.map(|digest| digest.to_string())
			.map_err(|e| Error::crypto("otp hashing", e))
	}

	fn verify_now(&self, supplied: &str, digest: &str) -> Result<bool> {
		let parsed = PasswordHash::new(digest).map_err(|e| Error::crypto("otp digest", e))?;

		Ok(self.argon2().verify_password(supplied.as_bytes(), &parsed).is_ok())
	}
}

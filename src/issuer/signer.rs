//! HS256 access-token signing and validation.

// std
use std::collections::HashSet;
// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind as JwtErrorKind,
};
// self
use crate::{
	_prelude::*,
	auth::{AccessClaims, TokenSecret},
};

/// Validation verdict for a presented access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenStatus {
	/// Signature and expiry check out.
	Valid(AccessClaims),
	/// Signature checks out but the token is past its expiry.
	Expired,
	/// Malformed, wrongly signed, or missing required claims.
	Invalid,
}

/// Stateless signer; validity rests solely on the HMAC signature and the `exp` claim.
#[derive(Clone)]
pub struct AccessTokenSigner {
	encoding: EncodingKey,
	decoding: DecodingKey,
	validation: Validation,
}
impl AccessTokenSigner {
	/// Derives HS256 keys from the configured secret.
	pub fn new(secret: &TokenSecret) -> Self {
		let mut validation = Validation::new(Algorithm::HS256);

		validation.leeway = 0;
		validation.validate_exp = true;
		validation.required_spec_claims = HashSet::from_iter(["exp".into(), "sub".into()]);

		Self {
			encoding: EncodingKey::from_secret(secret.expose().as_bytes()),
			decoding: DecodingKey::from_secret(secret.expose().as_bytes()),
			validation,
		}
	}

	/// Signs `claims`.
	pub fn sign(&self, claims: &AccessClaims) -> Result<TokenSecret> {
		jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
			.map(TokenSecret::new)
			.map_err(|e| Error::crypto("access token signing", e))
	}

	/// Checks signature and expiry against the wall clock.
	pub fn validate(&self, token: &str) -> TokenStatus {
		match jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation) {
			Ok(data) => TokenStatus::Valid(data.claims),
			Err(e) if matches!(e.kind(), JwtErrorKind::ExpiredSignature) => TokenStatus::Expired,
			Err(_) => TokenStatus::Invalid,
		}
	}
}
impl Debug for AccessTokenSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AccessTokenSigner(HS256, <redacted>)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{Role, Subject, UserId},
	};

	fn subject() -> Subject {
		Subject {
			user_id: UserId::new("user-1").expect("User fixture should be valid."),
			email: email("a@b.com"),
			scopes: Role::User.scopes(),
		}
	}

	fn signer(secret: &str) -> AccessTokenSigner {
		AccessTokenSigner::new(&TokenSecret::new(secret))
	}

	#[test]
	fn signed_tokens_validate_and_carry_claims() {
		let signer = signer(TEST_SIGNING_SECRET);
		let claims = AccessClaims::new(&subject(), OffsetDateTime::now_utc(), Duration::hours(1));
		let token = signer.sign(&claims).expect("Signing should succeed.");

		assert_eq!(signer.validate(token.expose()), TokenStatus::Valid(claims));
	}

	#[test]
	fn expiry_is_distinguished_from_tampering() {
		let signer = signer(TEST_SIGNING_SECRET);
		let expired = AccessClaims::new(
			&subject(),
			OffsetDateTime::now_utc() - Duration::hours(1) - Duration::seconds(1),
			Duration::hours(1),
		);
		let token = signer.sign(&expired).expect("Signing should succeed.");

		assert_eq!(signer.validate(token.expose()), TokenStatus::Expired);

		let foreign = self::signer("another-signing-secret-with-32-bytes!!")
			.sign(&AccessClaims::new(&subject(), OffsetDateTime::now_utc(), Duration::hours(1)))
			.expect("Signing should succeed.");

		assert_eq!(signer.validate(foreign.expose()), TokenStatus::Invalid);
		assert_eq!(signer.validate("not.a.jwt"), TokenStatus::Invalid);
	}
}

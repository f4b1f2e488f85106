//! Subject snapshots and the claim set carried by signed access tokens.

// self
use crate::{
	_prelude::*,
	auth::{Email, ScopeSet, UserId},
};

/// Identity snapshot captured when credentials are issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
	/// Identity collaborator's identifier.
	pub user_id: UserId,
	/// Subject email.
	pub email: Email,
	/// Scopes granted at issuance.
	pub scopes: ScopeSet,
}

/// Claim set embedded in an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
	/// Standard subject claim; mirrors `user_id`.
	pub sub: String,
	/// Identity collaborator's identifier.
	pub user_id: UserId,
	/// Subject email.
	pub email: Email,
	/// Granted scopes.
	pub scopes: ScopeSet,
	/// Issued-at, seconds since the Unix epoch.
	pub iat: i64,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
}
impl AccessClaims {
	/// Builds claims for `subject` valid for `ttl` from `issued_at`.
	pub fn new(subject: &Subject, issued_at: OffsetDateTime, ttl: Duration) -> Self {
		Self {
			sub: subject.user_id.to_string(),
			user_id: subject.user_id.clone(),
			email: subject.email.clone(),
			scopes: subject.scopes.clone(),
			iat: issued_at.unix_timestamp(),
			exp: (issued_at + ttl).unix_timestamp(),
		}
	}

	/// Subject snapshot the claims were minted from.
	pub fn subject(&self) -> Subject {
		Subject {
			user_id: self.user_id.clone(),
			email: self.email.clone(),
			scopes: self.scopes.clone(),
		}
	}

	/// Expiry instant; saturates to the Unix epoch if the claim is out of range.
	pub fn expires_at(&self) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::auth::Role;

	#[test]
	fn claims_capture_the_subject_snapshot() {
		let subject = Subject {
			user_id: UserId::new("user-1").expect("User fixture should be valid."),
			email: Email::parse("a@b.com").expect("Email fixture should be valid."),
			scopes: Role::User.scopes(),
		};
		let issued_at = datetime!(2025-01-01 00:00 UTC);
		let claims = AccessClaims::new(&subject, issued_at, Duration::hours(1));

		assert_eq!(claims.sub, "user-1");
		assert_eq!(claims.iat, issued_at.unix_timestamp());
		assert_eq!(claims.expires_at(), datetime!(2025-01-01 01:00 UTC));
		assert_eq!(claims.subject(), subject);
	}
}

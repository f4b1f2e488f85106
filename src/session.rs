//! Typed view over session records kept in the shared key-value store.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, Email, SessionId, TokenSecret},
	store::{Fields, KvStore, StoreError, StoreKey},
};

/// Stored field names of a session record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionField {
	/// Owning client identifier.
	ClientId,
	/// Subject email.
	Email,
	/// One-way hash of the active OTP.
	OtpHash,
	/// Unix timestamp of the last OTP (re)generation.
	CreatedAt,
	/// Wrong-guess counter.
	Attempts,
	/// Regeneration counter.
	Resends,
	/// Whether the OTP was verified.
	Verified,
	/// Current signed access token.
	AccessToken,
	/// Refresh handle bound to the session.
	RefreshToken,
}
impl SessionField {
	/// Stored field name.
	pub const fn as_str(self) -> &'static str {
		match self {
			SessionField::ClientId => "client_id",
			SessionField::Email => "email",
			SessionField::OtpHash => "otp_hash",
			SessionField::CreatedAt => "created_at",
			SessionField::Attempts => "attempts",
			SessionField::Resends => "resends",
			SessionField::Verified => "verified",
			SessionField::AccessToken => "access_token",
			SessionField::RefreshToken => "refresh_token",
		}
	}
}

/// Decoded session record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
	/// Client the session is bound to.
	pub client_id: ClientId,
	/// Subject email.
	pub email: Email,
	/// Hash of the active OTP, if one is outstanding.
	pub otp_hash: Option<String>,
	/// Last OTP (re)generation instant.
	pub created_at: OffsetDateTime,
	/// Wrong guesses against the active session.
	pub attempts: u32,
	/// Regenerations performed.
	pub resends: u32,
	/// Whether verification completed.
	pub verified: bool,
	/// Access token minted for a logged-in session.
	pub access_token: Option<TokenSecret>,
	/// Refresh handle minted for a logged-in session.
	pub refresh_token: Option<TokenSecret>,
}
impl SessionRecord {
	/// Fresh pre-auth record with zeroed counters.
	pub fn pending(client_id: ClientId, email: Email, created_at: OffsetDateTime) -> Self {
		Self {
			client_id,
			email,
			otp_hash: None,
			created_at,
			attempts: 0,
			resends: 0,
			verified: false,
			access_token: None,
			refresh_token: None,
		}
	}

	/// Logged-in record carrying freshly minted credentials.
	pub fn authenticated(
		client_id: ClientId,
		email: Email,
		created_at: OffsetDateTime,
		access_token: TokenSecret,
		refresh_token: TokenSecret,
	) -> Self {
		Self {
			verified: true,
			access_token: Some(access_token),
			refresh_token: Some(refresh_token),
			..Self::pending(client_id, email, created_at)
		}
	}

	/// Encodes the record into its stored field map.
	pub fn to_fields(&self) -> Fields {
		let mut fields = Fields::new();
		let mut set = |field: SessionField, value: String| {
			fields.insert(field.as_str().to_owned(), value);
		};

		set(SessionField::ClientId, self.client_id.to_string());
		set(SessionField::Email, self.email.to_string());
		set(SessionField::CreatedAt, self.created_at.unix_timestamp().to_string());
		set(SessionField::Attempts, self.attempts.to_string());
		set(SessionField::Resends, self.resends.to_string());
		set(SessionField::Verified, self.verified.to_string());

		if let Some(hash) = &self.otp_hash {
			set(SessionField::OtpHash, hash.clone());
		}
		if let Some(token) = &self.access_token {
			set(SessionField::AccessToken, token.expose().to_owned());
		}
		if let Some(token) = &self.refresh_token {
			set(SessionField::RefreshToken, token.expose().to_owned());
		}

		fields
	}

	/// Decodes a stored field map.
	pub fn from_fields(fields: &Fields) -> Result<Self, StoreError> {
		let get = |field: SessionField| fields.get(field.as_str()).filter(|v| !v.is_empty());
		let require = |field: SessionField| {
			get(field).ok_or_else(|| {
				StoreError::serialization(format!("session field `{}` is missing", field.as_str()))
			})
		};
		let counter = |field: SessionField| -> Result<u32, StoreError> {
			get(field).map_or(Ok(0), |raw| raw.parse().map_err(StoreError::serialization))
		};
		let created_at = require(SessionField::CreatedAt)?
			.parse::<i64>()
			.map_err(StoreError::serialization)
			.and_then(|ts| {
				OffsetDateTime::from_unix_timestamp(ts).map_err(StoreError::serialization)
			})?;

		Ok(Self {
			client_id: ClientId::new(require(SessionField::ClientId)?)
				.map_err(StoreError::serialization)?,
			email: Email::parse(require(SessionField::Email)?).map_err(StoreError::serialization)?,
			otp_hash: get(SessionField::OtpHash).cloned(),
			created_at,
			attempts: counter(SessionField::Attempts)?,
			resends: counter(SessionField::Resends)?,
			verified: get(SessionField::Verified).is_some_and(|v| v == "true"),
			access_token: get(SessionField::AccessToken).map(TokenSecret::new),
			refresh_token: get(SessionField::RefreshToken).map(TokenSecret::new),
		})
	}
}

/// Session store: `put`, `get_all`, `set_field(s)`, `increment`, and `delete` keyed by the
/// session handle.
#[derive(Clone)]
pub struct SessionStore {
	store: Arc<dyn KvStore>,
}
impl SessionStore {
	/// Wraps the shared backend.
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		Self { store }
	}

	/// Writes the whole record and sets its TTL.
	pub async fn put(&self, id: &SessionId, record: &SessionRecord, ttl: Duration) -> Result<()> {
		self.store.put(&StoreKey::session(id), record.to_fields(), ttl).await?;

		Ok(())
	}

	/// Loads the record; `None` means expired or never created.
	pub async fn get_all(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
		let Some(fields) = self.store.get_all(&StoreKey::session(id)).await? else {
			return Ok(None);
		};

		Ok(Some(SessionRecord::from_fields(&fields)?))
	}

	/// Sets one field and refreshes the TTL atomically; `false` when the session is gone.
	pub async fn set_field(
		&self,
		id: &SessionId,
		field: SessionField,
		value: String,
		ttl: Duration,
	) -> Result<bool> {
		Ok(self.store.set_field(&StoreKey::session(id), field.as_str(), value, ttl).await?)
	}

	/// Overwrites only the named fields and refreshes the TTL atomically.
	///
	/// Counters not named in `updates` keep whatever concurrent increments left in them.
	/// Returns `false` when the session is gone.
	pub async fn set_fields(
		&self,
		id: &SessionId,
		updates: impl IntoIterator<Item = (SessionField, String)>,
		ttl: Duration,
	) -> Result<bool> {
		let fields =
			updates.into_iter().map(|(field, value)| (field.as_str().to_owned(), value)).collect();

		Ok(self.store.set_fields(&StoreKey::session(id), fields, ttl).await?)
	}

	/// Atomically increments a counter field, preserving the remaining TTL.
	pub async fn increment(&self, id: &SessionId, field: SessionField) -> Result<Option<u32>> {
		let next = self.store.increment_field(&StoreKey::session(id), field.as_str(), 1).await?;

		Ok(next.map(|n| u32::try_from(n).unwrap_or(u32::MAX)))
	}

	/// Deletes the session.
	pub async fn delete(&self, id: &SessionId) -> Result<bool> {
		Ok(self.store.delete(&StoreKey::session(id)).await?)
	}

	/// Deletes the session on a failure path; a store error is logged, never surfaced.
	pub async fn discard(&self, id: &SessionId) {
		if let Err(e) = self.delete(id).await {
			#[cfg(feature = "tracing")]
			tracing::warn!(session = %id.fingerprint(), error = %e, "Failed to discard session.");
			#[cfg(not(feature = "tracing"))]
			let _ = e;
		}
	}
}
impl Debug for SessionStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("SessionStore(..)")
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::{_preludet::*, store::MemoryStore};

	fn record() -> SessionRecord {
		let created_at = datetime!(2025-01-01 00:00 UTC);

		SessionRecord::pending(client("10.0.0.1"), email("a@b.com"), created_at)
	}

	#[test]
	fn fields_round_trip_including_optional_values() {
		let mut original = record();

		original.otp_hash = Some("$argon2id$stub".into());
		original.attempts = 2;

		let decoded = SessionRecord::from_fields(&original.to_fields())
			.expect("Encoded record should decode.");

		assert_eq!(decoded, original);
		assert!(!original.to_fields().contains_key("access_token"));
	}

	#[test]
	fn missing_required_fields_are_serialization_errors() {
		let mut fields = record().to_fields();

		fields.remove("email");

		assert!(matches!(
			SessionRecord::from_fields(&fields),
			Err(StoreError::Serialization { .. })
		));
	}

	#[tokio::test]
	async fn set_field_never_resurrects_expired_sessions() {
		let backend = Arc::new(MemoryStore::default());
		let sessions = SessionStore::new(backend.clone());
		let id = SessionId::generate();

		sessions.put(&id, &record(), Duration::minutes(15)).await.expect("Put should succeed.");
		backend.advance(Duration::minutes(16));

		let updated = sessions
			.set_field(&id, SessionField::AccessToken, "jwt".into(), Duration::days(7))
			.await
			.expect("Set field should reach the store.");

		assert!(!updated);
		assert_eq!(sessions.get_all(&id).await.expect("Load should succeed."), None);
	}

	#[tokio::test]
	async fn increment_preserves_the_remaining_ttl() {
		let backend = Arc::new(MemoryStore::default());
		let sessions = SessionStore::new(backend.clone());
		let id = SessionId::generate();
		let key = StoreKey::session(&id);

		sessions.put(&id, &record(), Duration::minutes(15)).await.expect("Put should succeed.");
		backend.advance(Duration::minutes(5));

		let attempts = sessions
			.increment(&id, SessionField::Attempts)
			.await
			.expect("Increment should succeed.");
		let remaining = backend.remaining_ttl(&key).expect("Session should still be live.");

		assert_eq!(attempts, Some(1));
		assert!(remaining <= Duration::minutes(10), "Increment must not extend the TTL.");
	}
}

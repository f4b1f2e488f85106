//! Server-tracked refresh handles: the only credential the gateway remembers.

// self
use crate::{
	_prelude::*,
	auth::{Subject, TokenSecret},
	store::{Fields, KvStore, StoreError, StoreKey},
};

const SUBJECT_FIELD: &str = "subject";

/// Refresh-token store keyed by the SHA-256 fingerprint of each handle.
///
/// Records are immutable once written; a handle maps to exactly one subject snapshot.
#[derive(Clone)]
pub struct RefreshTokenStore {
	store: Arc<dyn KvStore>,
}
impl RefreshTokenStore {
	/// Wraps the shared backend.
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		Self { store }
	}

	/// Mints a new random handle bound to `subject` for `ttl`.
	pub async fn issue(&self, subject: &Subject, ttl: Duration) -> Result<TokenSecret> {
		let handle = TokenSecret::generate();
		let encoded = serde_json::to_string(subject).map_err(StoreError::serialization)?;
		let fields = Fields::from_iter([(SUBJECT_FIELD.to_owned(), encoded)]);

		self.store.put(&StoreKey::refresh_token(handle.fingerprint()), fields, ttl).await?;

		Ok(handle)
	}

	/// Resolves `handle`; `None` when it is unknown or expired.
	pub async fn lookup(&self, handle: &TokenSecret) -> Result<Option<Subject>> {
		let key = StoreKey::refresh_token(handle.fingerprint());
		let Some(fields) = self.store.get_all(&key).await? else {
			return Ok(None);
		};
		let raw = fields.get(SUBJECT_FIELD).ok_or_else(|| {
			StoreError::serialization("refresh record is missing its subject snapshot")
		})?;

		Ok(Some(serde_json::from_str(raw).map_err(StoreError::serialization)?))
	}

	/// Deletes `handle`, returning whether it was live.
	pub async fn revoke(&self, handle: &TokenSecret) -> Result<bool> {
		Ok(self.store.delete(&StoreKey::refresh_token(handle.fingerprint())).await?)
	}
}
impl Debug for RefreshTokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RefreshTokenStore(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{Role, UserId},
		store::MemoryStore,
	};

	#[tokio::test]
	async fn handles_resolve_until_their_ttl_lapses() {
		let backend = Arc::new(MemoryStore::default());
		let refresh = RefreshTokenStore::new(backend.clone());
		let subject = Subject {
			user_id: UserId::new("user-1").expect("User fixture should be valid."),
			email: email("a@b.com"),
			scopes: Role::Admin.scopes(),
		};
		let handle =
			refresh.issue(&subject, Duration::days(7)).await.expect("Issue should succeed.");

		assert_eq!(refresh.lookup(&handle).await.expect("Lookup should succeed."), Some(subject));

		backend.advance(Duration::days(7) + Duration::seconds(1));

		assert_eq!(refresh.lookup(&handle).await.expect("Lookup should succeed."), None);
	}

	#[tokio::test]
	async fn raw_handles_never_reach_the_store_and_revocation_is_final() {
		let backend = Arc::new(MemoryStore::default());
		let refresh = RefreshTokenStore::new(backend.clone());
		let subject = Subject {
			user_id: UserId::new("user-2").expect("User fixture should be valid."),
			email: email("c@d.com"),
			scopes: Role::User.scopes(),
		};
		let handle =
			refresh.issue(&subject, Duration::days(1)).await.expect("Issue should succeed.");

		assert!(backend.remaining_ttl(&StoreKey::refresh_token(handle.expose())).is_none());
		assert!(refresh.revoke(&handle).await.expect("Revoke should succeed."));
		assert!(!refresh.revoke(&handle).await.expect("Revoke should succeed."));
		assert_eq!(refresh.lookup(&handle).await.expect("Lookup should succeed."), None);
	}
}

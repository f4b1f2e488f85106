//! Identity collaborator: resolves an email to a persisted user, creating it on first use.

// self
use crate::{
	_prelude::*,
	auth::{Email, Role, Subject, UserId},
};

/// Boxed future returned by [`UserDirectory`] operations.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Persisted identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	/// Stable identifier.
	pub id: UserId,
	/// Identity key.
	pub email: Email,
	/// Role deciding the granted scopes.
	pub role: Role,
}
impl User {
	/// Snapshot handed to the credential issuer.
	pub fn subject(&self) -> Subject {
		Subject { user_id: self.id.clone(), email: self.email.clone(), scopes: self.role.scopes() }
	}
}

/// Identity collaborator contract.
pub trait UserDirectory
where
	Self: Send + Sync,
{
	/// Returns the user keyed by `email`, creating it with the default role if absent.
	fn find_or_create<'a>(&'a self, email: &'a Email) -> DirectoryFuture<'a, User>;
}

/// In-process directory; admins may be seeded up front.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
	users: RwLock<HashMap<Email, User>>,
}
impl MemoryUserDirectory {
	/// Registers (or promotes) `email` with `role`.
	pub fn seed(&self, email: Email, role: Role) -> User {
		let mut users = self.users.write();
		let user = users.entry(email.clone()).or_insert_with(|| User {
			id: UserId::generate(),
			email,
			role,
		});

		user.role = role;

		user.clone()
	}

	/// Looks a user up without creating it.
	pub fn get(&self, email: &Email) -> Option<User> {
		self.users.read().get(email).cloned()
	}
}
impl UserDirectory for MemoryUserDirectory {
	fn find_or_create<'a>(&'a self, email: &'a Email) -> DirectoryFuture<'a, User> {
		Box::pin(async move {
			let mut users = self.users.write();
			let user = users.entry(email.clone()).or_insert_with(|| User {
				id: UserId::generate(),
				email: email.clone(),
				role: Role::User,
			});

			Ok(user.clone())
		})
	}
}

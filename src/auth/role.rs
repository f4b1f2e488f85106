//! Subject roles and the scope sets they grant.

// self
use crate::{
	_prelude::*,
	auth::{SCOPE_ADMIN, SCOPE_READ, SCOPE_WRITE, ScopeSet},
};

/// Role recorded by the identity collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	/// Regular subject.
	#[default]
	User,
	/// Administrator.
	Admin,
}
impl Role {
	/// Scopes granted to the role.
	pub fn scopes(self) -> ScopeSet {
		let granted: &[&str] = match self {
			Role::User => &[SCOPE_READ, SCOPE_WRITE],
			Role::Admin => &[SCOPE_READ, SCOPE_WRITE, SCOPE_ADMIN],
		};

		ScopeSet::new(granted.iter().copied()).unwrap_or_default()
	}

	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Admin => "admin",
		}
	}
}
impl Display for Role {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

//! Strongly typed identifiers enforced across the gateway domain.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use uuid::Uuid;
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		def_id!(@base $name, $doc, $kind);

		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
	($name:ident, $doc:literal, $kind:literal, redacted) => {
		def_id!(@base $name, $doc, $kind);

		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(concat!($kind, "(<redacted>)"))
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str("<redacted>")
			}
		}
	};
	(@base $name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const SESSION_HANDLE_BYTES: usize = 32;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (session, user, client).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (session, user, client).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (session, user, client).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}
impl From<IdentifierError> for Error {
	fn from(e: IdentifierError) -> Self {
		match e {
			IdentifierError::Empty { kind: "Session" } => {
				Error::unauthenticated(crate::error::AuthFailure::MissingSession)
			},
			IdentifierError::Empty { .. }
			| IdentifierError::ContainsWhitespace { .. }
			| IdentifierError::TooLong { .. } => Error::Validation { reason: "invalid_identifier" },
		}
	}
}

def_id! {
	SessionId,
	"Opaque handle identifying a session record; never logged.",
	"Session",
	redacted
}
def_id! { UserId, "Identifier assigned to a subject by the identity collaborator.", "User" }
def_id! { ClientId, "Client identifier (source address) a session is bound to.", "Client" }

impl SessionId {
	/// Generates a fresh handle from 32 random bytes, URL-safe base64 without padding.
	pub fn generate() -> Self {
		let bytes: [u8; SESSION_HANDLE_BYTES] = rand::random();

		Self(URL_SAFE_NO_PAD.encode(bytes))
	}

	/// Returns the raw handle for transport (cookie or header). Never log this value.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Short, non-reversible label safe for audit records and logs.
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(self.0.as_bytes());

		URL_SAFE_NO_PAD.encode(&digest[..12])
	}
}

impl UserId {
	/// Allocates a random (v4 UUID) identifier for a newly created user.
	pub fn generate() -> Self {
		Self(Uuid::new_v4().to_string())
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_empty_values() {
		assert!(ClientId::new(" 10.0.0.1").is_err(), "Leading whitespace must be rejected.");
		assert!(UserId::new("").is_err());

		let client = ClientId::new("10.0.0.1").expect("Client fixture should be considered valid.");

		assert_eq!(client.as_ref(), "10.0.0.1");
		assert_eq!(format!("{client:?}"), "Client(10.0.0.1)");
	}

	#[test]
	fn session_handles_are_random_and_redacted() {
		let first = SessionId::generate();
		let second = SessionId::generate();

		assert_ne!(first, second);
		assert_eq!(first.expose().len(), 43, "32 bytes encode to 43 base64url characters.");
		assert_eq!(format!("{first:?}"), "Session(<redacted>)");
		assert_eq!(format!("{first}"), "<redacted>");
		assert!(!first.fingerprint().contains(first.expose()));
		assert_eq!(first.fingerprint(), first.clone().fingerprint());
	}

	#[test]
	fn serde_enforces_validation() {
		let user: UserId =
			serde_json::from_str("\"user-42\"").expect("User id should deserialize successfully.");

		assert_eq!(user.as_ref(), "user-42");
		assert!(serde_json::from_str::<UserId>("\"with space\"").is_err());

		let too_long = format!("\"{}\"", "a".repeat(IDENTIFIER_MAX_LEN + 1));

		assert!(serde_json::from_str::<ClientId>(&too_long).is_err());
	}

	#[test]
	fn empty_session_maps_to_missing_session() {
		let error: Error = SessionId::new("").expect_err("Empty handle must fail.").into();

		assert_eq!(error.reason(), "missing_session");

		let error: Error = ClientId::new("a b").expect_err("Whitespace must fail.").into();

		assert_eq!(error.kind(), ErrorKind::Validation);
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<UserId, u8> = HashMap::from_iter([(
			UserId::new("user-123").expect("User used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("user-123"), Some(&7));
	}
}

//! Validated subject email addresses.

// std
use std::sync::OnceLock;
// crates.io
use regex::Regex;
// self
use crate::_prelude::*;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
const EMAIL_MAX_LEN: usize = 254;

/// Error returned when an email address fails boundary validation.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum EmailError {
	/// Nothing but whitespace was supplied.
	#[error("Email address cannot be empty.")]
	Empty,
	/// The address does not look like `local@domain.tld`.
	#[error("Email address is malformed.")]
	Malformed,
	/// The address exceeds the RFC 5321 path limit.
	#[error("Email address exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted length.
		max: usize,
	},
}
impl From<EmailError> for Error {
	fn from(_: EmailError) -> Self {
		Error::Validation { reason: "invalid_email" }
	}
}

/// Subject email, trimmed and lowercased so identity lookups stay stable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);
impl Email {
	/// Parses and normalizes an address.
	pub fn parse(value: impl AsRef<str>) -> Result<Self, EmailError> {
		let trimmed = value.as_ref().trim();

		if trimmed.is_empty() {
			return Err(EmailError::Empty);
		}
		if trimmed.len() > EMAIL_MAX_LEN {
			return Err(EmailError::TooLong { max: EMAIL_MAX_LEN });
		}
		if !pattern().is_some_and(|re| re.is_match(trimmed)) {
			return Err(EmailError::Malformed);
		}

		Ok(Self(trimmed.to_ascii_lowercase()))
	}

	/// Borrow the normalized address.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Log-safe form keeping only the first character of the local part (`a***@example.com`).
	pub fn masked(&self) -> String {
		let (local, domain) = self.0.split_once('@').unwrap_or((&self.0, ""));
		let first = local.chars().next().map(String::from).unwrap_or_default();

		format!("{first}***@{domain}")
	}
}
impl AsRef<str> for Email {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<Email> for String {
	fn from(value: Email) -> Self {
		value.0
	}
}
impl TryFrom<String> for Email {
	type Error = EmailError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}
impl FromStr for Email {
	type Err = EmailError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl Debug for Email {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Email({})", self.masked())
	}
}
impl Display for Email {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn pattern() -> Option<&'static Regex> {
	static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

	PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

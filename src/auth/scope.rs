//! Flat capability sets granted to subjects and required by operations.

// std
use std::{collections::BTreeSet, slice::Iter};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

/// Read access to downstream resources.
pub const SCOPE_READ: &str = "read";
/// Mutating access to downstream resources.
pub const SCOPE_WRITE: &str = "write";
/// Administrative access.
pub const SCOPE_ADMIN: &str = "admin";

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain whitespace or the comma separator.
	#[error("Scope contains a separator character: {scope}.")]
	ContainsSeparator {
		/// The offending scope string.
		scope: String,
	},
}

/// Normalized set of capability strings.
///
/// Scopes are deduplicated and sorted so equality and hashing stay stable no matter the
/// order they were granted in. Membership is a plain lookup; there is no inheritance between
/// scopes, so `admin` does not imply `write`.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeSet {
	scopes: Arc<[String]>,
}
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self { scopes: normalize(scopes)? })
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are granted.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Returns true if the normalized set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.scopes.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|s| s.as_str())
	}

	/// Comma-joined form used by the `X-User-Scopes` forwarding header.
	pub fn header_value(&self) -> String {
		self.scopes.join(",")
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.scopes.join(" "))
	}
}

/// Iterator over scope strings.
pub struct ScopeIter<'a> {
	inner: Iter<'a, String>,
}
impl<'a> Iterator for ScopeIter<'a> {
	type Item = &'a str;

	fn next(&mut self) -> Option<Self::Item> {
		self.inner.next().map(|s| s.as_str())
	}
}
impl<'a> IntoIterator for &'a ScopeSet {
	type IntoIter = ScopeIter<'a>;
	type Item = &'a str;

	fn into_iter(self) -> Self::IntoIter {
		ScopeIter { inner: self.scopes.iter() }
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.scopes.len()))?;

		for scope in self.scopes.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(|c| c.is_whitespace() || c == ',') {
			return Err(ScopeValidationError::ContainsSeparator { scope: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_normalize_order_and_duplicates() {
		let lhs = ScopeSet::new([SCOPE_WRITE, SCOPE_READ, SCOPE_WRITE])
			.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new([SCOPE_READ, SCOPE_WRITE])
			.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.len(), 2);
		assert_eq!(lhs.header_value(), "read,write");
		assert_eq!(lhs.to_string(), "read write");
	}

	#[test]
	fn membership_has_no_inheritance() {
		let admin_only = ScopeSet::new([SCOPE_ADMIN]).expect("Admin scope should be valid.");

		assert!(admin_only.contains(SCOPE_ADMIN));
		assert!(!admin_only.contains(SCOPE_WRITE));
		assert!(!ScopeSet::default().contains(SCOPE_READ));
	}

	#[test]
	fn separators_are_rejected() {
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
		assert!(matches!(
			ScopeSet::new(["read,write"]),
			Err(ScopeValidationError::ContainsSeparator { .. })
		));
		assert!(ScopeSet::new(["read write"]).is_err());
	}

	#[test]
	fn serde_uses_a_json_array() {
		let scopes = ScopeSet::new([SCOPE_WRITE, SCOPE_READ]).expect("Scopes should be valid.");
		let json = serde_json::to_string(&scopes).expect("Scopes should serialize.");

		assert_eq!(json, "[\"read\",\"write\"]");
		assert!(serde_json::from_str::<ScopeSet>("[\"\"]").is_err());
	}
}

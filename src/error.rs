//! Gateway-level error types shared across sessions, OTP, credentials, and stores.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// A collaborator could not be reached or answered with a failure.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Input failed boundary validation.
	#[error("Request is invalid: {reason}.")]
	Validation {
		/// Machine-readable reason string.
		reason: &'static str,
	},
	/// Session or credential is missing, invalid, or expired.
	#[error("Authentication failed: {reason}.")]
	Unauthenticated {
		/// Specific authentication failure.
		reason: AuthFailure,
	},
	/// Refresh handle is unknown or expired.
	#[error("Refresh grant rejected: {reason}.")]
	InvalidGrant {
		/// Gateway-supplied reason string.
		reason: String,
	},
	/// The subject lacks the scope required by the operation.
	#[error("Subject lacks the `{required}` scope.")]
	InsufficientScope {
		/// Scope the operation requires.
		required: String,
	},
	/// A resend, attempt, or rate quota has been exhausted.
	#[error("Quota exceeded: {quota}.")]
	QuotaExceeded {
		/// Quota that tripped.
		quota: Quota,
	},
	/// The session already completed verification.
	#[error("Session is already verified.")]
	AlreadyVerified,
	/// The rate limiter counting store could not be consulted.
	#[error("Rate limiter is unavailable.")]
	LimiterUnavailable {
		/// Underlying store failure.
		#[source]
		source: crate::store::StoreError,
	},
	/// Access token signing or OTP hashing failed.
	#[error("Credential material could not be produced: {reason} ({detail}).")]
	Crypto {
		/// Short description of the failing primitive.
		reason: &'static str,
		/// Primitive-specific failure text.
		detail: String,
	},
}
impl Error {
	/// Shorthand for an authentication failure.
	pub fn unauthenticated(reason: AuthFailure) -> Self {
		Self::Unauthenticated { reason }
	}

	/// Wraps a cryptographic primitive failure.
	pub fn crypto(reason: &'static str, detail: impl Display) -> Self {
		Self::Crypto { reason, detail: detail.to_string() }
	}

	/// Returns the taxonomy bucket this error belongs to.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Validation { .. } => ErrorKind::Validation,
			Self::Unauthenticated { .. } | Self::InvalidGrant { .. } => ErrorKind::Authentication,
			Self::InsufficientScope { .. } => ErrorKind::Authorization,
			Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
			Self::AlreadyVerified => ErrorKind::Conflict,
			Self::Transport(_) => ErrorKind::UpstreamUnavailable,
			Self::Storage(_)
			| Self::Config(_)
			| Self::LimiterUnavailable { .. }
			| Self::Crypto { .. } => ErrorKind::Internal,
		}
	}

	/// Stable machine-readable reason string surfaced to clients and audit records.
	pub fn reason(&self) -> &'static str {
		match self {
			Self::Validation { reason } => reason,
			Self::Unauthenticated { reason } => reason.as_str(),
			Self::InvalidGrant { .. } => "invalid_grant",
			Self::InsufficientScope { .. } => "insufficient_scope",
			Self::QuotaExceeded { quota } => quota.as_str(),
			Self::AlreadyVerified => "already_verified",
			Self::Transport(_) => "upstream_unavailable",
			Self::LimiterUnavailable { .. } => "rate_limiter_unavailable",
			Self::Storage(_) => "store_unavailable",
			Self::Config(_) => "misconfigured",
			Self::Crypto { .. } => "credential_failure",
		}
	}

	/// Client-safe description; internal and upstream details are never exposed.
	pub fn public_message(&self) -> String {
		match self.kind() {
			ErrorKind::Internal => "Internal server error.".into(),
			ErrorKind::UpstreamUnavailable => "A downstream service is unavailable.".into(),
			_ => self.to_string(),
		}
	}
}

/// Error taxonomy shared by every protected surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Malformed input.
	Validation,
	/// Missing, invalid, or expired session or token.
	Authentication,
	/// Insufficient scope.
	Authorization,
	/// Resend, attempt, or rate quota exhausted.
	QuotaExceeded,
	/// Session already verified.
	Conflict,
	/// Collaborator unreachable.
	UpstreamUnavailable,
	/// Store unreachable, signing failure, or misconfiguration.
	Internal,
}
impl ErrorKind {
	/// HTTP status code associated with the bucket.
	pub const fn status(self) -> u16 {
		match self {
			ErrorKind::Validation => 400,
			ErrorKind::Authentication => 401,
			ErrorKind::Authorization => 403,
			ErrorKind::QuotaExceeded => 429,
			ErrorKind::Conflict => 409,
			ErrorKind::UpstreamUnavailable => 502,
			ErrorKind::Internal => 500,
		}
	}

	/// Returns a stable label suitable for audit or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Validation => "validation_error",
			ErrorKind::Authentication => "authentication_error",
			ErrorKind::Authorization => "authorization_error",
			ErrorKind::QuotaExceeded => "quota_exceeded",
			ErrorKind::Conflict => "conflict",
			ErrorKind::UpstreamUnavailable => "upstream_unavailable",
			ErrorKind::Internal => "internal_error",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Specific authentication failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
	/// No session handle was presented.
	MissingSession,
	/// The presented handle does not resolve to a live session.
	SessionExpired,
	/// The session belongs to a different client.
	ClientMismatch,
	/// The supplied email does not match the session subject.
	EmailMismatch,
	/// The supplied code does not match the active OTP.
	InvalidOtp,
	/// The active OTP outlived its freshness window.
	OtpExpired,
	/// The session carries no access token.
	MissingAccessToken,
	/// The access token is malformed or carries a bad signature.
	InvalidAccessToken,
	/// The access token expired and could not be refreshed.
	RefreshFailed,
}
impl AuthFailure {
	/// Returns the stable reason string.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthFailure::MissingSession => "missing_session",
			AuthFailure::SessionExpired => "session_expired",
			AuthFailure::ClientMismatch => "client_mismatch",
			AuthFailure::EmailMismatch => "email_mismatch",
			AuthFailure::InvalidOtp => "invalid_otp",
			AuthFailure::OtpExpired => "otp_expired",
			AuthFailure::MissingAccessToken => "missing_access_token",
			AuthFailure::InvalidAccessToken => "invalid_access_token",
			AuthFailure::RefreshFailed => "refresh_failed",
		}
	}
}
impl Display for AuthFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Quotas enforced by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
	/// Wrong-code verification attempts.
	Attempts,
	/// OTP regenerations.
	Resends,
	/// Requests per fixed window.
	RateLimit,
}
impl Quota {
	/// Returns the stable reason string.
	pub const fn as_str(self) -> &'static str {
		match self {
			Quota::Attempts => "max_attempts_exceeded",
			Quota::Resends => "max_resends_exceeded",
			Quota::RateLimit => "rate_limited",
		}
	}
}
impl Display for Quota {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures raised while wiring the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A collaborator URL cannot be parsed or joined.
	#[error("Collaborator URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A configuration document does not match the schema.
	#[error("Configuration is malformed at `{path}`: {message}.")]
	Malformed {
		/// Path to the offending value.
		path: String,
		/// Decoder message.
		message: String,
	},
	/// A policy value is out of range.
	#[error("Policy field `{field}` is invalid: {reason}.")]
	InvalidPolicy {
		/// Offending field name.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<url::ParseError> for ConfigError {
	fn from(e: url::ParseError) -> Self {
		Self::InvalidUrl { source: e }
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Collaborator failures (network, timeout, unexpected status). Never retried by the gateway.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure or timeout.
	#[error("Network error occurred while calling the {collaborator} collaborator.")]
	Network {
		/// Collaborator label.
		collaborator: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Collaborator answered with a non-success status.
	#[error("The {collaborator} collaborator rejected the request with status {status}.")]
	Status {
		/// Collaborator label.
		collaborator: &'static str,
		/// HTTP status code.
		status: u16,
	},
	/// Collaborator acknowledged nothing (e.g. delivery queue refused the message).
	#[error("The {collaborator} collaborator did not acknowledge the request.")]
	Rejected {
		/// Collaborator label.
		collaborator: &'static str,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		collaborator: &'static str,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { collaborator, source: Box::new(src) }
	}
}

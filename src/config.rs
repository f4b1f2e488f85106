//! Gateway configuration: typed policies, a validating builder, and serde defaults.

// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError};

const MIN_SIGNING_SECRET_LEN: usize = 32;

/// OTP generation and verification policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpPolicy {
	/// Number of decimal digits per code.
	pub code_length: usize,
	/// Freshness window of a single code, counted from its (re)generation.
	#[serde(with = "duration_secs")]
	pub otp_ttl: Duration,
	/// TTL of a pre-auth session record.
	#[serde(with = "duration_secs")]
	pub pending_session_ttl: Duration,
	/// Wrong guesses tolerated before the session is discarded.
	pub max_attempts: u32,
	/// Regenerations tolerated before the session is discarded.
	pub max_resends: u32,
	/// Argon2 memory cost in KiB.
	pub hash_memory_kib: u32,
	/// Argon2 iteration count.
	pub hash_iterations: u32,
}
impl Default for OtpPolicy {
	fn default() -> Self {
		Self {
			code_length: 6,
			otp_ttl: Duration::minutes(5),
			pending_session_ttl: Duration::minutes(15),
			max_attempts: 3,
			max_resends: 3,
			hash_memory_kib: 19_456,
			hash_iterations: 2,
		}
	}
}

/// Access and refresh credential lifetimes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialPolicy {
	/// Lifetime of a signed access token.
	#[serde(with = "duration_secs")]
	pub access_token_ttl: Duration,
	/// Lifetime of a refresh handle (and of the logged-in session), in days.
	pub refresh_token_days: u32,
}
impl CredentialPolicy {
	/// Refresh lifetime as a duration.
	pub fn refresh_token_ttl(&self) -> Duration {
		Duration::days(i64::from(self.refresh_token_days))
	}
}
impl Default for CredentialPolicy {
	fn default() -> Self {
		Self { access_token_ttl: Duration::hours(1), refresh_token_days: 7 }
	}
}

/// Fixed-window admission policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
	/// Requests admitted per client per window.
	pub limit: u64,
	/// Window length.
	#[serde(with = "duration_secs")]
	pub window: Duration,
	/// Counter namespace; instances sharing a scope share a budget.
	pub scope: String,
}
impl Default for RateLimitPolicy {
	fn default() -> Self {
		Self { limit: 3, window: Duration::minutes(1), scope: "gateway".into() }
	}
}

/// Session handle transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiePolicy {
	/// Cookie carrying the session handle.
	pub name: String,
	/// Header accepted from internal services instead of the cookie.
	pub header: String,
	/// Cookie path attribute.
	pub path: String,
	/// Emit the `Secure` attribute.
	pub secure: bool,
}
impl Default for CookiePolicy {
	fn default() -> Self {
		Self {
			name: "sessionId".into(),
			header: "X-Session-ID".into(),
			path: "/".into(),
			secure: true,
		}
	}
}

/// Fully validated gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// HMAC secret used to sign access tokens.
	pub signing_secret: TokenSecret,
	/// OTP policy.
	#[serde(default)]
	pub otp: OtpPolicy,
	/// Credential lifetimes.
	#[serde(default)]
	pub credentials: CredentialPolicy,
	/// Rate-limit policy.
	#[serde(default)]
	pub rate_limit: RateLimitPolicy,
	/// Session handle transport.
	#[serde(default)]
	pub cookie: CookiePolicy,
	/// Derive the client identifier from the first `X-Forwarded-For` entry.
	#[serde(default)]
	pub trust_forwarded_for: bool,
	/// Bound of the audit queue; events beyond it are dropped and logged.
	#[serde(default = "default_audit_queue_capacity")]
	pub audit_queue_capacity: usize,
	/// Timeout for calls to the email and identity collaborators.
	#[serde(default = "default_collaborator_timeout", with = "duration_secs")]
	pub collaborator_timeout: Duration,
	/// Timeout for forwarded resource requests.
	#[serde(default = "default_resource_timeout", with = "duration_secs")]
	pub resource_timeout: Duration,
}
impl GatewayConfig {
	/// Returns a builder seeded with defaults and the provided signing secret.
	pub fn builder(signing_secret: impl Into<String>) -> GatewayConfigBuilder {
		GatewayConfigBuilder::new(signing_secret)
	}

	/// Parses a JSON document and validates it.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de).map_err(|e| {
			ConfigError::Malformed { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Validates invariants across every policy.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.signing_secret.expose().len() < MIN_SIGNING_SECRET_LEN {
			return Err(invalid("signing_secret", "must be at least 32 bytes"));
		}
		if !(4..=10).contains(&self.otp.code_length) {
			return Err(invalid("otp.code_length", "must be between 4 and 10 digits"));
		}

		positive("otp.otp_ttl", self.otp.otp_ttl)?;
		positive("otp.pending_session_ttl", self.otp.pending_session_ttl)?;

		if self.otp.otp_ttl > self.otp.pending_session_ttl {
			return Err(invalid("otp.otp_ttl", "must not outlive the pending session"));
		}
		if self.otp.max_attempts == 0 {
			return Err(invalid("otp.max_attempts", "must be greater than zero"));
		}
		if self.otp.max_resends == 0 {
			return Err(invalid("otp.max_resends", "must be greater than zero"));
		}

		positive("credentials.access_token_ttl", self.credentials.access_token_ttl)?;

		if self.credentials.refresh_token_days == 0 {
			return Err(invalid("credentials.refresh_token_days", "must be greater than zero"));
		}
		if self.rate_limit.limit == 0 {
			return Err(invalid("rate_limit.limit", "must be greater than zero"));
		}

		positive("rate_limit.window", self.rate_limit.window)?;

		if self.rate_limit.scope.is_empty() || self.rate_limit.scope.contains(char::is_whitespace) {
			return Err(invalid("rate_limit.scope", "must be a non-empty token"));
		}
		if self.cookie.name.is_empty() || self.cookie.header.is_empty() {
			return Err(invalid("cookie", "cookie and header names are required"));
		}
		if self.audit_queue_capacity == 0 {
			return Err(invalid("audit_queue_capacity", "must be greater than zero"));
		}

		positive("collaborator_timeout", self.collaborator_timeout)?;
		positive("resource_timeout", self.resource_timeout)?;

		Ok(())
	}
}

/// Builder for [`GatewayConfig`] values.
#[derive(Debug)]
pub struct GatewayConfigBuilder {
	config: GatewayConfig,
}
impl GatewayConfigBuilder {
	/// Creates a new builder seeded with defaults.
	pub fn new(signing_secret: impl Into<String>) -> Self {
		Self {
			config: GatewayConfig {
				signing_secret: TokenSecret::new(signing_secret),
				otp: OtpPolicy::default(),
				credentials: CredentialPolicy::default(),
				rate_limit: RateLimitPolicy::default(),
				cookie: CookiePolicy::default(),
				trust_forwarded_for: false,
				audit_queue_capacity: default_audit_queue_capacity(),
				collaborator_timeout: default_collaborator_timeout(),
				resource_timeout: default_resource_timeout(),
			},
		}
	}

	/// Overrides the OTP policy.
	pub fn otp(mut self, policy: OtpPolicy) -> Self {
		self.config.otp = policy;

		self
	}

	/// Overrides credential lifetimes.
	pub fn credentials(mut self, policy: CredentialPolicy) -> Self {
		self.config.credentials = policy;

		self
	}

	/// Overrides the rate-limit policy.
	pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
		self.config.rate_limit = policy;

		self
	}

	/// Overrides the session handle transport.
	pub fn cookie(mut self, policy: CookiePolicy) -> Self {
		self.config.cookie = policy;

		self
	}

	/// Trusts `X-Forwarded-For` when deriving the client identifier.
	pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
		self.config.trust_forwarded_for = trust;

		self
	}

	/// Overrides the audit queue bound.
	pub fn audit_queue_capacity(mut self, capacity: usize) -> Self {
		self.config.audit_queue_capacity = capacity;

		self
	}

	/// Overrides the email/identity collaborator timeout.
	pub fn collaborator_timeout(mut self, timeout: Duration) -> Self {
		self.config.collaborator_timeout = timeout;

		self
	}

	/// Overrides the resource forwarding timeout.
	pub fn resource_timeout(mut self, timeout: Duration) -> Self {
		self.config.resource_timeout = timeout;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<GatewayConfig, ConfigError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn default_audit_queue_capacity() -> usize {
	1_024
}

fn default_collaborator_timeout() -> Duration {
	Duration::seconds(5)
}

fn default_resource_timeout() -> Duration {
	Duration::seconds(30)
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
	ConfigError::InvalidPolicy { field, reason }
}

fn positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(invalid(field, "must be positive")) }
}

mod duration_secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const SECRET: &str = "0123456789abcdef0123456789abcdef";

	#[test]
	fn defaults_follow_the_deployment_profile() {
		let config = GatewayConfig::builder(SECRET).build().expect("Defaults should validate.");

		assert_eq!(config.otp.code_length, 6);
		assert_eq!(config.otp.otp_ttl, Duration::minutes(5));
		assert_eq!(config.otp.pending_session_ttl, Duration::minutes(15));
		assert_eq!((config.otp.max_attempts, config.otp.max_resends), (3, 3));
		assert_eq!(config.rate_limit.limit, 3);
		assert_eq!(config.credentials.refresh_token_ttl(), Duration::days(7));
		assert_eq!(config.cookie.name, "sessionId");
		assert_eq!(config.resource_timeout, Duration::seconds(30));
	}

	#[test]
	fn builder_rejects_out_of_range_policies() {
		let short = GatewayConfig::builder("short").build().expect_err("Short secret must fail.");

		assert!(matches!(short, ConfigError::InvalidPolicy { field: "signing_secret", .. }));

		let zero_attempts = GatewayConfig::builder(SECRET)
			.otp(OtpPolicy { max_attempts: 0, ..OtpPolicy::default() })
			.build()
			.expect_err("Zero attempts must fail.");

		assert!(matches!(
			zero_attempts,
			ConfigError::InvalidPolicy { field: "otp.max_attempts", .. }
		));

		let stale = GatewayConfig::builder(SECRET)
			.otp(OtpPolicy { otp_ttl: Duration::hours(1), ..OtpPolicy::default() })
			.build()
			.expect_err("Codes outliving their session must fail.");

		assert!(matches!(stale, ConfigError::InvalidPolicy { field: "otp.otp_ttl", .. }));
		assert!(
			GatewayConfig::builder(SECRET)
				.rate_limit(RateLimitPolicy { limit: 0, ..RateLimitPolicy::default() })
				.build()
				.is_err()
		);
	}

	#[test]
	fn json_documents_fill_in_defaults() {
		let raw = serde_json::json!({
			"signing_secret": SECRET,
			"rate_limit": { "limit": 10 },
			"credentials": { "refresh_token_days": 30 },
		})
		.to_string();
		let config = GatewayConfig::from_json(&raw).expect("Partial JSON should validate.");

		assert_eq!(config.rate_limit.limit, 10);
		assert_eq!(config.rate_limit.window, Duration::minutes(1));
		assert_eq!(config.credentials.refresh_token_days, 30);
		assert_eq!(config.audit_queue_capacity, 1_024);
		assert!(GatewayConfig::from_json("{\"otp\":{}}").is_err(), "Secret is mandatory.");

		let err = GatewayConfig::from_json(&format!(
			r#"{{"signing_secret":"{SECRET}","otp":{{"max_attempts":"three"}}}}"#
		))
		.expect_err("Mistyped fields must fail.");

		assert!(matches!(
			err,
			ConfigError::Malformed { ref path, .. } if path == "otp.max_attempts"
		));
	}

	#[test]
	fn signing_secret_is_redacted_in_debug_output() {
		let config = GatewayConfig::builder(SECRET).build().expect("Defaults should validate.");

		assert!(!format!("{config:?}").contains(SECRET));
	}
}

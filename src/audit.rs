//! Audit stream: immutable records of every security-relevant transition.
//!
//! Events are observational only; nothing in the gateway ever reads them back to make an
//! authorization decision. Emission goes through a bounded queue drained by a background worker,
//! so a slow or failing sink never delays the request that produced the event.

mod emitter;

pub use emitter::*;

// crates.io
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{SessionId, UserId},
	error::TransportError,
	rate_limit::RateLimitDecision,
};

/// Boxed future returned by [`AuditSink::record`].
pub type AuditFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + 'a + Send>>;

/// Coarse event grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditGroup {
	/// Signup, OTP, and credential transitions.
	Auth,
	/// Session lifecycle.
	Session,
	/// Mediated resource access and admission control.
	Api,
	/// Internal failures.
	Error,
}
impl AuditGroup {
	/// Stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuditGroup::Auth => "AUTH",
			AuditGroup::Session => "SESSION",
			AuditGroup::Api => "API",
			AuditGroup::Error => "ERROR",
		}
	}
}

/// Transition being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
	/// Signup request handled.
	Signup,
	/// OTP regenerated on an existing session.
	OtpResent,
	/// OTP verification attempt.
	OtpVerified,
	/// Access/refresh credentials minted.
	TokenIssued,
	/// Access token re-minted from a refresh handle.
	TokenRefreshed,
	/// Protected request mediated.
	ResourceAccess,
	/// Rate-limit decision.
	RateLimit,
	/// Session torn down on request.
	Logout,
}
impl AuditAction {
	/// Stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuditAction::Signup => "SIGNUP",
			AuditAction::OtpResent => "OTP_RESENT",
			AuditAction::OtpVerified => "OTP_VERIFIED",
			AuditAction::TokenIssued => "TOKEN_ISSUED",
			AuditAction::TokenRefreshed => "TOKEN_REFRESHED",
			AuditAction::ResourceAccess => "RESOURCE_ACCESS",
			AuditAction::RateLimit => "RATE_LIMIT",
			AuditAction::Logout => "LOGOUT",
		}
	}
}
impl Display for AuditAction {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Where a request came from and what it asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
	/// Client address as resolved by the gateway.
	pub source_ip: String,
	/// HTTP method.
	pub method: String,
	/// Request path without the query string.
	pub path: String,
}

/// Counters attached to rate-limit events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
	/// Requests counted in the window.
	pub count: u64,
	/// Window budget.
	pub limit: u64,
	/// Window length in seconds.
	pub window_secs: i64,
	/// Whether the request was rejected.
	pub blocked: bool,
}
impl From<&RateLimitDecision> for RateLimitSnapshot {
	fn from(decision: &RateLimitDecision) -> Self {
		Self {
			count: decision.count,
			limit: decision.limit,
			window_secs: decision.window.whole_seconds(),
			blocked: !decision.allowed,
		}
	}
}

/// One audit record. Never carries OTP codes, token values, or raw session handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
	/// Unique event identifier.
	pub id: Uuid,
	/// Event grouping.
	pub group: AuditGroup,
	/// Transition.
	pub action: AuditAction,
	/// Acting user, once known.
	pub subject_id: Option<UserId>,
	/// Session fingerprint (see [`SessionId::fingerprint`]).
	pub session: Option<String>,
	/// Request origin.
	#[serde(flatten)]
	pub request: RequestContext,
	/// HTTP status returned to the caller.
	pub status: u16,
	/// Machine-readable outcome (`success` or an error reason).
	pub outcome: String,
	/// Optional human-readable detail.
	pub message: Option<String>,
	/// Counters for rate-limit events.
	pub rate_limit: Option<RateLimitSnapshot>,
	/// Creation instant.
	#[serde(with = "time::serde::timestamp")]
	pub recorded_at: OffsetDateTime,
}
impl AuditEvent {
	/// Starts a successful event for `request`.
	pub fn new(
		group: AuditGroup,
		action: AuditAction,
		request: RequestContext,
		status: u16,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			group,
			action,
			subject_id: None,
			session: None,
			request,
			status,
			outcome: "success".into(),
			message: None,
			rate_limit: None,
			recorded_at: OffsetDateTime::now_utc(),
		}
	}

	/// Starts an event describing `error`; internal failures move to [`AuditGroup::Error`].
	pub fn failure(
		group: AuditGroup,
		action: AuditAction,
		request: RequestContext,
		error: &Error,
	) -> Self {
		let kind = error.kind();
		let group = if kind == ErrorKind::Internal { AuditGroup::Error } else { group };

		Self {
			outcome: error.reason().into(),
			message: Some(error.public_message()),
			..Self::new(group, action, request, kind.status())
		}
	}

	/// Attaches the acting user.
	pub fn with_subject(mut self, subject_id: &UserId) -> Self {
		self.subject_id = Some(subject_id.clone());

		self
	}

	/// Attaches the session fingerprint.
	pub fn with_session(mut self, session: &SessionId) -> Self {
		self.session = Some(session.fingerprint());

		self
	}

	/// Attaches a message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());

		self
	}

	/// Attaches rate-limit counters.
	pub fn with_rate_limit(mut self, decision: &RateLimitDecision) -> Self {
		self.rate_limit = Some(decision.into());

		self
	}
}

/// Audit persistence contract.
pub trait AuditSink
where
	Self: Send + Sync,
{
	/// Persists one event.
	fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a>;
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
	events: Mutex<Vec<AuditEvent>>,
}
impl MemoryAuditSink {
	/// Events recorded so far, oldest first.
	pub fn events(&self) -> Vec<AuditEvent> {
		self.events.lock().clone()
	}

	/// Events recorded for `action`.
	pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
		self.events.lock().iter().filter(|e| e.action == action).cloned().collect()
	}
}
impl AuditSink for MemoryAuditSink {
	fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a> {
		Box::pin(async move {
			self.events.lock().push(event.clone());

			Ok(())
		})
	}
}

/// Sink mirroring events into structured logs under the `otp_gateway::audit` target.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;
#[cfg(feature = "tracing")]
impl AuditSink for TracingAuditSink {
	fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a> {
		Box::pin(async move {
			tracing::info!(
				target: "otp_gateway::audit",
				id = %event.id,
				group = event.group.as_str(),
				action = event.action.as_str(),
				subject_id = event.subject_id.as_deref(),
				session = event.session.as_deref(),
				source_ip = %event.request.source_ip,
				method = %event.request.method,
				path = %event.request.path,
				status = event.status,
				outcome = %event.outcome,
				message = event.message.as_deref(),
				"Audit event."
			);

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, error::AuthFailure};

	fn request() -> RequestContext {
		RequestContext { source_ip: "10.0.0.1".into(), method: "GET".into(), path: "/items".into() }
	}

	#[test]
	fn failures_carry_taxonomy_outcome_and_fingerprint_only() {
		let session = SessionId::generate();
		let event = AuditEvent::failure(
			AuditGroup::Api,
			AuditAction::ResourceAccess,
			request(),
			&Error::unauthenticated(AuthFailure::InvalidAccessToken),
		)
		.with_session(&session);
		let json = serde_json::to_string(&event).expect("Audit events should serialize.");

		assert_eq!(event.status, 401);
		assert_eq!(event.outcome, "invalid_access_token");
		assert_eq!(event.group, AuditGroup::Api);
		assert!(!json.contains(session.expose()), "Raw session handles must never be audited.");
		assert!(json.contains("\"action\":\"RESOURCE_ACCESS\""));
		assert!(json.contains("\"source_ip\":\"10.0.0.1\""));
	}

	#[test]
	fn internal_failures_move_to_the_error_group() {
		let event = AuditEvent::failure(
			AuditGroup::Api,
			AuditAction::RateLimit,
			request(),
			&Error::LimiterUnavailable {
				source: crate::store::StoreError::Backend { message: "down".into() },
			},
		);

		assert_eq!(event.group, AuditGroup::Error);
		assert_eq!(event.status, 500);
		assert_eq!(event.outcome, "rate_limiter_unavailable");
	}

	#[tokio::test]
	async fn memory_sink_filters_by_action() {
		let sink = MemoryAuditSink::default();

		for action in [AuditAction::Signup, AuditAction::Logout, AuditAction::Signup] {
			sink.record(&AuditEvent::new(AuditGroup::Auth, action, request(), 200))
				.await
				.expect("Memory sink should accept events.");
		}

		assert_eq!(sink.events().len(), 3);
		assert_eq!(sink.events_for(AuditAction::Signup).len(), 2);
	}
}

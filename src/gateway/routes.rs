//! HTTP surface: signup and verification routes, logout, rate limiting, and the mediator
//! fallback.

// std
use std::net::SocketAddr;
// crates.io
use axum::{
	Extension, Json, Router,
	body::Bytes,
	extract::{ConnectInfo, Request, State},
	http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::post,
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	audit::{AuditAction, AuditEvent, AuditGroup, RequestContext},
	auth::{ClientId, Email, SessionId, TokenSecret, UserId},
	error::{AuthFailure, Quota},
	gateway::{ClientContext, Gateway, clear_session_cookie, session_cookie, session_handle},
	issuer::CredentialBundle,
	obs::{FlowKind, FlowSpan},
	otp::OtpIssued,
	rate_limit::RateLimitDecision,
	session::SessionRecord,
};

/// Response header carrying the window budget.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Response header carrying the requests left in the window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// `POST /signup` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignupRequest {
	/// Address the code is sent to.
	pub email: String,
}

/// `POST /verify-otp` body.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
	/// Code received by email.
	pub otp: String,
	/// Optional address the session must belong to.
	#[serde(default)]
	pub email: Option<String>,
}
impl Debug for VerifyRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("VerifyRequest").field("email", &self.email).finish_non_exhaustive()
	}
}

/// Body of status-only responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
	/// `otp_sent` or `logged_out`.
	pub status: String,
}

/// `POST /verify-otp` success body.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
	/// Always `verified`.
	pub status: String,
	/// Signed access token.
	pub access_token: String,
	/// Refresh handle.
	pub refresh_token: String,
	/// Refresh handle lifetime in days.
	pub refresh_token_duration_days: i64,
}
impl Debug for VerifyResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("VerifyResponse")
			.field("status", &self.status)
			.field("refresh_token_duration_days", &self.refresh_token_duration_days)
			.finish_non_exhaustive()
	}
}

/// Builds the gateway router.
///
/// Every route, the mediator fallback included, sits behind the rate-limit middleware. Serve it
/// with `into_make_service_with_connect_info::<SocketAddr>()` so peer addresses are available
/// when `X-Forwarded-For` is not trusted.
pub fn router(gateway: Arc<Gateway>) -> Router {
	Router::new()
		.route("/signup", post(signup))
		.route("/otp/resend", post(resend))
		.route("/verify-otp", post(verify_otp))
		.route("/logout", post(logout))
		.fallback(mediate)
		.layer(middleware::from_fn_with_state(gateway.clone(), rate_limit))
		.with_state(gateway)
}

impl Gateway {
	/// Revokes the session's refresh handle and deletes the session.
	///
	/// Returns the subject that was logged out, if the session was live.
	pub async fn logout(&self, id: &SessionId, client: &ClientId) -> Result<Option<UserId>> {
		let span =
			FlowSpan::new(FlowKind::Logout, "logout").for_client(client).for_session(id).begin();

		let result = span
			.instrument(async move {
				let Some(record) = self.sessions.get_all(id).await? else {
					return Ok(None);
				};

				if &record.client_id != client {
					self.sessions.discard(id).await;

					return Err(Error::unauthenticated(AuthFailure::ClientMismatch));
				}

				let subject = match &record.access_token {
					Some(token) => match self.issuer.validate(token.expose()) {
						crate::issuer::TokenStatus::Valid(claims) => Some(claims.user_id),
						_ => None,
					},
					None => None,
				};

				if let Some(refresh) = &record.refresh_token {
					self.issuer.revoke(refresh).await?;
				}

				self.sessions.delete(id).await?;

				Ok(subject)
			})
			.await;

		span.finish(result)
	}

	fn fail(
		&self,
		group: AuditGroup,
		action: AuditAction,
		request: RequestContext,
		session: Option<&SessionId>,
		error: Error,
	) -> Response {
		let mut event = AuditEvent::failure(group, action, request, &error);

		if let Some(id) = session {
			event = event.with_session(id);
		}

		self.emit(event);

		let clear = session.is_some() && session_gone(&error);
		let response = error.into_response();

		if clear { self.clear_cookie(response) } else { response }
	}

	fn set_cookie(&self, mut response: Response, id: &SessionId, ttl: Duration) -> Response {
		if let Ok(cookie) = session_cookie(&self.config.cookie, id, ttl) {
			response.headers_mut().append(header::SET_COOKIE, cookie);
		}

		response
	}

	fn clear_cookie(&self, mut response: Response) -> Response {
		if let Ok(cookie) = clear_session_cookie(&self.config.cookie) {
			response.headers_mut().append(header::SET_COOKIE, cookie);
		}

		response
	}
}

async fn rate_limit(
	State(gateway): State<Arc<Gateway>>,
	mut request: Request,
	next: Next,
) -> Response {
	let context = match ClientContext::resolve(
		request.method().as_str(),
		request.uri().path(),
		request.headers(),
		request.extensions().get::<ConnectInfo<SocketAddr>>(),
		gateway.config.trust_forwarded_for,
	) {
		Ok(context) => context,
		Err(e) => return Error::from(e).into_response(),
	};
	let decision = match gateway.limiter.check(&context.client_id).await {
		Ok(decision) => decision,
		Err(e) => {
			gateway.emit(AuditEvent::failure(
				AuditGroup::Api,
				AuditAction::RateLimit,
				context.request.clone(),
				&e,
			));

			return e.into_response();
		},
	};

	if !decision.allowed {
		let error = Error::QuotaExceeded { quota: Quota::RateLimit };

		gateway.emit(
			AuditEvent::failure(AuditGroup::Api, AuditAction::RateLimit, context.request, &error)
				.with_rate_limit(&decision),
		);

		let mut response = error.into_response();
		let retry_after = decision.retry_after(OffsetDateTime::now_utc()).whole_seconds().max(1);

		response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
		apply_rate_limit_headers(response.headers_mut(), &decision);

		return response;
	}

	gateway.emit(
		AuditEvent::new(AuditGroup::Api, AuditAction::RateLimit, context.request.clone(), 200)
			.with_rate_limit(&decision),
	);
	request.extensions_mut().insert(context);

	let mut response = next.run(request).await;

	apply_rate_limit_headers(response.headers_mut(), &decision);

	response
}

async fn signup(
	State(gateway): State<Arc<Gateway>>,
	Extension(context): Extension<ClientContext>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let existing = session_handle(&headers, &gateway.config.cookie);

	match signup_flow(&gateway, &context, existing.as_ref(), &body).await {
		Ok(issued) => {
			let action = if issued.created { AuditAction::Signup } else { AuditAction::OtpResent };

			gateway.emit(
				AuditEvent::new(AuditGroup::Auth, action, context.request, 200)
					.with_session(&issued.session_id),
			);

			otp_sent(&gateway, &issued)
		},
		Err(e) => gateway.fail(
			AuditGroup::Auth,
			AuditAction::Signup,
			context.request,
			existing.as_ref(),
			e,
		),
	}
}

async fn resend(
	State(gateway): State<Arc<Gateway>>,
	Extension(context): Extension<ClientContext>,
	headers: HeaderMap,
) -> Response {
	let handle = session_handle(&headers, &gateway.config.cookie);
	let result = match &handle {
		Some(id) => gateway.otp.resend(id, &context.client_id).await,
		None => Err(Error::unauthenticated(AuthFailure::MissingSession)),
	};

	match result {
		Ok(issued) => {
			gateway.emit(
				AuditEvent::new(AuditGroup::Auth, AuditAction::OtpResent, context.request, 200)
					.with_session(&issued.session_id),
			);

			otp_sent(&gateway, &issued)
		},
		Err(e) => gateway.fail(
			AuditGroup::Auth,
			AuditAction::OtpResent,
			context.request,
			handle.as_ref(),
			e,
		),
	}
}

async fn verify_otp(
	State(gateway): State<Arc<Gateway>>,
	Extension(context): Extension<ClientContext>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let handle = session_handle(&headers, &gateway.config.cookie);
	let (session_id, bundle) =
		match verify_flow(&gateway, &context, handle.as_ref(), &body).await {
			Ok(verified) => verified,
			Err(e) => {
				return gateway.fail(
					AuditGroup::Auth,
					AuditAction::OtpVerified,
					context.request,
					handle.as_ref(),
					e,
				);
			},
		};
	let mut verified =
		AuditEvent::new(AuditGroup::Auth, AuditAction::OtpVerified, context.request.clone(), 200)
			.with_subject(&bundle.subject.user_id);

	if let Some(id) = &handle {
		verified = verified.with_session(id);
	}

	gateway.emit(verified);
	gateway.emit(
		AuditEvent::new(AuditGroup::Session, AuditAction::TokenIssued, context.request, 200)
			.with_subject(&bundle.subject.user_id)
			.with_session(&session_id),
	);

	let body = VerifyResponse {
		status: "verified".into(),
		access_token: bundle.access.token.expose().to_owned(),
		refresh_token: bundle.refresh.expose().to_owned(),
		refresh_token_duration_days: bundle.refresh_ttl.whole_days(),
	};
	let response = (StatusCode::OK, Json(body)).into_response();

	gateway.set_cookie(response, &session_id, bundle.refresh_ttl)
}

async fn logout(
	State(gateway): State<Arc<Gateway>>,
	Extension(context): Extension<ClientContext>,
	headers: HeaderMap,
) -> Response {
	let handle = session_handle(&headers, &gateway.config.cookie);
	let Some(id) = handle else {
		return gateway.fail(
			AuditGroup::Session,
			AuditAction::Logout,
			context.request,
			None,
			Error::unauthenticated(AuthFailure::MissingSession),
		);
	};

	match gateway.logout(&id, &context.client_id).await {
		Ok(subject) => {
			let mut event =
				AuditEvent::new(AuditGroup::Session, AuditAction::Logout, context.request, 200)
					.with_session(&id);

			if let Some(subject) = &subject {
				event = event.with_subject(subject);
			}

			gateway.emit(event);

			let body = StatusResponse { status: "logged_out".into() };

			gateway.clear_cookie((StatusCode::OK, Json(body)).into_response())
		},
		Err(e) => {
			gateway.fail(AuditGroup::Session, AuditAction::Logout, context.request, Some(&id), e)
		},
	}
}

async fn mediate(
	State(gateway): State<Arc<Gateway>>,
	Extension(context): Extension<ClientContext>,
	request: Request,
) -> Response {
	let handle = session_handle(request.headers(), &gateway.config.cookie);
	let (parts, body) = request.into_parts();
	let authorized = match gateway.authorize(handle, &context.client_id, &parts.method).await {
		Ok(authorized) => authorized,
		Err(rejected) => {
			let mut event = AuditEvent::failure(
				AuditGroup::Api,
				AuditAction::ResourceAccess,
				context.request,
				&rejected.error,
			);

			if let Some(id) = &rejected.session_id {
				event = event.with_session(id);
			}
			if let Some(subject) = &rejected.subject_id {
				event = event.with_subject(subject);
			}

			gateway.emit(event);

			let response = rejected.error.into_response();

			return if rejected.session_destroyed {
				gateway.clear_cookie(response)
			} else {
				response
			};
		},
	};
	let user_id = authorized.claims.user_id.clone();

	if authorized.refreshed {
		let event = AuditEvent::new(
			AuditGroup::Session,
			AuditAction::TokenRefreshed,
			context.request.clone(),
			StatusCode::OK.as_u16(),
		)
		.with_subject(&user_id)
		.with_session(&authorized.session_id)
		.with_message("access token refreshed");

		gateway.emit(event);
	}

	match gateway.forward(&authorized, parts, body).await {
		Ok(response) => {
			let event = AuditEvent::new(
				AuditGroup::Api,
				AuditAction::ResourceAccess,
				context.request,
				response.status().as_u16(),
			)
			.with_subject(&user_id)
			.with_session(&authorized.session_id);

			gateway.emit(event);

			response
		},
		Err(e) => {
			let event = AuditEvent::failure(
				AuditGroup::Api,
				AuditAction::ResourceAccess,
				context.request,
				&e,
			)
			.with_subject(&user_id)
			.with_session(&authorized.session_id);

			gateway.emit(event);

			e.into_response()
		},
	}
}

async fn signup_flow(
	gateway: &Gateway,
	context: &ClientContext,
	existing: Option<&SessionId>,
	body: &Bytes,
) -> Result<OtpIssued> {
	let request = parse_json::<SignupRequest>(body)?;
	let email = Email::parse(&request.email)?;

	gateway.otp.generate(existing, &email, &context.client_id).await
}

async fn verify_flow(
	gateway: &Gateway,
	context: &ClientContext,
	handle: Option<&SessionId>,
	body: &Bytes,
) -> Result<(SessionId, CredentialBundle)> {
	let request = parse_json::<VerifyRequest>(body)?;
	let Some(id) = handle else {
		return Err(Error::unauthenticated(AuthFailure::MissingSession));
	};
	let email = request.email.as_deref().map(Email::parse).transpose()?;
	// The pre-auth session is consumed only after credentials exist, so a failed exchange
	// leaves the code usable.
	let verified = gateway.otp.check(id, &request.otp, email.as_ref(), &context.client_id).await?;
	let bundle = gateway.issuer.exchange(&verified.email).await?;

	if let Err(e) = gateway.otp.consume(id).await {
		revoke_orphan(gateway, &bundle.refresh).await;

		return Err(e);
	}

	let session_id = SessionId::generate();
	let record = SessionRecord::authenticated(
		verified.client_id,
		verified.email,
		OffsetDateTime::now_utc(),
		bundle.access.token.clone(),
		bundle.refresh.clone(),
	);

	if let Err(e) = gateway.sessions.put(&session_id, &record, bundle.refresh_ttl).await {
		revoke_orphan(gateway, &bundle.refresh).await;

		return Err(e);
	}

	Ok((session_id, bundle))
}

async fn revoke_orphan(gateway: &Gateway, refresh: &TokenSecret) {
	if let Err(e) = gateway.issuer.revoke(refresh).await {
		#[cfg(feature = "tracing")]
		tracing::warn!(error = %e, "Failed to revoke an orphaned refresh handle.");
		#[cfg(not(feature = "tracing"))]
		let _ = e;
	}
}

fn otp_sent(gateway: &Gateway, issued: &OtpIssued) -> Response {
	let body = StatusResponse { status: "otp_sent".into() };
	let response = (StatusCode::OK, Json(body)).into_response();

	gateway.set_cookie(response, &issued.session_id, gateway.otp.policy().pending_session_ttl)
}

fn parse_json<T>(body: &Bytes) -> Result<T>
where
	T: DeserializeOwned,
{
	let de = &mut serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(de).map_err(|e| {
		#[cfg(feature = "tracing")]
		tracing::debug!(path = %e.path(), "Rejected malformed request body.");
		#[cfg(not(feature = "tracing"))]
		let _ = e;

		Error::Validation { reason: "invalid_body" }
	})
}

/// Whether the failure destroyed (or found no) session, so the client should drop its cookie.
fn session_gone(error: &Error) -> bool {
	matches!(
		error,
		Error::Unauthenticated {
			reason: AuthFailure::SessionExpired
				| AuthFailure::ClientMismatch
				| AuthFailure::MissingAccessToken
				| AuthFailure::InvalidAccessToken
				| AuthFailure::RefreshFailed
		} | Error::QuotaExceeded { quota: Quota::Attempts | Quota::Resends }
	)
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
	headers.insert(
		HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
		HeaderValue::from(decision.limit),
	);
	headers.insert(
		HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
		HeaderValue::from(decision.remaining),
	);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_destroying_failures_clear_the_cookie() {
		assert!(session_gone(&Error::unauthenticated(AuthFailure::ClientMismatch)));
		assert!(session_gone(&Error::QuotaExceeded { quota: Quota::Attempts }));
		assert!(!session_gone(&Error::unauthenticated(AuthFailure::InvalidOtp)));
		assert!(!session_gone(&Error::unauthenticated(AuthFailure::EmailMismatch)));
		assert!(!session_gone(&Error::QuotaExceeded { quota: Quota::RateLimit }));
	}

	#[test]
	fn malformed_bodies_are_validation_errors() {
		let error = parse_json::<SignupRequest>(&Bytes::from_static(b"{\"mail\":1}"))
			.expect_err("Missing fields must be rejected.");

		assert_eq!(error.reason(), "invalid_body");
		assert_eq!(error.kind().status(), 400);
	}
}

//! Gateway mediator: session-backed authorization in front of the resource collaborator.
//!
//! Every protected request resolves its session, validates the stored access token, refreshes
//! it at most once when it has merely expired, checks the method-derived scope, and only then
//! relays the request. Any authentication failure destroys the session first.

// crates.io
use axum::{
	body::{Body, to_bytes},
	http::{Method, request::Parts},
	response::Response,
};
// self
use crate::{
	_prelude::*,
	auth::{AccessClaims, ClientId, SCOPE_READ, SCOPE_WRITE, SessionId, TokenSecret, UserId},
	error::AuthFailure,
	gateway::{ForwardRequest, Gateway},
	issuer::TokenStatus,
	obs::{FlowKind, FlowOutcome, FlowSpan},
	session::SessionField,
};

/// Upper bound on a buffered request body relayed downstream.
pub const MAX_FORWARD_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Result of a successful authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorized {
	/// Session the request was authorized through.
	pub session_id: SessionId,
	/// Claims of the (possibly refreshed) access token.
	pub claims: AccessClaims,
	/// Whether the access token was refreshed on this request.
	pub refreshed: bool,
}

/// Authorization failure, remembering whether the session was destroyed on the way.
#[derive(Debug)]
pub struct Rejected {
	/// Underlying failure.
	pub error: Error,
	/// Session handle presented by the client, if any.
	pub session_id: Option<SessionId>,
	/// Subject, when the token was valid but lacked the required scope.
	pub subject_id: Option<UserId>,
	/// Whether the session is gone and the client should drop its cookie.
	pub session_destroyed: bool,
}

/// Scope a method requires: safe methods read, everything else writes.
pub fn required_scope(method: &Method) -> &'static str {
	match *method {
		Method::GET | Method::HEAD | Method::OPTIONS => SCOPE_READ,
		_ => SCOPE_WRITE,
	}
}

impl Gateway {
	/// Authorizes a protected request presented with `handle` from `client`.
	pub async fn authorize(
		&self,
		handle: Option<SessionId>,
		client: &ClientId,
		method: &Method,
	) -> Result<Authorized, Rejected> {
		let span = FlowSpan::new(FlowKind::Mediate, "authorize").for_client(client);
		let span = match &handle {
			Some(id) => span.for_session(id),
			None => span,
		}
		.begin();
		let result = span.instrument(self.authorize_inner(handle, client, method)).await;

		let outcome = if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure };

		span.record_outcome(outcome);

		result
	}

	/// Relays an authorized request and returns the downstream response unmodified.
	pub async fn forward(
		&self,
		authorized: &Authorized,
		parts: Parts,
		body: Body,
	) -> Result<Response> {
		let body = to_bytes(body, MAX_FORWARD_BODY_BYTES)
			.await
			.map_err(|_| Error::Validation { reason: "request_body_too_large" })?;
		let path_and_query = parts
			.uri
			.path_and_query()
			.map_or_else(|| parts.uri.path().to_owned(), |p| p.to_string());
		let request = ForwardRequest::new(
			parts.method,
			path_and_query,
			parts.headers,
			body,
			&authorized.claims.subject(),
		);

		Ok(self.forwarder.forward(request).await?)
	}

	async fn authorize_inner(
		&self,
		handle: Option<SessionId>,
		client: &ClientId,
		method: &Method,
	) -> Result<Authorized, Rejected> {
		let Some(id) = handle else {
			return Err(Rejected {
				error: Error::unauthenticated(AuthFailure::MissingSession),
				session_id: None,
				subject_id: None,
				session_destroyed: false,
			});
		};
		let record = match self.sessions.get_all(&id).await {
			Ok(Some(record)) => record,
			Ok(None) => return Err(self.reject(id, AuthFailure::SessionExpired).await),
			Err(error) => {
				return Err(Rejected {
					error,
					session_id: Some(id),
					subject_id: None,
					session_destroyed: false,
				});
			},
		};

		if &record.client_id != client {
			return Err(self.reject(id, AuthFailure::ClientMismatch).await);
		}

		let Some(access_token) = record.access_token else {
			return Err(self.reject(id, AuthFailure::MissingAccessToken).await);
		};
		let (claims, refreshed) = match self.issuer.validate(access_token.expose()) {
			TokenStatus::Valid(claims) => (claims, false),
			TokenStatus::Invalid => {
				return Err(self.reject(id, AuthFailure::InvalidAccessToken).await);
			},
			TokenStatus::Expired => {
				let Some(refresh_token) = record.refresh_token else {
					return Err(self.reject(id, AuthFailure::RefreshFailed).await);
				};

				match self.refresh_once(&id, &refresh_token).await {
					Some(claims) => (claims, true),
					None => return Err(self.reject(id, AuthFailure::RefreshFailed).await),
				}
			},
		};
		let required = required_scope(method);

		if !claims.scopes.contains(required) {
			return Err(Rejected {
				error: Error::InsufficientScope { required: required.into() },
				session_id: Some(id),
				subject_id: Some(claims.user_id),
				session_destroyed: false,
			});
		}

		Ok(Authorized { session_id: id, claims, refreshed })
	}

	/// One rotation attempt; `None` on any failure.
	async fn refresh_once(
		&self,
		id: &SessionId,
		refresh_token: &TokenSecret,
	) -> Option<AccessClaims> {
		let issued = match self.issuer.rotate(refresh_token).await {
			Ok(issued) => issued,
			Err(e) => {
				#[cfg(feature = "tracing")]
				tracing::debug!(
					session = %id.fingerprint(),
					reason = e.reason(),
					"Access token refresh failed."
				);
				#[cfg(not(feature = "tracing"))]
				let _ = e;

				return None;
			},
		};
		let stored = self
			.sessions
			.set_field(
				id,
				SessionField::AccessToken,
				issued.token.expose().to_owned(),
				self.issuer.policy().refresh_token_ttl(),
			)
			.await;

		if !matches!(stored, Ok(true)) {
			return None;
		}

		match self.issuer.validate(issued.token.expose()) {
			TokenStatus::Valid(claims) => Some(claims),
			TokenStatus::Expired | TokenStatus::Invalid => None,
		}
	}

	async fn reject(&self, id: SessionId, reason: AuthFailure) -> Rejected {
		self.sessions.discard(&id).await;

		Rejected {
			error: Error::unauthenticated(reason),
			session_id: Some(id),
			subject_id: None,
			session_destroyed: true,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn safe_methods_read_and_everything_else_writes() {
		assert_eq!(required_scope(&Method::GET), SCOPE_READ);
		assert_eq!(required_scope(&Method::HEAD), SCOPE_READ);
		assert_eq!(required_scope(&Method::OPTIONS), SCOPE_READ);

		for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
			assert_eq!(required_scope(&method), SCOPE_WRITE);
		}
	}
}

//! JSON error rendering.

// crates.io
use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
// self
use crate::_prelude::*;

/// Wire shape of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Stable machine-readable reason.
	pub error: String,
	/// Client-safe description.
	pub message: String,
}
impl From<&Error> for ErrorBody {
	fn from(e: &Error) -> Self {
		Self { error: e.reason().into(), message: e.public_message() }
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = StatusCode::from_u16(self.kind().status())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		(status, Json(ErrorBody::from(&self))).into_response()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::{AuthFailure, Quota};

	#[test]
	fn statuses_follow_the_taxonomy() {
		let cases = [
			(Error::Validation { reason: "invalid_email" }, 400),
			(Error::unauthenticated(AuthFailure::InvalidOtp), 401),
			(Error::InsufficientScope { required: "write".into() }, 403),
			(Error::AlreadyVerified, 409),
			(Error::QuotaExceeded { quota: Quota::RateLimit }, 429),
		];

		for (error, status) in cases {
			assert_eq!(error.into_response().status().as_u16(), status);
		}
	}

	#[test]
	fn internal_details_are_not_rendered() {
		let error = Error::crypto("access token signing failed", "key material rejected");
		let body = ErrorBody::from(&error);

		assert_eq!(body.error, "credential_failure");
		assert!(!body.message.contains("key material"));
	}
}

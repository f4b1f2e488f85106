//! Optional observability helpers for gateway flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `otp_gateway.flow` with the `flow` (operation)
//!   and `stage` (call site) fields.
//! - Enable `metrics` to increment the `otp_gateway_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Gateway operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Signup: session creation plus first OTP delivery.
	Signup,
	/// OTP regeneration on an existing session.
	Resend,
	/// OTP verification.
	Verify,
	/// Access/refresh credential issuance.
	Issue,
	/// Access token refresh through a stored handle.
	Refresh,
	/// Protected request mediation.
	Mediate,
	/// Fixed-window admission check.
	RateLimit,
	/// Session teardown.
	Logout,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Signup => "signup",
			FlowKind::Resend => "resend",
			FlowKind::Verify => "verify",
			FlowKind::Issue => "issue",
			FlowKind::Refresh => "refresh",
			FlowKind::Mediate => "mediate",
			FlowKind::RateLimit => "rate_limit",
			FlowKind::Logout => "logout",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a gateway operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the terminal outcome of `result` for `kind` and hands the result back.
pub fn observe<T>(kind: FlowKind, result: Result<T>) -> Result<T> {
	match &result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(e) => {
			record_flow_outcome(kind, FlowOutcome::Failure);

			#[cfg(feature = "tracing")]
			::tracing::debug!(flow = kind.as_str(), reason = e.reason(), "Gateway flow failed.");
			#[cfg(not(feature = "tracing"))]
			let _ = e;
		},
	}

	result
}

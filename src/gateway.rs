//! Gateway facade: wires the components together and exposes them over HTTP.
//!
//! The [`Gateway`] owns one instance of every component plus the collaborators they talk to.
//! Individual surfaces (signup and verification routes, the rate-limit middleware, the
//! protected-request mediator) live in their own modules as `impl Gateway` blocks, so each can
//! focus on its own branch logic and audit events.

pub mod client;
pub mod forward;
pub mod mediator;
pub mod response;
pub mod routes;

pub use client::*;
pub use forward::*;
pub use mediator::*;
pub use routes::*;

// self
use crate::{
	_prelude::*,
	audit::{AuditEmitter, AuditEvent},
	config::GatewayConfig,
	delivery::OtpDelivery,
	directory::UserDirectory,
	issuer::CredentialIssuer,
	otp::OtpMachine,
	rate_limit::FixedWindowLimiter,
	session::SessionStore,
	store::KvStore,
};

/// Fully wired gateway.
pub struct Gateway {
	/// Validated configuration.
	pub config: GatewayConfig,
	/// Typed session store over the shared backend.
	pub sessions: SessionStore,
	/// OTP state machine.
	pub otp: OtpMachine,
	/// Fixed-window admission control.
	pub limiter: FixedWindowLimiter,
	/// Access/refresh credential issuer.
	pub issuer: CredentialIssuer,
	/// Downstream resource collaborator.
	pub forwarder: Arc<dyn ResourceForwarder>,
	/// Fire-and-forget audit stream.
	pub audit: AuditEmitter,
}
impl Gateway {
	/// Validates `config` and wires every component against the shared `store`.
	///
	/// Sessions, refresh handles, and rate-limit counters all live in `store`, under separate
	/// key namespaces.
	pub fn new(
		config: GatewayConfig,
		store: Arc<dyn KvStore>,
		delivery: Arc<dyn OtpDelivery>,
		directory: Arc<dyn UserDirectory>,
		forwarder: Arc<dyn ResourceForwarder>,
		audit: AuditEmitter,
	) -> Result<Self> {
		config.validate()?;

		let sessions = SessionStore::new(store.clone());
		let otp = OtpMachine::new(sessions.clone(), delivery, config.otp.clone())?;
		let limiter = FixedWindowLimiter::new(store.clone(), config.rate_limit.clone());
		let issuer = CredentialIssuer::new(
			&config.signing_secret,
			store,
			directory,
			config.credentials.clone(),
		);

		Ok(Self { config, sessions, otp, limiter, issuer, forwarder, audit })
	}

	pub(crate) fn emit(&self, event: AuditEvent) {
		self.audit.emit(event);
	}
}
impl Debug for Gateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("otp", &self.otp.policy())
			.field("limiter", &self.limiter)
			.field("issuer", &self.issuer)
			.finish_non_exhaustive()
	}
}

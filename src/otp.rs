//! OTP state machine: `NEW → OTP_ISSUED → (RESENT → OTP_ISSUED)* → VERIFIED`, with
//! `BLOCKED` reached once the resend or attempt quota is exhausted.
//!
//! Every accepted `generate` draws a fresh code, overwrites the stored hash, and restarts the
//! code's freshness window. Quotas are checked with `>=` before the mutating action, so a
//! client observes at most `max_resends` regenerations and `max_attempts` wrong-code outcomes
//! per logical signup. Attempts are not reset by a resend.

pub mod code;

pub use code::*;
pub use crate::config::OtpPolicy;

// self
use crate::{
	_prelude::*,
	auth::{ClientId, Email, SessionId},
	delivery::OtpDelivery,
	error::{AuthFailure, Quota},
	obs::{FlowKind, FlowSpan},
	session::{SessionField, SessionRecord, SessionStore},
};

/// Outcome of an accepted `generate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpIssued {
	/// Session now holding the active code.
	pub session_id: SessionId,
	/// Regenerations performed so far (0 for a new session).
	pub resends: u32,
	/// Whether a new session was created.
	pub created: bool,
}

/// Subject released by a successful verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedOtp {
	/// Verified email.
	pub email: Email,
	/// Client that completed verification.
	pub client_id: ClientId,
}

/// OTP state machine over the shared session store.
#[derive(Clone)]
pub struct OtpMachine {
	sessions: SessionStore,
	delivery: Arc<dyn OtpDelivery>,
	hasher: OtpHasher,
	policy: OtpPolicy,
}
impl OtpMachine {
	/// Wires the machine to its store, delivery collaborator, and policy.
	pub fn new(
		sessions: SessionStore,
		delivery: Arc<dyn OtpDelivery>,
		policy: OtpPolicy,
	) -> Result<Self, crate::error::ConfigError> {
		let hasher = OtpHasher::new(policy.hash_memory_kib, policy.hash_iterations)?;

		Ok(Self { sessions, delivery, hasher, policy })
	}

	/// Active policy.
	pub fn policy(&self) -> &OtpPolicy {
		&self.policy
	}

	/// Signup entry point.
	///
	/// Without a live session for `existing`, a new one is created. A live session for the same
	/// email counts as a resend. A live session for another email is discarded and replaced.
	pub async fn generate(
		&self,
		existing: Option<&SessionId>,
		email: &Email,
		client: &ClientId,
	) -> Result<OtpIssued> {
		let span = FlowSpan::new(FlowKind::Signup, "generate").for_client(client).begin();

		let result = span
			.instrument(async move {
				let now = OffsetDateTime::now_utc();
				let live = match existing {
					Some(id) => self.sessions.get_all(id).await?.map(|record| (id, record)),
					None => None,
				};

				if let Some((id, record)) = live {
					self.guard_reuse(id, &record, client).await?;

					if &record.email == email {
						return self.regenerate(id.clone(), &record.email, now).await;
					}

					self.sessions.discard(id).await;
				}

				let record = SessionRecord::pending(client.clone(), email.clone(), now);

				self.create(SessionId::generate(), record, now).await
			})
			.await;

		span.finish(result)
	}

	/// Regenerates the code of an existing session (resend endpoint).
	pub async fn resend(&self, id: &SessionId, client: &ClientId) -> Result<OtpIssued> {
		let span =
			FlowSpan::new(FlowKind::Resend, "resend").for_client(client).for_session(id).begin();

		let result = span
			.instrument(async move {
				let Some(record) = self.sessions.get_all(id).await? else {
					return Err(Error::unauthenticated(AuthFailure::SessionExpired));
				};

				self.guard_reuse(id, &record, client).await?;
				self.regenerate(id.clone(), &record.email, OffsetDateTime::now_utc()).await
			})
			.await;

		span.finish(result)
	}

	/// Verifies `supplied` against the session's active code and consumes the session.
	pub async fn verify(
		&self,
		id: &SessionId,
		supplied: &str,
		email: Option<&Email>,
		client: &ClientId,
	) -> Result<VerifiedOtp> {
		self.verify_at(id, supplied, email, client, OffsetDateTime::now_utc()).await
	}

	/// Verifies `supplied` as if the request arrived at `now`.
	pub async fn verify_at(
		&self,
		id: &SessionId,
		supplied: &str,
		email: Option<&Email>,
		client: &ClientId,
		now: OffsetDateTime,
	) -> Result<VerifiedOtp> {
		let span =
			FlowSpan::new(FlowKind::Verify, "verify").for_client(client).for_session(id).begin();

		let result = span
			.instrument(async move {
				let verified = self.check_inner(id, supplied, email, client, now).await?;

				self.consume(id).await?;

				Ok(verified)
			})
			.await;

		span.finish(result)
	}

	/// Checks `supplied` without consuming the session.
	///
	/// Wrong guesses are counted exactly as in [`verify`](Self::verify). A successful check must
	/// be followed by [`consume`](Self::consume) once whatever depends on it has succeeded; until
	/// then the session and its code stay usable.
	pub async fn check(
		&self,
		id: &SessionId,
		supplied: &str,
		email: Option<&Email>,
		client: &ClientId,
	) -> Result<VerifiedOtp> {
		let span =
			FlowSpan::new(FlowKind::Verify, "check").for_client(client).for_session(id).begin();

		let result = span
			.instrument(self.check_inner(id, supplied, email, client, OffsetDateTime::now_utc()))
			.await;

		span.finish(result)
	}

	/// Deletes a checked session.
	///
	/// Exactly one caller wins the delete; the others get `SessionExpired`, which makes a code
	/// single-use even when two verifications race.
	pub async fn consume(&self, id: &SessionId) -> Result<()> {
		if !self.sessions.delete(id).await? {
			return Err(Error::unauthenticated(AuthFailure::SessionExpired));
		}

		Ok(())
	}

	async fn check_inner(
		&self,
		id: &SessionId,
		supplied: &str,
		email: Option<&Email>,
		client: &ClientId,
		now: OffsetDateTime,
	) -> Result<VerifiedOtp> {
		let Some(record) = self.sessions.get_all(id).await? else {
			return Err(Error::unauthenticated(AuthFailure::SessionExpired));
		};

		self.guard_reuse(id, &record, client).await?;

		if email.is_some_and(|email| email != &record.email) {
			return Err(Error::unauthenticated(AuthFailure::EmailMismatch));
		}
		if record.attempts >= self.policy.max_attempts {
			self.sessions.discard(id).await;

			return Err(Error::QuotaExceeded { quota: Quota::Attempts });
		}

		let Some(digest) = record.otp_hash.as_deref() else {
			return Err(Error::unauthenticated(AuthFailure::InvalidOtp));
		};

		if now > record.created_at + self.policy.otp_ttl {
			return Err(Error::unauthenticated(AuthFailure::OtpExpired));
		}
		if !self.hasher.verify(supplied, digest).await? {
			return match self.sessions.increment(id, SessionField::Attempts).await? {
				None => Err(Error::unauthenticated(AuthFailure::SessionExpired)),
				Some(attempts) if attempts >= self.policy.max_attempts => {
					self.sessions.discard(id).await;

					Err(Error::QuotaExceeded { quota: Quota::Attempts })
				},
				Some(_) => Err(Error::unauthenticated(AuthFailure::InvalidOtp)),
			};
		}

		Ok(VerifiedOtp { email: record.email, client_id: record.client_id })
	}

	async fn guard_reuse(
		&self,
		id: &SessionId,
		record: &SessionRecord,
		client: &ClientId,
	) -> Result<()> {
		if &record.client_id != client {
			self.sessions.discard(id).await;

			return Err(Error::unauthenticated(AuthFailure::ClientMismatch));
		}
		if record.verified {
			return Err(Error::AlreadyVerified);
		}

		Ok(())
	}

	// Only the code fields are rewritten; counters move through atomic increments alone.
	async fn regenerate(
		&self,
		id: SessionId,
		email: &Email,
		now: OffsetDateTime,
	) -> Result<OtpIssued> {
		let Some(resends) = self.sessions.increment(&id, SessionField::Resends).await? else {
			return Err(Error::unauthenticated(AuthFailure::SessionExpired));
		};

		if resends >= self.policy.max_resends {
			self.sessions.discard(&id).await;

			return Err(Error::QuotaExceeded { quota: Quota::Resends });
		}

		let code = OtpCode::generate(self.policy.code_length);
		let otp_hash = self.hasher.hash(&code).await?;
		let updates = [
			(SessionField::OtpHash, otp_hash),
			(SessionField::CreatedAt, now.unix_timestamp().to_string()),
		];

		if !self.sessions.set_fields(&id, updates, self.policy.pending_session_ttl).await? {
			return Err(Error::unauthenticated(AuthFailure::SessionExpired));
		}

		self.deliver(&id, email, &code).await?;

		Ok(OtpIssued { session_id: id, resends, created: false })
	}

	async fn create(
		&self,
		id: SessionId,
		mut record: SessionRecord,
		now: OffsetDateTime,
	) -> Result<OtpIssued> {
		let code = OtpCode::generate(self.policy.code_length);

		record.otp_hash = Some(self.hasher.hash(&code).await?);
		record.created_at = now;

		self.sessions.put(&id, &record, self.policy.pending_session_ttl).await?;
		self.deliver(&id, &record.email, &code).await?;

		Ok(OtpIssued { session_id: id, resends: 0, created: true })
	}

	async fn deliver(&self, id: &SessionId, email: &Email, code: &OtpCode) -> Result<()> {
		if let Err(e) = self.delivery.submit(email, code).await {
			self.sessions.discard(id).await;

			return Err(e.into());
		}

		Ok(())
	}
}
impl Debug for OtpMachine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OtpMachine").field("policy", &self.policy).finish_non_exhaustive()
	}
}

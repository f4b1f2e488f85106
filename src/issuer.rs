//! Credential issuer: stateless access tokens plus server-tracked refresh handles.
//!
//! The refresh store is separate from the session store, so an expired or stolen pre-auth
//! session can never be replayed to mint credentials, and refresh lifetimes stay independent
//! of OTP and session TTLs.

pub mod refresh;
pub mod signer;

pub use refresh::*;
pub use signer::*;
pub use crate::config::CredentialPolicy;

// self
use crate::{
	_prelude::*,
	auth::{AccessClaims, Email, Subject, TokenSecret},
	directory::UserDirectory,
	obs::{FlowKind, FlowSpan},
	store::KvStore,
};

/// Signed access token and its expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedAccessToken {
	/// Compact JWT.
	pub token: TokenSecret,
	/// Expiry instant embedded in the token.
	pub expires_at: OffsetDateTime,
}

/// Everything minted for a freshly verified subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialBundle {
	/// Subject snapshot the credentials were minted from.
	pub subject: Subject,
	/// Short-lived access token.
	pub access: IssuedAccessToken,
	/// Long-lived refresh handle.
	pub refresh: TokenSecret,
	/// Refresh handle lifetime.
	pub refresh_ttl: Duration,
}

/// Issues, rotates, and validates credentials.
#[derive(Clone)]
pub struct CredentialIssuer {
	signer: AccessTokenSigner,
	refresh: RefreshTokenStore,
	directory: Arc<dyn UserDirectory>,
	policy: CredentialPolicy,
}
impl CredentialIssuer {
	/// Wires the issuer to its signing secret, refresh store, and identity collaborator.
	pub fn new(
		signing_secret: &TokenSecret,
		store: Arc<dyn KvStore>,
		directory: Arc<dyn UserDirectory>,
		policy: CredentialPolicy,
	) -> Self {
		Self {
			signer: AccessTokenSigner::new(signing_secret),
			refresh: RefreshTokenStore::new(store),
			directory,
			policy,
		}
	}

	/// Active policy.
	pub fn policy(&self) -> &CredentialPolicy {
		&self.policy
	}

	/// Signs an access token for `subject`, valid from now.
	pub fn issue_access_token(&self, subject: &Subject) -> Result<IssuedAccessToken> {
		self.issue_access_token_at(subject, OffsetDateTime::now_utc())
	}

	/// Signs an access token for `subject` as if issued at `issued_at`.
	pub fn issue_access_token_at(
		&self,
		subject: &Subject,
		issued_at: OffsetDateTime,
	) -> Result<IssuedAccessToken> {
		let claims = AccessClaims::new(subject, issued_at, self.policy.access_token_ttl);
		let token = self.signer.sign(&claims)?;

		Ok(IssuedAccessToken { token, expires_at: claims.expires_at() })
	}

	/// Stores `subject` under a new refresh handle.
	pub async fn issue_refresh_token(&self, subject: &Subject) -> Result<TokenSecret> {
		self.refresh.issue(subject, self.policy.refresh_token_ttl()).await
	}

	/// Mints a new access token from the snapshot stored under `handle`.
	///
	/// The handle itself is not rotated; it stays valid until its own TTL lapses.
	pub async fn rotate(&self, handle: &TokenSecret) -> Result<IssuedAccessToken> {
		let span = FlowSpan::new(FlowKind::Refresh, "rotate").begin();

		let result = span
			.instrument(async move {
				let Some(subject) = self.refresh.lookup(handle).await? else {
					return Err(Error::InvalidGrant {
						reason: "refresh handle is unknown or expired".into(),
					});
				};

				self.issue_access_token(&subject)
			})
			.await;

		span.finish(result)
	}

	/// Resolves `email` through the identity collaborator and mints both credentials.
	pub async fn exchange(&self, email: &Email) -> Result<CredentialBundle> {
		let span = FlowSpan::new(FlowKind::Issue, "exchange").begin();

		let result = span
			.instrument(async move {
				let user = self.directory.find_or_create(email).await?;
				let subject = user.subject();
				let access = self.issue_access_token(&subject)?;
				let refresh = self.issue_refresh_token(&subject).await?;

				Ok(CredentialBundle {
					subject,
					access,
					refresh,
					refresh_ttl: self.policy.refresh_token_ttl(),
				})
			})
			.await;

		span.finish(result)
	}

	/// Revokes a refresh handle.
	pub async fn revoke(&self, handle: &TokenSecret) -> Result<bool> {
		self.refresh.revoke(handle).await
	}

	/// Validates a presented access token.
	pub fn validate(&self, token: &str) -> TokenStatus {
		self.signer.validate(token)
	}
}
impl Debug for CredentialIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialIssuer").field("policy", &self.policy).finish_non_exhaustive()
	}
}

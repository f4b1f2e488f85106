//! Fixed-window rate limiter backed by the shared counting store.
//!
//! Windows are aligned to multiples of the window length since the Unix epoch, so every
//! instance sharing the store agrees on bucket boundaries. The limiter fails closed: a store
//! failure yields [`Error::LimiterUnavailable`], never an admission.

pub use crate::config::RateLimitPolicy;

// self
use crate::{
	_prelude::*,
	auth::ClientId,
	obs::{self, FlowKind, FlowOutcome},
	store::{KvStore, StoreKey},
};

/// Admission decision for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// Requests counted in the current window, this one included.
	pub count: u64,
	/// Window budget.
	pub limit: u64,
	/// Requests left in the current window.
	pub remaining: u64,
	/// Window length.
	pub window: Duration,
	/// Instant the current window closes.
	pub reset_at: OffsetDateTime,
}
impl RateLimitDecision {
	/// Time until the window closes, as seen from `now`.
	pub fn retry_after(&self, now: OffsetDateTime) -> Duration {
		(self.reset_at - now).max(Duration::ZERO)
	}
}

/// Fixed-window limiter keyed by client identifier.
#[derive(Clone)]
pub struct FixedWindowLimiter {
	store: Arc<dyn KvStore>,
	policy: RateLimitPolicy,
}
impl FixedWindowLimiter {
	/// Creates a limiter over the shared counting store.
	pub fn new(store: Arc<dyn KvStore>, policy: RateLimitPolicy) -> Self {
		Self { store, policy }
	}

	/// Active policy.
	pub fn policy(&self) -> &RateLimitPolicy {
		&self.policy
	}

	/// Counts the request against the client's current window.
	pub async fn check(&self, client: &ClientId) -> Result<RateLimitDecision> {
		self.check_at(client, OffsetDateTime::now_utc()).await
	}

	/// Counts the request as if it arrived at `now`.
	pub async fn check_at(
		&self,
		client: &ClientId,
		now: OffsetDateTime,
	) -> Result<RateLimitDecision> {
		let window_secs = self.policy.window.whole_seconds().max(1);
		let bucket = now.unix_timestamp().div_euclid(window_secs);
		let reset_at = OffsetDateTime::from_unix_timestamp((bucket + 1) * window_secs)
			.unwrap_or(now + self.policy.window);
		let key = StoreKey::rate_limit(&self.policy.scope, client, bucket);
		let ttl = (reset_at - now).max(Duration::SECOND);
		let count = match self.store.increment_counter(&key, ttl).await {
			Ok(count) => count,
			Err(source) => {
				obs::record_flow_outcome(FlowKind::RateLimit, FlowOutcome::Failure);

				return Err(Error::LimiterUnavailable { source });
			},
		};
		let allowed = count <= self.policy.limit;

		obs::record_rate_limit_decision(allowed);

		Ok(RateLimitDecision {
			allowed,
			count,
			limit: self.policy.limit,
			remaining: self.policy.limit.saturating_sub(count),
			window: Duration::seconds(window_secs),
			reset_at,
		})
	}
}
impl Debug for FixedWindowLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FixedWindowLimiter").field("policy", &self.policy).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::{_preludet::*, store::MemoryStore};

	fn limiter(store: Arc<dyn KvStore>) -> FixedWindowLimiter {
		FixedWindowLimiter::new(store, RateLimitPolicy::default())
	}

	#[tokio::test]
	async fn fourth_request_in_a_window_is_denied() {
		let limiter = limiter(Arc::new(MemoryStore::default()));
		let ip = client("10.0.0.1");
		let now = datetime!(2025-01-01 00:00:10 UTC);

		for expected_remaining in [2, 1, 0] {
			let decision = limiter.check_at(&ip, now).await.expect("Limiter should answer.");

			assert!(decision.allowed);
			assert_eq!(decision.remaining, expected_remaining);
		}

		let denied = limiter.check_at(&ip, now).await.expect("Limiter should answer.");

		assert!(!denied.allowed);
		assert_eq!((denied.count, denied.limit, denied.remaining), (4, 3, 0));
		assert_eq!(denied.reset_at, datetime!(2025-01-01 00:01:00 UTC));
		assert_eq!(denied.retry_after(now), Duration::seconds(50));
	}

	#[tokio::test]
	async fn windows_are_fixed_and_per_client() {
		let limiter = limiter(Arc::new(MemoryStore::default()));
		let (a, b) = (client("10.0.0.1"), client("10.0.0.2"));
		let late = datetime!(2025-01-01 00:00:59 UTC);

		for _ in 0..3 {
			limiter.check_at(&a, late).await.expect("Limiter should answer.");
		}

		assert!(!limiter.check_at(&a, late).await.expect("Limiter should answer.").allowed);
		assert!(limiter.check_at(&b, late).await.expect("Limiter should answer.").allowed);

		let next_window = datetime!(2025-01-01 00:01:00 UTC);

		assert!(limiter.check_at(&a, next_window).await.expect("Limiter should answer.").allowed);
	}

	#[tokio::test]
	async fn past_windows_do_not_accumulate_in_memory() {
		let store = Arc::new(MemoryStore::default());
		let limiter = limiter(store.clone());
		let ip = client("10.0.0.1");
		let start = datetime!(2025-01-01 00:00:00 UTC);

		for minute in 0..1_000_i64 {
			limiter
				.check_at(&ip, start + Duration::minutes(minute))
				.await
				.expect("Limiter should answer.");
		}

		store.advance(Duration::days(1));

		let later = start + Duration::days(1);

		for _ in 0..256 {
			limiter.check_at(&ip, later).await.expect("Limiter should answer.");
		}

		assert_eq!(store.live_keys(), 1);
		assert_eq!(store.stored_keys(), 1, "Expired windows must be swept, not just hidden.");
	}

	#[tokio::test]
	async fn unreachable_store_fails_closed() {
		let err = limiter(Arc::new(UnavailableStore))
			.check(&client("10.0.0.1"))
			.await
			.expect_err("A down store must not admit requests.");

		assert_eq!(err.reason(), "rate_limiter_unavailable");
		assert_eq!(err.kind().status(), 500);
	}
}

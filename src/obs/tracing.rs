// self
use crate::{
	_prelude::*,
	auth::{ClientId, SessionId},
	obs::{self, FlowKind, FlowOutcome},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Span around one gateway operation.
///
/// The span is named `otp_gateway.flow` and carries `flow` and `stage` from construction. The
/// `client`, `session` (fingerprint only) and `outcome` fields are filled in as the operation
/// learns them. Counters are bumped through [`begin`](Self::begin) and
/// [`record_outcome`](Self::record_outcome), so spans and metrics always agree.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	kind: FlowKind,
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a span tagged with the provided flow kind and stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"otp_gateway.flow",
				flow = kind.as_str(),
				stage,
				client = tracing::field::Empty,
				session = tracing::field::Empty,
				outcome = tracing::field::Empty,
			);

			Self { kind, span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = stage;

			Self { kind }
		}
	}

	/// Flow kind this span reports under.
	pub fn kind(&self) -> FlowKind {
		self.kind
	}

	/// Tags the span with the requesting client.
	pub fn for_client(self, client: &ClientId) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("client", &**client);
		#[cfg(not(feature = "tracing"))]
		let _ = client;

		self
	}

	/// Tags the span with the session fingerprint; the raw handle never reaches the span.
	pub fn for_session(self, id: &SessionId) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("session", id.fingerprint().as_str());
		#[cfg(not(feature = "tracing"))]
		let _ = id;

		self
	}

	/// Counts an attempt for this flow.
	pub fn begin(self) -> Self {
		obs::record_flow_outcome(self.kind, FlowOutcome::Attempt);

		self
	}

	/// Stores the terminal outcome on the span and bumps the matching counter.
	pub fn record_outcome(&self, outcome: FlowOutcome) {
		#[cfg(feature = "tracing")]
		self.span.record("outcome", outcome.as_str());

		obs::record_flow_outcome(self.kind, outcome);
	}

	/// Records the outcome of `result` and hands it back.
	pub fn finish<T>(&self, result: Result<T>) -> Result<T> {
		#[cfg(feature = "tracing")]
		{
			let outcome = if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure };

			self.span.record("outcome", outcome.as_str());
		}

		obs::observe(self.kind, result)
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, error::AuthFailure};

	#[tokio::test]
	async fn instrument_passes_output_through() {
		let span = FlowSpan::new(FlowKind::Verify, "instrument_passes_output_through")
			.for_client(&client("10.0.0.1"))
			.for_session(&SessionId::generate())
			.begin();
		let value = span.instrument(async { "verified" }).await;

		assert_eq!(value, "verified");
		assert_eq!(span.kind(), FlowKind::Verify);
	}

	#[test]
	fn finish_returns_the_result_untouched() {
		let span = FlowSpan::new(FlowKind::Resend, "finish");
		let failed: Result<()> =
			span.finish(Err(Error::unauthenticated(AuthFailure::SessionExpired)));

		assert_eq!(span.finish(Ok(7)).ok(), Some(7));
		assert!(matches!(
			failed,
			Err(Error::Unauthenticated { reason: AuthFailure::SessionExpired })
		));
	}
}

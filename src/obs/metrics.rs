// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"otp_gateway_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records a rate-limit admission decision (when metrics are enabled).
pub fn record_rate_limit_decision(allowed: bool) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"otp_gateway_rate_limit_total",
			"decision" => if allowed { "allowed" } else { "denied" }
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = allowed;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_noop_without_metrics() {
		record_flow_outcome(FlowKind::Verify, FlowOutcome::Failure);
		record_rate_limit_decision(false);
	}
}

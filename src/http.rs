//! Shared reqwest transport for the email and resource collaborators.
//!
//! Both collaborators are called with a bounded timeout and never retried; an unreachable
//! collaborator is a terminal failure for the triggering flow. Redirects are not followed
//! so a downstream service cannot bounce forwarded identity headers to another origin.

// std
use std::ops::Deref;
// crates.io
use reqwest::redirect::Policy;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client with the provided request timeout and redirects disabled.
	pub fn with_timeout(timeout: Duration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(timeout.unsigned_abs())
			.redirect(Policy::none())
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`]; callers own its timeout and redirect policy.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

/// Maps a reqwest failure onto [`TransportError`] for the named collaborator.
pub fn map_transport_error(collaborator: &'static str, e: ReqwestError) -> TransportError {
	match e.status() {
		Some(status) => TransportError::Status { collaborator, status: status.as_u16() },
		None => TransportError::network(collaborator, e),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::{GET, MockServer};
	// self
	use super::*;

	#[tokio::test]
	async fn client_does_not_follow_redirects() {
		let server = MockServer::start_async().await;
		let redirect = server
			.mock_async(|when, then| {
				when.method(GET).path("/hop");
				then.status(302).header("location", "https://elsewhere.invalid/");
			})
			.await;
		let client = ReqwestHttpClient::with_timeout(Duration::seconds(5))
			.expect("Client should build with a positive timeout.");
		let response =
			client.get(server.url("/hop")).send().await.expect("Redirect response should arrive.");

		redirect.assert_async().await;
		assert_eq!(response.status().as_u16(), 302);
	}

	#[tokio::test]
	async fn unreachable_hosts_map_to_network_errors() {
		let client = ReqwestHttpClient::with_timeout(Duration::milliseconds(200))
			.expect("Client should build with a positive timeout.");
		let e = client
			.get("http://127.0.0.1:9/unreachable")
			.send()
			.await
			.expect_err("Discard port should refuse the connection.");

		assert!(matches!(
			map_transport_error("resource", e),
			TransportError::Network { collaborator: "resource", .. }
		));
	}
}

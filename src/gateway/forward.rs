//! Resource collaborator: relays authorized requests downstream.

// crates.io
use axum::{
	body::{Body, Bytes},
	http::{HeaderMap, HeaderValue, Method, header},
	response::Response,
};
// self
use crate::{_prelude::*, auth::Subject, error::TransportError};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Identity header carrying the subject's user identifier.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Identity header carrying the subject's email.
pub const USER_EMAIL_HEADER: &str = "x-user-email";
/// Identity header carrying the comma-joined granted scopes.
pub const USER_SCOPES_HEADER: &str = "x-user-scopes";

const HOP_BY_HOP: [&str; 9] = [
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
	"host",
];

/// Boxed future returned by [`ResourceForwarder::forward`].
pub type ForwardFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Response, TransportError>> + 'a + Send>>;

/// Authorized request ready to be relayed.
#[derive(Clone, Debug)]
pub struct ForwardRequest {
	/// Original method.
	pub method: Method,
	/// Original path and query string.
	pub path_and_query: String,
	/// Original headers with hop-by-hop entries removed and identity headers injected.
	pub headers: HeaderMap,
	/// Original body.
	pub body: Bytes,
}
impl ForwardRequest {
	/// Prepares a relay of the inbound request on behalf of `subject`.
	///
	/// Identity headers supplied by the client are overwritten, never trusted.
	pub fn new(
		method: Method,
		path_and_query: impl Into<String>,
		mut headers: HeaderMap,
		body: Bytes,
		subject: &Subject,
	) -> Self {
		strip_hop_by_hop(&mut headers);
		headers.remove(header::CONTENT_LENGTH);

		for (name, value) in [
			(USER_ID_HEADER, subject.user_id.to_string()),
			(USER_EMAIL_HEADER, subject.email.to_string()),
			(USER_SCOPES_HEADER, subject.scopes.header_value()),
		] {
			match HeaderValue::from_str(&value) {
				Ok(value) => {
					headers.insert(name, value);
				},
				Err(_) => {
					headers.remove(name);
				},
			}
		}

		Self { method, path_and_query: path_and_query.into(), headers, body }
	}
}

/// Downstream resource collaborator contract.
///
/// A returned `Err` means the collaborator was unreachable; any HTTP response, error statuses
/// included, is relayed to the client unmodified.
pub trait ResourceForwarder
where
	Self: Send + Sync,
{
	/// Relays `request` and returns the downstream response.
	fn forward<'a>(&'a self, request: ForwardRequest) -> ForwardFuture<'a>;
}

/// Removes connection-scoped headers that must not cross a proxy.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
	for name in HOP_BY_HOP {
		headers.remove(name);
	}
}

/// Resource collaborator reached over HTTP with a bounded timeout.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct HttpResourceForwarder {
	client: ReqwestHttpClient,
	base_url: Url,
}
#[cfg(feature = "reqwest")]
impl HttpResourceForwarder {
	/// Forwards every request to `base_url`, preserving path and query.
	pub fn new(client: ReqwestHttpClient, base_url: Url) -> Self {
		Self { client, base_url }
	}

	fn target(&self, path_and_query: &str) -> Result<Url, TransportError> {
		let joined = format!("{}{path_and_query}", self.base_url.as_str().trim_end_matches('/'));

		Url::parse(&joined).map_err(|_| TransportError::Rejected { collaborator: "resource" })
	}
}
#[cfg(feature = "reqwest")]
impl ResourceForwarder for HttpResourceForwarder {
	fn forward<'a>(&'a self, request: ForwardRequest) -> ForwardFuture<'a> {
		Box::pin(async move {
			let url = self.target(&request.path_and_query)?;
			let upstream = self
				.client
				.request(request.method, url)
				.headers(request.headers)
				.body(request.body)
				.send()
				.await
				.map_err(|e| crate::http::map_transport_error("resource", e))?;
			let status = upstream.status();
			let mut headers = upstream.headers().clone();
			let body = upstream
				.bytes()
				.await
				.map_err(|e| crate::http::map_transport_error("resource", e))?;

			strip_hop_by_hop(&mut headers);
			headers.remove(header::CONTENT_LENGTH);

			let mut response = Response::new(Body::from(body));

			*response.status_mut() = status;
			*response.headers_mut() = headers;

			Ok(response)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{Role, UserId},
		directory::User,
	};

	fn subject() -> Subject {
		User {
			id: UserId::new("user-1").expect("User fixture should be valid."),
			email: email("a@b.com"),
			role: Role::User,
		}
		.subject()
	}

	#[test]
	fn identity_headers_replace_client_supplied_ones() {
		let mut headers = HeaderMap::new();

		headers.insert(USER_ID_HEADER, HeaderValue::from_static("admin"));
		headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
		headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

		let request =
			ForwardRequest::new(Method::GET, "/items?page=2", headers, Bytes::new(), &subject());

		assert_eq!(request.headers[USER_ID_HEADER], "user-1");
		assert_eq!(request.headers[USER_EMAIL_HEADER], "a@b.com");
		assert_eq!(request.headers[USER_SCOPES_HEADER], "read,write");
		assert_eq!(request.headers[header::ACCEPT], "application/json");
		assert!(!request.headers.contains_key(header::CONNECTION));
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test]
	async fn http_forwarder_relays_method_query_body_and_status() {
		// crates.io
		use httpmock::prelude::{MockServer, POST};

		let server = MockServer::start_async().await;
		let create = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/items")
					.query_param("dry_run", "1")
					.header(USER_ID_HEADER, "user-1")
					.body("{\"name\":\"x\"}");
				then.status(201).header("x-resource", "42").body("created");
			})
			.await;
		let client = ReqwestHttpClient::with_timeout(Duration::seconds(5))
			.expect("Client should build with a positive timeout.");
		let base = Url::parse(&server.base_url()).expect("Mock base URL should parse.");
		let forwarder = HttpResourceForwarder::new(client, base);
		let request = ForwardRequest::new(
			Method::POST,
			"/items?dry_run=1",
			HeaderMap::new(),
			Bytes::from_static(b"{\"name\":\"x\"}"),
			&subject(),
		);
		let response = forwarder.forward(request).await.expect("Forwarding should succeed.");

		create.assert_async().await;
		assert_eq!(response.status().as_u16(), 201);
		assert_eq!(response.headers()["x-resource"], "42");
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test]
	async fn unreachable_resource_is_a_transport_error() {
		let client = ReqwestHttpClient::with_timeout(Duration::seconds(2))
			.expect("Client should build with a positive timeout.");
		let base = Url::parse("http://127.0.0.1:9").expect("Base URL should parse.");
		let forwarder = HttpResourceForwarder::new(client, base);
		let request =
			ForwardRequest::new(Method::GET, "/items", HeaderMap::new(), Bytes::new(), &subject());

		assert!(matches!(
			forwarder.forward(request).await,
			Err(TransportError::Network { collaborator: "resource", .. })
		));
	}
}

//! Per-request client resolution and session-handle transport.

// std
use std::net::SocketAddr;
// crates.io
use axum::{
	extract::ConnectInfo,
	http::{
		HeaderMap, HeaderValue,
		header::{COOKIE, InvalidHeaderValue},
	},
};
// self
use crate::{
	_prelude::*,
	audit::RequestContext,
	auth::{ClientId, IdentifierError, SessionId},
	config::CookiePolicy,
};

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Client identity resolved once per request by the rate-limit middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientContext {
	/// Identifier sessions are bound to and the limiter counts against.
	pub client_id: ClientId,
	/// Audit view of the request.
	pub request: RequestContext,
}
impl ClientContext {
	/// Resolves the client address.
	///
	/// With `trust_forwarded_for`, the first `X-Forwarded-For` entry wins; otherwise the peer
	/// address from [`ConnectInfo`] is used. Requests with neither share the `unknown` bucket.
	pub fn resolve(
		method: &str,
		path: &str,
		headers: &HeaderMap,
		peer: Option<&ConnectInfo<SocketAddr>>,
		trust_forwarded_for: bool,
	) -> Result<Self, IdentifierError> {
		let forwarded = trust_forwarded_for
			.then(|| {
				headers
					.get(FORWARDED_FOR)
					.and_then(|value| value.to_str().ok())
					.and_then(|value| value.split(',').next())
					.map(str::trim)
					.filter(|value| !value.is_empty())
					.map(str::to_owned)
			})
			.flatten();
		let source_ip = forwarded
			.or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
			.unwrap_or_else(|| UNKNOWN_CLIENT.into());
		let client_id = ClientId::new(&source_ip)?;

		Ok(Self {
			client_id,
			request: RequestContext { source_ip, method: method.into(), path: path.into() },
		})
	}
}

/// Extracts the session handle from the cookie, falling back to the service header.
///
/// Malformed handles are treated as absent.
pub fn session_handle(headers: &HeaderMap, policy: &CookiePolicy) -> Option<SessionId> {
	let from_cookie = headers
		.get_all(COOKIE)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(';'))
		.filter_map(|pair| pair.trim().split_once('='))
		.find(|(name, _)| name.trim() == policy.name)
		.map(|(_, value)| value.trim().to_owned());
	let raw = from_cookie.or_else(|| {
		headers.get(policy.header.as_str()).and_then(|v| v.to_str().ok()).map(str::to_owned)
	})?;

	SessionId::new(raw).ok()
}

/// `Set-Cookie` value carrying `session` for `ttl`.
pub fn session_cookie(
	policy: &CookiePolicy,
	session: &SessionId,
	ttl: Duration,
) -> Result<HeaderValue, InvalidHeaderValue> {
	build_cookie(policy, session.expose(), ttl.whole_seconds().max(0))
}

/// `Set-Cookie` value expiring the session cookie.
pub fn clear_session_cookie(policy: &CookiePolicy) -> Result<HeaderValue, InvalidHeaderValue> {
	build_cookie(policy, "", 0)
}

fn build_cookie(
	policy: &CookiePolicy,
	value: &str,
	max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
	let mut cookie = format!(
		"{}={value}; Path={}; HttpOnly; SameSite=Lax; Max-Age={max_age}",
		policy.name, policy.path
	);

	if policy.secure {
		cookie.push_str("; Secure");
	}

	HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
		let mut map = HeaderMap::new();

		for (name, value) in pairs {
			let value = HeaderValue::from_str(value).expect("Header fixture should be valid.");

			map.append(*name, value);
		}

		map
	}

	#[test]
	fn forwarded_for_is_only_honored_when_trusted() {
		let map = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
		let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
		let resolve = |map: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>, trust: bool| {
			ClientContext::resolve("GET", "/", map, peer, trust)
				.expect("Client address should resolve.")
				.request
				.source_ip
		};

		assert_eq!(resolve(&map, Some(&peer), true), "203.0.113.9");
		assert_eq!(resolve(&map, Some(&peer), false), "192.0.2.1");
		assert_eq!(resolve(&HeaderMap::new(), None, false), "unknown");

		let garbage = headers(&[("x-forwarded-for", "not an address")]);

		assert!(ClientContext::resolve("GET", "/", &garbage, None, true).is_err());
	}

	#[test]
	fn cookie_wins_over_service_header() {
		let policy = CookiePolicy::default();
		let cookie = SessionId::generate();
		let header = SessionId::generate();
		let both = headers(&[
			("cookie", format!("theme=dark; sessionId={}", cookie.expose()).as_str()),
			("x-session-id", header.expose()),
		]);
		let header_only = headers(&[("x-session-id", header.expose())]);

		assert_eq!(session_handle(&both, &policy), Some(cookie));
		assert_eq!(session_handle(&header_only, &policy), Some(header));
		assert_eq!(session_handle(&headers(&[("cookie", "sessionId=")]), &policy), None);
	}

	#[test]
	fn cookies_are_http_only_lax_and_secure() {
		let policy = CookiePolicy::default();
		let session = SessionId::generate();
		let set = session_cookie(&policy, &session, Duration::minutes(15))
			.expect("Cookie should be a valid header value.");
		let set = set.to_str().expect("Cookie should be ASCII.");
		let cleared =
			clear_session_cookie(&policy).expect("Cookie should be a valid header value.");

		assert!(set.starts_with(&format!("sessionId={}", session.expose())));
		assert!(set.contains("HttpOnly") && set.contains("SameSite=Lax") && set.contains("Secure"));
		assert!(set.contains("Max-Age=900"));
		assert!(cleared.to_str().is_ok_and(|v| v.contains("Max-Age=0")));
	}
}

//! End-to-end: signup, verification, a relayed resource call, and logout over real HTTP
//! collaborators.

#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use axum::{
	Router,
	body::{Body, to_bytes},
	http::{Request, StatusCode, header},
	response::Response,
};
use httpmock::prelude::{DELETE, GET, MockServer};
use serde_json::{Value, json};
use time::Duration;
use tower::ServiceExt;
// self
use otp_gateway::{
	audit::{AuditAction, AuditEmitter, MemoryAuditSink},
	auth::Email,
	config::{GatewayConfig, OtpPolicy, RateLimitPolicy},
	delivery::MemoryOutbox,
	directory::MemoryUserDirectory,
	gateway::{Gateway, HttpResourceForwarder, USER_EMAIL_HEADER, router},
	http::ReqwestHttpClient,
	store::MemoryStore,
	url::Url,
};

const CLIENT_IP: &str = "198.51.100.7";

fn config() -> GatewayConfig {
	GatewayConfig::builder("integration-signing-secret-with-32-bytes")
		.otp(OtpPolicy { hash_memory_kib: 64, hash_iterations: 1, ..OtpPolicy::default() })
		.rate_limit(RateLimitPolicy { limit: 100, ..RateLimitPolicy::default() })
		.trust_forwarded_for(true)
		.build()
		.expect("Integration configuration should be valid.")
}

fn request(method: &str, uri: &str, session: Option<&str>, body: Option<Value>) -> Request<Body> {
	let mut builder =
		Request::builder().method(method).uri(uri).header("x-forwarded-for", CLIENT_IP);

	if let Some(session) = session {
		builder = builder.header(header::COOKIE, format!("sessionId={session}"));
	}

	let body = body.map_or_else(Body::empty, |body| Body::from(body.to_string()));

	builder.body(body).expect("Request fixture should build.")
}

async fn call(app: &Router, request: Request<Body>) -> (Response, Value) {
	let response = app.clone().oneshot(request).await.expect("Router should always answer.");
	let (parts, body) = response.into_parts();
	let bytes = to_bytes(body, usize::MAX).await.expect("Response body should be readable.");
	let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

	(Response::from_parts(parts, Body::empty()), json)
}

fn session_cookie(response: &Response) -> Option<String> {
	response
		.headers()
		.get_all(header::SET_COOKIE)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.find_map(|cookie| cookie.strip_prefix("sessionId="))
		.and_then(|rest| rest.split(';').next())
		.filter(|value| !value.is_empty())
		.map(str::to_owned)
}

#[tokio::test]
async fn signup_verify_access_and_logout() {
	let resource = MockServer::start_async().await;
	let orders = resource
		.mock_async(|when, then| {
			when.method(GET).path("/orders/7").header(USER_EMAIL_HEADER, "reader@example.com");
			then.status(200).header("content-type", "application/json").body("{\"id\":7}");
		})
		.await;
	let client = ReqwestHttpClient::with_timeout(Duration::seconds(5))
		.expect("Client should build with a positive timeout.");
	let base = Url::parse(&resource.base_url()).expect("Mock base URL should parse.");
	let outbox = Arc::new(MemoryOutbox::default());
	let sink = Arc::new(MemoryAuditSink::default());
	let (emitter, worker) = AuditEmitter::spawn(sink.clone(), 64);
	let gateway = Gateway::new(
		config(),
		Arc::new(MemoryStore::default()),
		outbox.clone(),
		Arc::new(MemoryUserDirectory::default()),
		Arc::new(HttpResourceForwarder::new(client, base)),
		emitter,
	)
	.expect("Gateway should build from a valid configuration.");
	let app = router(Arc::new(gateway));
	let (signed_up, body) = call(
		&app,
		request("POST", "/signup", None, Some(json!({ "email": "Reader@Example.com" }))),
	)
	.await;

	assert_eq!(signed_up.status(), StatusCode::OK);
	assert_eq!(body["status"], "otp_sent");

	let pending = session_cookie(&signed_up).expect("Signup should set the session cookie.");
	let recipient = Email::parse("reader@example.com").expect("Email fixture should be valid.");
	let code = outbox.last_code_for(&recipient).expect("A code should have been delivered.");
	let otp = json!({ "otp": code });
	let (verified, body) =
		call(&app, request("POST", "/verify-otp", Some(&pending), Some(otp))).await;

	assert_eq!(verified.status(), StatusCode::OK);
	assert_eq!(body["refresh_token_duration_days"], 7);

	let session =
		session_cookie(&verified).expect("Verification should rotate the session cookie.");
	let (fetched, body) = call(&app, request("GET", "/orders/7", Some(&session), None)).await;

	orders.assert_async().await;
	assert_eq!(fetched.status(), StatusCode::OK);
	assert_eq!(body, json!({ "id": 7 }));

	let (logged_out, _) = call(&app, request("POST", "/logout", Some(&session), None)).await;
	let (after, body) = call(&app, request("GET", "/orders/7", Some(&session), None)).await;

	assert_eq!(logged_out.status(), StatusCode::OK);
	assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
	assert_eq!(body["error"], "session_expired");

	orders.assert_hits_async(1).await;

	drop(app);
	worker.join().await;

	let actions = sink.events().into_iter().map(|event| event.action).collect::<Vec<_>>();

	for expected in [
		AuditAction::Signup,
		AuditAction::OtpVerified,
		AuditAction::TokenIssued,
		AuditAction::ResourceAccess,
		AuditAction::Logout,
	] {
		assert!(actions.contains(&expected), "Missing audit action {expected}.");
	}
}

#[tokio::test]
async fn downstream_errors_are_relayed_unmodified() {
	let resource = MockServer::start_async().await;
	let missing = resource
		.mock_async(|when, then| {
			when.method(DELETE).path("/orders/404");
			then.status(404).body("{\"detail\":\"no such order\"}");
		})
		.await;
	let client = ReqwestHttpClient::with_timeout(Duration::seconds(5))
		.expect("Client should build with a positive timeout.");
	let base = Url::parse(&resource.base_url()).expect("Mock base URL should parse.");
	let outbox = Arc::new(MemoryOutbox::default());
	let (emitter, _worker) = AuditEmitter::spawn(Arc::new(MemoryAuditSink::default()), 64);
	let gateway = Gateway::new(
		config(),
		Arc::new(MemoryStore::default()),
		outbox.clone(),
		Arc::new(MemoryUserDirectory::default()),
		Arc::new(HttpResourceForwarder::new(client, base)),
		emitter,
	)
	.expect("Gateway should build from a valid configuration.");
	let app = router(Arc::new(gateway));
	let (signed_up, _) =
		call(&app, request("POST", "/signup", None, Some(json!({ "email": "w@example.com" }))))
			.await;
	let pending = session_cookie(&signed_up).expect("Signup should set the session cookie.");
	let recipient = Email::parse("w@example.com").expect("Email fixture should be valid.");
	let code = outbox.last_code_for(&recipient).expect("A code should have been delivered.");
	let otp = json!({ "otp": code });
	let (verified, _) = call(&app, request("POST", "/verify-otp", Some(&pending), Some(otp))).await;
	let session =
		session_cookie(&verified).expect("Verification should rotate the session cookie.");
	let (deleted, body) = call(&app, request("DELETE", "/orders/404", Some(&session), None)).await;

	missing.assert_async().await;
	assert_eq!(deleted.status(), StatusCode::NOT_FOUND);
	assert_eq!(body["detail"], "no such order");
}

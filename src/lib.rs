//! Passwordless OTP gateway: signup sessions, bounded one-time codes, access/refresh credential
//! exchange, and a scope-checking request mediator in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod gateway;
#[cfg(feature = "reqwest")] pub mod http;
pub mod issuer;
pub mod obs;
pub mod otp;
pub mod rate_limit;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// crates.io
	use axum::{Router, body::Body, response::Response};
	// self
	use crate::{
		audit::{AuditEmitter, AuditEvent, AuditWorker, MemoryAuditSink},
		auth::{ClientId, Email},
		config::{GatewayConfig, OtpPolicy, RateLimitPolicy},
		delivery::MemoryOutbox,
		directory::MemoryUserDirectory,
		error::TransportError,
		gateway::{ForwardFuture, ForwardRequest, Gateway, ResourceForwarder},
		store::{Fields, KvStore, MemoryStore, StoreError, StoreFuture, StoreKey},
	};

	/// Signing secret shared by every test fixture.
	pub const TEST_SIGNING_SECRET: &str = "test-signing-secret-with-at-least-32-bytes";

	/// Handles returned alongside a test gateway so assertions can inspect the collaborators.
	pub struct TestHarness {
		/// Fully wired gateway.
		pub gateway: Arc<Gateway>,
		/// Backing key-value store shared by sessions, refresh tokens, and rate limits.
		pub store: Arc<MemoryStore>,
		/// Outbox capturing every delivered OTP code.
		pub outbox: Arc<MemoryOutbox>,
		/// In-memory identity collaborator.
		pub directory: Arc<MemoryUserDirectory>,
		/// Sink capturing emitted audit events.
		pub audit: Arc<MemoryAuditSink>,
		/// Worker draining the audit queue.
		pub audit_worker: AuditWorker,
	}

	/// OTP policy with cheap hashing parameters so tests stay fast.
	pub fn test_otp_policy() -> OtpPolicy {
		OtpPolicy { hash_memory_kib: 64, hash_iterations: 1, ..OtpPolicy::default() }
	}

	/// Builds a configuration with fast hashing and a generous rate limit.
	pub fn test_config() -> GatewayConfig {
		GatewayConfig::builder(TEST_SIGNING_SECRET)
			.otp(test_otp_policy())
			.rate_limit(RateLimitPolicy { limit: 1_000, ..RateLimitPolicy::default() })
			.trust_forwarded_for(true)
			.build()
			.expect("Test gateway configuration should be valid.")
	}

	/// Wires a gateway against in-memory collaborators and the provided resource forwarder.
	pub fn build_test_gateway(
		config: GatewayConfig,
		forwarder: Arc<dyn ResourceForwarder>,
	) -> TestHarness {
		let store = Arc::new(MemoryStore::default());
		let outbox = Arc::new(MemoryOutbox::default());
		let directory = Arc::new(MemoryUserDirectory::default());
		let audit = Arc::new(MemoryAuditSink::default());
		let (emitter, audit_worker) =
			AuditEmitter::spawn(audit.clone(), config.audit_queue_capacity);
		let gateway = Gateway::new(
			config,
			store.clone(),
			outbox.clone(),
			directory.clone(),
			forwarder,
			emitter,
		)
		.expect("Test gateway should build from a valid configuration.");

		TestHarness { gateway: Arc::new(gateway), store, outbox, directory, audit, audit_worker }
	}
	impl TestHarness {
		/// Router over the harness gateway.
		pub fn router(&self) -> Router {
			crate::gateway::router(self.gateway.clone())
		}

		/// Drops the gateway and waits until every queued audit event reached the sink.
		///
		/// Every router built from this harness must be dropped first.
		pub async fn drain_audit(self) -> Vec<AuditEvent> {
			let Self { gateway, audit, audit_worker, .. } = self;

			drop(gateway);
			tokio::time::timeout(std::time::Duration::from_secs(5), audit_worker.join())
				.await
				.expect("Audit worker should drain once every emitter is dropped.");

			audit.events()
		}
	}

	/// Resource collaborator recording relayed requests and answering `200 ok`.
	#[derive(Debug, Default)]
	pub struct RecordingForwarder {
		requests: Mutex<Vec<ForwardRequest>>,
	}
	impl RecordingForwarder {
		/// Requests relayed so far.
		pub fn requests(&self) -> Vec<ForwardRequest> {
			self.requests.lock().clone()
		}
	}
	impl ResourceForwarder for RecordingForwarder {
		fn forward<'a>(&'a self, request: ForwardRequest) -> ForwardFuture<'a> {
			Box::pin(async move {
				self.requests.lock().push(request);

				Ok(Response::new(Body::from("ok")))
			})
		}
	}

	/// Resource collaborator that is never reachable.
	#[derive(Clone, Copy, Debug, Default)]
	pub struct UnreachableForwarder;
	impl ResourceForwarder for UnreachableForwarder {
		fn forward<'a>(&'a self, _: ForwardRequest) -> ForwardFuture<'a> {
			Box::pin(async { Err(TransportError::Rejected { collaborator: "resource" }) })
		}
	}

	/// Backend that refuses every command, standing in for an unreachable store.
	#[derive(Clone, Copy, Debug, Default)]
	pub struct UnavailableStore;
	impl UnavailableStore {
		fn refused() -> StoreError {
			StoreError::Backend { message: "connection refused".into() }
		}
	}
	impl KvStore for UnavailableStore {
		fn put<'a>(&'a self, _: &'a StoreKey, _: Fields, _: Duration) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(Self::refused()) })
		}

		fn get_all<'a>(&'a self, _: &'a StoreKey) -> StoreFuture<'a, Option<Fields>> {
			Box::pin(async { Err(Self::refused()) })
		}

		fn set_fields<'a>(
			&'a self,
			_: &'a StoreKey,
			_: Fields,
			_: Duration,
		) -> StoreFuture<'a, bool> {
			Box::pin(async { Err(Self::refused()) })
		}

		fn increment_field<'a>(
			&'a self,
			_: &'a StoreKey,
			_: &'a str,
			_: i64,
		) -> StoreFuture<'a, Option<i64>> {
			Box::pin(async { Err(Self::refused()) })
		}

		fn increment_counter<'a>(&'a self, _: &'a StoreKey, _: Duration) -> StoreFuture<'a, u64> {
			Box::pin(async { Err(Self::refused()) })
		}

		fn delete<'a>(&'a self, _: &'a StoreKey) -> StoreFuture<'a, bool> {
			Box::pin(async { Err(Self::refused()) })
		}
	}

	/// Client identifier fixture.
	pub fn client(ip: &str) -> ClientId {
		ClientId::new(ip).expect("Client fixture should be valid.")
	}

	/// Email fixture.
	pub fn email(value: &str) -> Email {
		Email::parse(value).expect("Email fixture should be valid.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, ErrorKind, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tower as _};

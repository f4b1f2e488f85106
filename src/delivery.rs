//! OTP delivery collaborator: the core hands `(recipient, code)` over and only learns whether
//! the message was queued.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
#[cfg(feature = "reqwest")] use tokio::{sync::mpsc, task::JoinHandle};
// self
use crate::{_prelude::*, auth::Email, error::TransportError, otp::OtpCode};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Boxed future returned by [`OtpDelivery::submit`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + 'a + Send>>;

/// Outbound email collaborator contract.
///
/// `submit` must return as soon as the message is accepted for delivery; it never waits for the
/// email to be sent. An `Err` means the message was not accepted and the caller discards the
/// OTP state it just issued.
pub trait OtpDelivery
where
	Self: Send + Sync,
{
	/// Queues `code` for delivery to `recipient`.
	fn submit<'a>(&'a self, recipient: &'a Email, code: &'a OtpCode) -> DeliveryFuture<'a>;
}

/// A code captured by [`MemoryOutbox`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxMessage {
	/// Recipient address.
	pub recipient: Email,
	/// Plain code as it would appear in the email body.
	pub code: String,
}

/// In-memory delivery collaborator recording every accepted message.
#[derive(Debug)]
pub struct MemoryOutbox {
	messages: Mutex<Vec<OutboxMessage>>,
	accepting: AtomicBool,
}
impl MemoryOutbox {
	/// Toggles whether new messages are accepted; a refusing outbox simulates an outage.
	pub fn set_accepting(&self, accepting: bool) {
		self.accepting.store(accepting, Ordering::SeqCst);
	}

	/// Latest code delivered to `recipient`.
	pub fn last_code_for(&self, recipient: &Email) -> Option<String> {
		let messages = self.messages.lock();

		messages.iter().rev().find(|m| &m.recipient == recipient).map(|m| m.code.clone())
	}

	/// Every message accepted so far.
	pub fn messages(&self) -> Vec<OutboxMessage> {
		self.messages.lock().clone()
	}
}
impl Default for MemoryOutbox {
	fn default() -> Self {
		Self { messages: Mutex::new(Vec::new()), accepting: AtomicBool::new(true) }
	}
}
impl OtpDelivery for MemoryOutbox {
	fn submit<'a>(&'a self, recipient: &'a Email, code: &'a OtpCode) -> DeliveryFuture<'a> {
		Box::pin(async move {
			if !self.accepting.load(Ordering::SeqCst) {
				return Err(TransportError::Rejected { collaborator: "email" });
			}

			let message =
				OutboxMessage { recipient: recipient.clone(), code: code.expose().to_owned() };

			self.messages.lock().push(message);

			Ok(())
		})
	}
}

#[cfg(feature = "reqwest")]
#[derive(Serialize)]
struct SendOtpBody {
	email: String,
	otp: String,
}

#[cfg(feature = "reqwest")]
struct QueuedOtp {
	recipient: Email,
	code: OtpCode,
}

/// Email-service collaborator reached over HTTP (`POST {base}/send-otp` with `{email, otp}`).
///
/// Messages go through a bounded queue drained by a background task, so a slow email service
/// never delays signup. A full or closed queue is reported as a rejected submission.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct HttpOtpDelivery {
	queue: mpsc::Sender<QueuedOtp>,
}
#[cfg(feature = "reqwest")]
impl HttpOtpDelivery {
	/// Starts the delivery worker on the current Tokio runtime.
	pub fn spawn(
		client: ReqwestHttpClient,
		base_url: &Url,
		capacity: usize,
	) -> Result<(Self, DeliveryWorker), crate::error::ConfigError> {
		let endpoint = base_url.join("send-otp")?;
		let (queue, mut rx) = mpsc::channel::<QueuedOtp>(capacity.max(1));
		let handle = tokio::spawn(async move {
			while let Some(message) = rx.recv().await {
				send_one(&client, &endpoint, message).await;
			}
		});

		Ok((Self { queue }, DeliveryWorker { handle }))
	}
}
#[cfg(feature = "reqwest")]
impl OtpDelivery for HttpOtpDelivery {
	fn submit<'a>(&'a self, recipient: &'a Email, code: &'a OtpCode) -> DeliveryFuture<'a> {
		Box::pin(async move {
			self.queue
				.try_send(QueuedOtp { recipient: recipient.clone(), code: code.clone() })
				.map_err(|_| TransportError::Rejected { collaborator: "email" })
		})
	}
}
#[cfg(feature = "reqwest")]
impl Debug for QueuedOtp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("QueuedOtp").field("recipient", &self.recipient).finish_non_exhaustive()
	}
}

/// Handle to the delivery worker; drains outstanding messages once every sender is dropped.
#[cfg(feature = "reqwest")]
#[derive(Debug)]
pub struct DeliveryWorker {
	handle: JoinHandle<()>,
}
#[cfg(feature = "reqwest")]
impl DeliveryWorker {
	/// Waits for the queue to drain.
	pub async fn join(self) {
		let _ = self.handle.await;
	}
}

#[cfg(feature = "reqwest")]
async fn send_one(client: &ReqwestHttpClient, endpoint: &Url, message: QueuedOtp) {
	let body = SendOtpBody {
		email: message.recipient.to_string(),
		otp: message.code.expose().to_owned(),
	};
	let result = client
		.post(endpoint.clone())
		.json(&body)
		.send()
		.await
		.and_then(|response| response.error_for_status());

	if let Err(e) = result {
		let e = crate::http::map_transport_error("email", e);

		#[cfg(feature = "tracing")]
		tracing::warn!(
			recipient = %message.recipient.masked(),
			error = %e,
			"OTP email delivery failed."
		);
		#[cfg(not(feature = "tracing"))]
		let _ = e;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	#[tokio::test]
	async fn memory_outbox_records_and_refuses() {
		let outbox = MemoryOutbox::default();
		let recipient = email("a@b.com");

		outbox
			.submit(&recipient, &OtpCode::new("123456"))
			.await
			.expect("Accepting outbox should queue the code.");
		outbox.set_accepting(false);

		assert!(matches!(
			outbox.submit(&recipient, &OtpCode::new("654321")).await,
			Err(TransportError::Rejected { collaborator: "email" })
		));
		assert_eq!(outbox.last_code_for(&recipient).as_deref(), Some("123456"));
		assert_eq!(outbox.messages().len(), 1);
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn queued_messages_debug_without_code_or_full_address() {
		let queued = QueuedOtp { recipient: email("alice@b.com"), code: OtpCode::new("246810") };
		let rendered = format!("{queued:?}");

		assert!(rendered.contains("a***@b.com"));
		assert!(!rendered.contains("alice") && !rendered.contains("246810"));
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test]
	async fn http_delivery_posts_to_the_email_service() {
		// crates.io
		use httpmock::prelude::{MockServer, POST};

		let server = MockServer::start_async().await;
		let send = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/send-otp")
					.json_body(serde_json::json!({ "email": "a@b.com", "otp": "246810" }));
				then.status(200);
			})
			.await;
		let base = Url::parse(&server.base_url()).expect("Mock base URL should parse.");
		let client = ReqwestHttpClient::with_timeout(Duration::seconds(5))
			.expect("Client should build with a positive timeout.");
		let (delivery, worker) =
			HttpOtpDelivery::spawn(client, &base, 8).expect("Delivery worker should start.");

		delivery
			.submit(&email("a@b.com"), &OtpCode::new("246810"))
			.await
			.expect("Queue should accept the message.");
		drop(delivery);
		worker.join().await;
		send.assert_async().await;
	}
}

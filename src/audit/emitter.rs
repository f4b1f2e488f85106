//! Bounded, fire-and-forget audit queue.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{
	sync::mpsc::{self, error::TrySendError},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	audit::{AuditEvent, AuditSink},
};

/// Cloneable handle that queues audit events without waiting for the sink.
///
/// When the queue is full the event is dropped, counted, and logged; request handling never
/// blocks on audit back-pressure.
#[derive(Clone, Debug)]
pub struct AuditEmitter {
	queue: mpsc::Sender<AuditEvent>,
	dropped: Arc<AtomicU64>,
}
impl AuditEmitter {
	/// Starts the audit worker on the current Tokio runtime.
	pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, AuditWorker) {
		let (queue, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
		let handle = tokio::spawn(async move {
			while let Some(event) = rx.recv().await {
				if let Err(e) = sink.record(&event).await {
					#[cfg(feature = "tracing")]
					tracing::warn!(
						action = event.action.as_str(),
						error = %e,
						"Audit sink rejected an event."
					);
					#[cfg(not(feature = "tracing"))]
					let _ = e;
				}
			}
		});

		(Self { queue, dropped: Arc::new(AtomicU64::new(0)) }, AuditWorker { handle })
	}

	/// Queues `event`; never waits.
	pub fn emit(&self, event: AuditEvent) {
		if let Err(e) = self.queue.try_send(event) {
			self.dropped.fetch_add(1, Ordering::Relaxed);

			let (reason, event) = match e {
				TrySendError::Full(event) => ("queue_full", event),
				TrySendError::Closed(event) => ("worker_stopped", event),
			};

			#[cfg(feature = "tracing")]
			tracing::warn!(action = event.action.as_str(), reason, "Audit event dropped.");
			#[cfg(not(feature = "tracing"))]
			let _ = (reason, event);
		}
	}

	/// Events dropped since the emitter was created.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

/// Handle to the audit worker; the worker drains the queue once every emitter is dropped.
#[derive(Debug)]
pub struct AuditWorker {
	handle: JoinHandle<()>,
}
impl AuditWorker {
	/// Waits for the queue to drain.
	pub async fn join(self) {
		let _ = self.handle.await;
	}

	/// Stops the worker immediately, discarding queued events.
	pub fn abort(&self) {
		self.handle.abort();
	}
}

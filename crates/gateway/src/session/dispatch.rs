//! The process-wide Input Processor: dispatches inbound request/notification
//! frames to the handler registered for their method, on a bounded worker
//! pool, with panic recovery at the handler boundary (spec §4.1, §9).

use super::capability::CapabilityRegistry;
use crate::error::GatewayError;
use crate::message::{Id, Message, RpcError, code};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

pub struct InputProcessor {
	registry: CapabilityRegistry,
	worker_permits: Arc<Semaphore>,
}

impl InputProcessor {
	pub fn new(registry: CapabilityRegistry) -> Self {
		let workers = std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(4);
		Self {
			registry,
			worker_permits: Arc::new(Semaphore::new(workers)),
		}
	}

	/// Looks up and invokes the handler for `method`. `initialize` callers
	/// should bypass the pool entirely and call [`Self::dispatch_inline`] so
	/// that `Ready` is visible before the very next frame is processed.
	pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
		let _permit = self
			.worker_permits
			.acquire()
			.await
			.expect("semaphore not closed");
		self.dispatch_inline(method, params).await
	}

	pub async fn dispatch_inline(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
		let Some(cap) = self.registry.get(method) else {
			return Err(GatewayError::MethodNotFound(method.to_string()));
		};
		let fut = cap.handle(method, params);
		match AssertUnwindSafe(fut).catch_unwind().await {
			Ok(result) => result,
			Err(panic) => {
				let msg = panic_message(&panic);
				error!(method, %msg, "handler panicked");
				Err(GatewayError::Internal(format!("handler panic: {msg}")))
			},
		}
	}

	/// Runs a request frame end-to-end: dispatch then build the response
	/// frame with the matching id, regardless of outcome.
	pub async fn process_request(&self, id: Id, method: String, params: Value) -> Message {
		match self.dispatch(&method, params).await {
			Ok(result) => Message::response_ok(id, result),
			Err(e) => Message::response_err(id, e.to_rpc_error()),
		}
	}

	/// A malformed frame (no id, no method) gets an InvalidRequest response
	/// addressed to `id: null`, per spec §4.1.
	pub fn malformed_response() -> Message {
		Message::response_err(
			Id::Null,
			RpcError::new(code::INVALID_REQUEST, "malformed frame: missing id and method"),
		)
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

//! Session & Message Core (spec §4.1). Owns the JSON-RPC semantics for a
//! single peer: request/response correlation, notification dispatch, and
//! capability negotiation. Transport-agnostic — the SSE and streamable-HTTP
//! transports both drive a `Session` through `process_input`.

pub(crate) mod capability;
pub(crate) mod dispatch;
mod pipeline;

pub use capability::{Capability, CapabilityRegistry, HandlerResult, LocalCapability, PingCapability, RootsCapability};
pub use dispatch::InputProcessor;
pub use pipeline::process_input;

use crate::error::GatewayError;
use crate::message::{Id, Message, RpcError, code};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
	New,
	Connected,
	Ready,
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
	/// We are acting as the server; the peer is a downstream client.
	ClientOf,
	/// We are acting as a client; the peer is an upstream backend.
	ServerFacing,
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities(pub serde_json::Value);

/// A pending outbound request awaiting its response: a buffered-1 oneshot
/// channel, per spec §3 "Session" data model.
struct Pending {
	tx: oneshot::Sender<Result<Message, GatewayError>>,
}

/// Output sink a `Session` writes frames to; the transport layer owns the
/// receiving half and turns them into SSE events or HTTP bodies.
pub type OutputSender = mpsc::Sender<Message>;

pub struct Session {
	pub id: Arc<str>,
	pub role: PeerRole,
	pub protocol_version: RwLock<Option<String>>,
	pub peer_capabilities: RwLock<Capabilities>,
	pub user_id: RwLock<Option<String>>,
	pub params: RwLock<HashMap<String, String>>,
	status: RwLock<SessionStatus>,
	pending: RwLock<HashMap<Id, Pending>>,
	next_id: std::sync::atomic::AtomicI64,
	output: OutputSender,
	cancel: tokio_util_cancel::CancelHandle,
}

/// A tiny, dependency-free cancellation token: a shared flag plus a
/// broadcast-style notify, standing in for the teacher's context/cancel
/// pair without pulling in `tokio-util` solely for this.
mod tokio_util_cancel {
	use std::sync::Arc;
	use tokio::sync::Notify;

	#[derive(Clone)]
	pub struct CancelHandle {
		cancelled: Arc<std::sync::atomic::AtomicBool>,
		notify: Arc<Notify>,
	}

	impl CancelHandle {
		pub fn new() -> Self {
			Self {
				cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
				notify: Arc::new(Notify::new()),
			}
		}

		pub fn cancel(&self) {
			self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
			self.notify.notify_waiters();
		}

		pub fn is_cancelled(&self) -> bool {
			self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
		}

		pub async fn cancelled(&self) {
			if self.is_cancelled() {
				return;
			}
			self.notify.notified().await;
		}
	}
}

impl Session {
	pub fn new(role: PeerRole, output: OutputSender) -> Arc<Self> {
		Arc::new(Self {
			id: Uuid::new_v4().to_string().into(),
			role,
			protocol_version: RwLock::new(None),
			peer_capabilities: RwLock::new(Capabilities::default()),
			user_id: RwLock::new(None),
			params: RwLock::new(HashMap::new()),
			status: RwLock::new(SessionStatus::New),
			pending: RwLock::new(HashMap::new()),
			next_id: std::sync::atomic::AtomicI64::new(1),
			output,
			cancel: tokio_util_cancel::CancelHandle::new(),
		})
	}

	pub fn status(&self) -> SessionStatus {
		*self.status.read().expect("status read lock")
	}

	pub fn set_status(&self, s: SessionStatus) {
		*self.status.write().expect("status write lock") = s;
	}

	fn alloc_id(&self) -> Id {
		Id::Number(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
	}

	/// Allocates a request id, registers a pending entry, writes the frame,
	/// and resolves when the matching response arrives, the deadline
	/// expires, or the session closes. On expiry an explicit `cancelled`
	/// notification bearing the original id is sent to the peer (spec §4.1
	/// Timeouts & cancellation).
	pub async fn send_request(
		&self,
		method: impl Into<String>,
		params: serde_json::Value,
		deadline: Duration,
	) -> Result<Message, GatewayError> {
		let method = method.into();
		let id = self.alloc_id();
		let (tx, rx) = oneshot::channel();
		self
			.pending
			.write()
			.expect("pending write lock")
			.insert(id.clone(), Pending { tx });

		let frame = Message::request(id.clone(), method.clone(), params);
		if self.output.send(frame).await.is_err() {
			self.pending.write().expect("pending write lock").remove(&id);
			return Err(GatewayError::SessionClosed);
		}

		match timeout(deadline, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(GatewayError::SessionClosed),
			Err(_) => {
				self.pending.write().expect("pending write lock").remove(&id);
				let _ = self
					.output
					.send(Message::notification(
						"notifications/cancelled",
						serde_json::json!({ "requestId": id, "reason": "timeout" }),
					))
					.await;
				Err(GatewayError::UpstreamTimeout(method))
			},
		}
	}

	pub async fn send_notification(&self, method: impl Into<String>, params: serde_json::Value) {
		let _ = self
			.output
			.send(Message::notification(method, params))
			.await;
	}

	/// Writes an already-built frame to the output queue, e.g. a response
	/// produced by [`pipeline::process_input`] for a transport (like legacy
	/// SSE+POST) where replies flow back over a separate stream than the one
	/// the triggering frame arrived on.
	pub async fn emit(&self, message: Message) {
		let _ = self.output.send(message).await;
	}

	pub async fn send_response(&self, id: Id, result: Result<serde_json::Value, RpcError>) {
		let frame = match result {
			Ok(v) => Message::response_ok(id, v),
			Err(e) => Message::response_err(id, e),
		};
		let _ = self.output.send(frame).await;
	}

	/// Resolves a pending request from an incoming response frame. Exactly
	/// one waiter is ever delivered to (spec invariant #2): the entry is
	/// removed on delivery, and a second delivery attempt (late duplicate)
	/// is a documented no-op.
	pub fn resolve_pending(&self, id: &Id, message: Message) -> bool {
		let pending = self.pending.write().expect("pending write lock").remove(id);
		match pending {
			Some(p) => {
				let _ = p.tx.send(Ok(message));
				true
			},
			None => {
				debug!(session = %self.id, %id, "late response dropped, no pending waiter");
				false
			},
		}
	}

	/// Drains all pending requests with a cancellation error; called on
	/// close (spec §5 Cancellation).
	pub fn fail_all_pending(&self, err: GatewayError) {
		let mut pending = self.pending.write().expect("pending write lock");
		for (_, p) in pending.drain() {
			let _ = p.tx.send(Err(match &err {
				GatewayError::SessionClosed => GatewayError::SessionClosed,
				_ => GatewayError::Cancelled,
			}));
		}
	}

	pub fn close(&self) {
		self.set_status(SessionStatus::Closed);
		self.cancel.cancel();
		self.fail_all_pending(GatewayError::SessionClosed);
	}

	pub fn is_closed(&self) -> bool {
		self.status() == SessionStatus::Closed
	}

	pub async fn cancelled(&self) {
		self.cancel.cancelled().await
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("role", &self.role)
			.field("status", &self.status())
			.finish()
	}
}

/// Process-wide session registry. Removing an entry is equivalent to
/// closing it (spec §3 global invariant).
#[derive(Debug, Default)]
pub struct SessionManager {
	sessions: RwLock<HashMap<Arc<str>, Arc<Session>>>,
}

impl SessionManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, session: Arc<Session>) {
		self
			.sessions
			.write()
			.expect("sessions write lock")
			.insert(session.id.clone(), session);
	}

	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.read().expect("sessions read lock").get(id).cloned()
	}

	pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
		let removed = self.sessions.write().expect("sessions write lock").remove(id);
		if let Some(s) = &removed {
			s.close();
		}
		removed
	}

	pub fn len(&self) -> usize {
		self.sessions.read().expect("sessions read lock").len()
	}

	/// Closes every session, for graceful shutdown draining (spec §5).
	pub fn close_all(&self) {
		let sessions = self.sessions.write().expect("sessions write lock");
		for session in sessions.values() {
			session.close();
		}
	}
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

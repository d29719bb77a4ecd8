//! Upstream Client (spec §4.4): presents an MCP server as a client-side
//! session to the gateway fan-out engine. Backed by HTTP, speaking either the
//! legacy SSE+POST wire form or 2025 streamable HTTP, selected per backend.

mod backoff;

pub use backoff::Backoff;

use crate::config::{Backend, UpstreamTransport};
use crate::error::GatewayError;
use crate::message::{Id, Message};
use crate::sse::SseDecoder;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A long-lived client-side session against one upstream backend. Owns its
/// own request-id allocator (IDs here never collide with the downstream
/// session's own IDs — they're a distinct correlation namespace per spec §3).
pub struct UpstreamSession {
	pub slug: String,
	base_url: String,
	headers: HeaderMap,
	http: reqwest::Client,
	transport: UpstreamTransport,
	next_id: AtomicI64,
	closed: AtomicBool,
	session_id: RwLock<Option<String>>,
	/// Re-emits server-pushed notifications (e.g. `resources/updated`) for
	/// the relay to forward downstream, URI re-prefixed.
	pub notifications: broadcast::Sender<Message>,
	listener: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamSession {
	fn alloc_id(&self) -> Id {
		Id::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
	}

	/// Fire-and-forget POST of a notification frame (no `id`, no correlated
	/// response expected) — e.g. `notifications/initialized` after the
	/// handshake. Unlike [`Self::send_request`], never waits on a reply: a
	/// notification has no response to wait for, per JSON-RPC 2.0.
	pub async fn send_notification(&self, method: impl Into<String>, params: serde_json::Value) {
		if self.closed.load(Ordering::SeqCst) {
			return;
		}
		let frame = Message::notification(method, params);
		let mut req = self
			.http
			.post(&self.base_url)
			.headers(self.headers.clone())
			.header("content-type", "application/json")
			.header("accept", "application/json, text/event-stream")
			.json(&frame.to_value());
		if let Some(sid) = self.session_id.read().expect("session id read lock").clone() {
			req = req.header("mcp-session-id", sid);
		}
		if let Err(e) = req.send().await {
			debug!(slug = %self.slug, error = %e, "best-effort notification POST failed");
		}
	}

	pub async fn send_request(
		&self,
		method: impl Into<String>,
		params: serde_json::Value,
		deadline: Duration,
	) -> Result<Message, GatewayError> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(GatewayError::SessionClosed);
		}
		let method = method.into();
		let id = self.alloc_id();
		let frame = Message::request(id.clone(), method.clone(), params);

		let mut req = self
			.http
			.post(&self.base_url)
			.headers(self.headers.clone())
			.header("content-type", "application/json")
			.header("accept", "application/json, text/event-stream")
			.json(&frame.to_value());
		if let Some(sid) = self.session_id.read().expect("session id read lock").clone() {
			req = req.header("mcp-session-id", sid);
		}

		let resp = tokio::time::timeout(deadline, req.send())
			.await
			.map_err(|_| GatewayError::UpstreamTimeout(self.slug.clone()))?
			.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))?;

		if let Some(sid) = resp.headers().get("mcp-session-id") {
			if let Ok(sid) = sid.to_str() {
				*self.session_id.write().expect("session id write lock") = Some(sid.to_string());
			}
		}

		let content_type = resp
			.headers()
			.get(reqwest::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or("")
			.to_string();

		if !resp.status().is_success() {
			let status = resp.status();
			return Err(GatewayError::UpstreamUnreachable(
				self.slug.clone(),
				format!("http {status}"),
			));
		}

		if content_type.starts_with("text/event-stream") {
			self.read_sse_response(resp, &id).await
		} else {
			let body = resp
				.bytes()
				.await
				.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))?;
			Message::from_value(serde_json::from_slice(&body).map_err(|e| {
				GatewayError::UpstreamUnreachable(self.slug.clone(), format!("bad body: {e}"))
			})?)
			.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))
		}
	}

	/// Reads one SSE-upgraded POST response: the first event carrying our
	/// response, any interleaved notifications re-emitted to subscribers.
	async fn read_sse_response(
		&self,
		resp: reqwest::Response,
		awaited_id: &Id,
	) -> Result<Message, GatewayError> {
		let mut stream = resp.bytes_stream();
		let mut decoder = SseDecoder::new();
		while let Some(chunk) = stream.next().await {
			let chunk = chunk.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))?;
			decoder.push(&chunk);
			while let Some(event) = decoder.pop_event() {
				let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) else {
					continue;
				};
				let Ok(msg) = Message::from_value(value) else {
					continue;
				};
				match &msg {
					Message::Response { id, .. } if id == awaited_id => return Ok(msg),
					Message::Notification { .. } => {
						let _ = self.notifications.send(msg);
					},
					_ => {},
				}
			}
		}
		Err(GatewayError::UpstreamUnreachable(
			self.slug.clone(),
			"stream ended before response".to_string(),
		))
	}

	/// Opens a standalone server-push listener (legacy `/sse` GET, or the
	/// streamable transport's `GET /mcp`) that re-emits out-of-band
	/// notifications. Reconnects with backoff on disconnect (spec §4.4).
	pub fn start_listener(self: &Arc<Self>) {
		let this = self.clone();
		let guard_slot = this.listener.try_lock();
		if let Ok(mut guard) = guard_slot {
			if guard.is_some() {
				return;
			}
			let handle = tokio::spawn(async move {
				let mut backoff = Backoff::default_policy();
				loop {
					if this.closed.load(Ordering::SeqCst) {
						return;
					}
					match this.listen_once().await {
						Ok(()) => backoff.reset(),
						Err(e) => {
							warn!(slug = %this.slug, error = %e, "upstream listener disconnected, reconnecting");
						},
					}
					if this.closed.load(Ordering::SeqCst) {
						return;
					}
					tokio::time::sleep(backoff.next_delay()).await;
				}
			});
			*guard = Some(handle);
		}
	}

	async fn listen_once(&self) -> Result<(), GatewayError> {
		let mut req = self
			.http
			.get(&self.base_url)
			.headers(self.headers.clone())
			.header("accept", "text/event-stream");
		if let Some(sid) = self.session_id.read().expect("session id read lock").clone() {
			req = req.header("mcp-session-id", sid);
		}
		let resp = req
			.send()
			.await
			.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))?;
		if !resp.status().is_success() {
			return Err(GatewayError::UpstreamUnreachable(
				self.slug.clone(),
				format!("http {}", resp.status()),
			));
		}
		let mut stream = resp.bytes_stream();
		let mut decoder = SseDecoder::new();
		while let Some(chunk) = stream.next().await {
			let chunk = chunk.map_err(|e| GatewayError::UpstreamUnreachable(self.slug.clone(), e.to_string()))?;
			decoder.push(&chunk);
			while let Some(event) = decoder.pop_event() {
				if let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) {
					if let Ok(msg @ Message::Notification { .. }) = Message::from_value(value) {
						let _ = self.notifications.send(msg);
					}
				}
			}
		}
		Ok(())
	}

	pub async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		if let Some(handle) = self.listener.lock().await.take() {
			handle.abort();
		}
	}
}

pub struct UpstreamClient {
	http: reqwest::Client,
}

impl Default for UpstreamClient {
	fn default() -> Self {
		Self::new()
	}
}

impl UpstreamClient {
	pub fn new() -> Self {
		Self {
			http: reqwest::Client::builder()
				.build()
				.expect("reqwest client builds"),
		}
	}

	/// Performs the SSE/streamable handshake and `initialize` call, per
	/// spec §4.4: "On open, the client performs the SSE handshake ..., runs
	/// `initialize`, and transitions to `Ready`."
	pub async fn open(
		&self,
		backend: Backend,
		extra_headers: HashMap<String, String>,
		handshake_deadline: Duration,
	) -> Result<Arc<UpstreamSession>, GatewayError> {
		let mut headers = HeaderMap::new();
		if let Some(bearer) = &backend.bearer {
			headers.insert(
				reqwest::header::AUTHORIZATION,
				HeaderValue::from_str(&format!("Bearer {bearer}"))
					.map_err(|e| GatewayError::Internal(e.to_string()))?,
			);
		}
		for (k, v) in extra_headers {
			if let (Ok(name), Ok(value)) = (HeaderName::try_from(k), HeaderValue::from_str(&v)) {
				headers.insert(name, value);
			}
		}

		let (tx, _rx) = broadcast::channel(64);
		let session = Arc::new(UpstreamSession {
			slug: backend.slug.clone(),
			base_url: backend.url.clone(),
			headers,
			http: self.http.clone(),
			transport: backend.transport,
			next_id: AtomicI64::new(1),
			closed: AtomicBool::new(false),
			session_id: RwLock::new(None),
			notifications: tx,
			listener: tokio::sync::Mutex::new(None),
		});

		let init_params = serde_json::json!({
			"protocolVersion": "2025-06-18",
			"capabilities": {},
			"clientInfo": { "name": "aip-gateway", "version": env!("CARGO_PKG_VERSION") },
		});
		let resp = session
			.send_request("initialize", init_params, handshake_deadline)
			.await
			.map_err(|e| GatewayError::UpstreamHandshakeFailed(backend.slug.clone(), e.to_string()))?;
		if let Message::Response { error: Some(e), .. } = resp {
			return Err(GatewayError::UpstreamHandshakeFailed(backend.slug.clone(), e.message));
		}
		session
			.send_notification("notifications/initialized", serde_json::Value::Null)
			.await;

		debug!(slug = %backend.slug, "upstream session ready");
		session.start_listener();
		Ok(session)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn alloc_id_is_monotonic_and_unique() {
		let (tx, _rx) = broadcast::channel(1);
		let session = UpstreamSession {
			slug: "a".into(),
			base_url: "http://example".into(),
			headers: HeaderMap::new(),
			http: reqwest::Client::new(),
			transport: UpstreamTransport::Streamable,
			next_id: AtomicI64::new(1),
			closed: AtomicBool::new(false),
			session_id: RwLock::new(None),
			notifications: tx,
			listener: tokio::sync::Mutex::new(None),
		};
		let a = session.alloc_id();
		let b = session.alloc_id();
		assert_ne!(a, b);
	}
}

//! Transport Layer (spec §4.3): the HTTP surface carrying the Session Core
//! over two wire forms, plus discovery, status, and A2A endpoints.

mod discovery;
mod legacy;
mod streamable;
pub mod tls;

use crate::auth::resolve_user;
use crate::config::Config;
use crate::gateway::Relay;
use crate::session::{PeerRole, Session, SessionManager};
use crate::sse::SseEvent;
use crate::upstream::UpstreamClient;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Keep-alive cadence for idle SSE connections (spec §5 Timeouts: "Keep-alive
/// on SSE every 15 s").
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Total discovery budget, including the per-probe handshake deadline below
/// (spec §5 Timeouts).
pub const DISCOVERY_TOTAL_DEADLINE: Duration = Duration::from_secs(15);
pub const DISCOVERY_PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Bounded replay ring for one session's server-originated events, keyed by a
/// per-session monotonic id (spec §4.3 "Reconnection ... bounded ring per
/// session; overflow ⇒ session invalidated").
pub struct EventBuffer {
	capacity: usize,
	next_id: u64,
	events: VecDeque<(u64, SseEvent)>,
}

impl EventBuffer {
	fn new(capacity: usize) -> Self {
		Self {
			capacity,
			next_id: 1,
			events: VecDeque::with_capacity(capacity),
		}
	}

	fn push(&mut self, mut event: SseEvent) -> SseEvent {
		let id = self.next_id;
		self.next_id += 1;
		event.id = Some(id);
		self.events.push_back((id, event.clone()));
		if self.events.len() > self.capacity {
			self.events.pop_front();
		}
		event
	}

	/// Events strictly after `last_event_id`, in order. Returns `None` if the
	/// oldest buffered id is already past `last_event_id + 1` (overflow: the
	/// caller's cursor has fallen out of the ring).
	fn replay_since(&self, last_event_id: u64) -> Option<Vec<SseEvent>> {
		if let Some((oldest, _)) = self.events.front() {
			if *oldest > last_event_id + 1 {
				return None;
			}
		}
		Some(
			self
				.events
				.iter()
				.filter(|(id, _)| *id > last_event_id)
				.map(|(_, e)| e.clone())
				.collect(),
		)
	}
}

/// Per-transport-session bookkeeping the HTTP layer needs beyond what
/// `Session` itself tracks: the relay it fans out through, the receiving
/// half of its output channel (taken by the first SSE consumer to attach),
/// and its replay buffer.
struct SessionChannel {
	relay: Arc<Relay>,
	output_rx: tokio::sync::Mutex<Option<mpsc::Receiver<crate::message::Message>>>,
	buffer: tokio::sync::Mutex<EventBuffer>,
}

pub struct GatewayState {
	pub config: Arc<dyn Config>,
	pub sessions: Arc<SessionManager>,
	pub input_processor: Arc<crate::session::InputProcessor>,
	pub upstream_client: Arc<UpstreamClient>,
	channels: RwLock<HashMap<Arc<str>, Arc<SessionChannel>>>,
	pub a2a: Arc<crate::a2a::A2aState>,
}

impl GatewayState {
	pub fn new(config: Arc<dyn Config>, registry: crate::session::CapabilityRegistry) -> Arc<Self> {
		Arc::new(Self {
			config,
			sessions: Arc::new(SessionManager::new()),
			input_processor: Arc::new(crate::session::InputProcessor::new(registry)),
			upstream_client: Arc::new(UpstreamClient::new()),
			channels: RwLock::new(HashMap::new()),
			a2a: Arc::new(crate::a2a::A2aState::new()),
		})
	}

	/// Creates a fresh session plus its relay and bookkeeping channel,
	/// optionally identified by `user_id` resolved from the request's bearer.
	fn create_session(self: &Arc<Self>, user_id: Option<String>) -> Arc<Session> {
		let (tx, rx) = mpsc::channel(256);
		let session = Session::new(PeerRole::ClientOf, tx);
		if let Some(uid) = &user_id {
			*session.user_id.write().expect("user id write lock") = Some(uid.clone());
		}
		let relay = Arc::new(Relay::new(
			user_id.unwrap_or_default(),
			session.clone(),
			self.config.clone(),
			self.upstream_client.clone(),
		));
		let channel = Arc::new(SessionChannel {
			relay,
			output_rx: tokio::sync::Mutex::new(Some(rx)),
			buffer: tokio::sync::Mutex::new(EventBuffer::new(256)),
		});
		self
			.channels
			.write()
			.expect("channels write lock")
			.insert(session.id.clone(), channel);
		self.sessions.insert(session.clone());
		session
	}

	fn channel_for(&self, session_id: &str) -> Option<Arc<SessionChannel>> {
		self.channels.read().expect("channels read lock").get(session_id).cloned()
	}

	async fn close_session(&self, session_id: &str) {
		if let Some(session) = self.sessions.remove(session_id) {
			let _ = session; // SessionManager::remove already closed it
		}
		if let Some(channel) = self.channels.write().expect("channels write lock").remove(session_id) {
			channel.relay.close().await;
		}
	}

	fn bearer_from(headers: &HeaderMap, query_bearer: Option<&str>) -> Option<String> {
		if let Some(q) = query_bearer {
			return Some(q.to_string());
		}
		headers
			.get(axum::http::header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.strip_prefix("Bearer "))
			.map(str::to_string)
	}
}

pub fn router(state: Arc<GatewayState>) -> Router {
	Router::new()
		.route("/mcp", post(streamable::handle_post).get(streamable::handle_get).delete(streamable::handle_delete))
		.route("/sse", get(legacy::handle_get))
		.route("/message", post(legacy::handle_post))
		.route("/a2a", post(crate::a2a::handlers::handle))
		.route("/.well-known/agent.json", get(crate::a2a::agent_card))
		.route("/status", get(status))
		.route("/discovering", get(discovery::handle))
		.fallback(frontend_fallback)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}

/// `GET /status`: liveness plus the config backend's own health, per spec
/// §4.3. The process is alive as long as this handler runs at all; the
/// config backend's reachability is reported separately so a monitoring
/// probe can distinguish "gateway down" from "gateway up, config stale".
async fn status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
	let config_status = match state.config.health() {
		Ok(()) => serde_json::json!({ "ok": true }),
		Err(e) => serde_json::json!({ "ok": false, "error": e }),
	};
	axum::Json(serde_json::json!({
		"status": "ok",
		"sessions": state.sessions.len(),
		"listenAddr": state.config.listen_addr(),
		"config": config_status,
	}))
}

/// Reverse-proxies `/` and any otherwise-unmatched path to the configured
/// frontend, per spec §4.3 "Optional reverse-proxy to a frontend for `/` and
/// unmatched paths." With no `frontend_url` configured, unmatched paths just
/// 404 as they would without this route.
async fn frontend_fallback(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
	let Some(base) = state.config.frontend_url() else {
		return StatusCode::NOT_FOUND.into_response();
	};
	let path_and_query = req
		.uri()
		.path_and_query()
		.map(|p| p.as_str())
		.unwrap_or("/");
	let target = format!("{}{}", base.trim_end_matches('/'), path_and_query);
	let method = req.method().clone();
	let headers = req.headers().clone();
	let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
		Ok(b) => b,
		Err(e) => {
			warn!(error = %e, "failed to buffer request body for frontend proxy");
			return StatusCode::BAD_GATEWAY.into_response();
		},
	};

	let client = reqwest::Client::new();
	let mut upstream_req = client.request(method, &target);
	for (name, value) in headers.iter() {
		if name == axum::http::header::HOST {
			continue;
		}
		upstream_req = upstream_req.header(name.clone(), value.clone());
	}
	let upstream_req = upstream_req.body(body);

	match upstream_req.send().await {
		Ok(resp) => {
			let status = resp.status();
			let headers = resp.headers().clone();
			let body = resp.bytes().await.unwrap_or_default();
			let mut out = (status, body).into_response();
			*out.headers_mut() = headers;
			out
		},
		Err(e) => {
			warn!(error = %e, target, "frontend proxy upstream unreachable");
			StatusCode::BAD_GATEWAY.into_response()
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_event(data: &str) -> SseEvent {
		SseEvent { id: None, event: Some("message".to_string()), data: data.to_string() }
	}

	#[test]
	fn replay_returns_events_strictly_after_cursor() {
		let mut buf = EventBuffer::new(10);
		buf.push(sample_event("a"));
		buf.push(sample_event("b"));
		buf.push(sample_event("c"));
		let replayed = buf.replay_since(1).unwrap();
		assert_eq!(replayed.len(), 2);
		assert_eq!(replayed[0].data, "b");
		assert_eq!(replayed[1].data, "c");
	}

	#[test]
	fn replay_detects_overflow_past_the_ring() {
		let mut buf = EventBuffer::new(2);
		for i in 0..5 {
			buf.push(sample_event(&i.to_string()));
		}
		// ids 1..3 have fallen out of a capacity-2 ring; asking for anything
		// older than the oldest surviving id minus one must report overflow.
		assert!(buf.replay_since(0).is_none());
	}

	#[test]
	fn replay_within_ring_preserves_order() {
		let mut buf = EventBuffer::new(5);
		for i in 0..5 {
			buf.push(sample_event(&i.to_string()));
		}
		let replayed = buf.replay_since(3).unwrap();
		assert_eq!(replayed.len(), 2);
		assert_eq!(replayed[0].data, "3");
		assert_eq!(replayed[1].data, "4");
	}

	use crate::config::{AuthType, Backend, Config, TlsConfig};
	use crate::session::CapabilityRegistry;
	use axum::body::Body;
	use axum::http::Request as HttpRequest;
	use tower::ServiceExt;

	#[derive(Debug)]
	struct TestConfig {
		frontend_url: Option<String>,
	}

	impl Config for TestConfig {
		fn listen_addr(&self) -> String {
			"127.0.0.1:0".to_string()
		}
		fn auth_type(&self) -> AuthType {
			AuthType::None
		}
		fn user_by_key_hash(&self, _hash: &str) -> Option<String> {
			None
		}
		fn user_params(&self, _user_id: &str) -> HashMap<String, String> {
			HashMap::new()
		}
		fn subscriptions(&self, _user_id: &str) -> Vec<String> {
			Vec::new()
		}
		fn backend_by_slug(&self, _slug: &str) -> Option<Backend> {
			None
		}
		fn server_headers(&self, _slug: &str) -> HashMap<String, String> {
			HashMap::new()
		}
		fn subscription_headers(&self, _user_id: &str, _slug: &str) -> HashMap<String, String> {
			HashMap::new()
		}
		fn tls(&self) -> TlsConfig {
			TlsConfig::default()
		}
		fn frontend_url(&self) -> Option<String> {
			self.frontend_url.clone()
		}
	}

	fn test_app(frontend_url: Option<String>) -> Router {
		let config: Arc<dyn Config> = Arc::new(TestConfig { frontend_url });
		let state = GatewayState::new(config, CapabilityRegistry::default());
		router(state)
	}

	#[tokio::test]
	async fn status_reports_ok_and_config_health() {
		let app = test_app(None);
		let resp = app
			.oneshot(HttpRequest::builder().uri("/status").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
		let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(v["status"], "ok");
		assert_eq!(v["config"]["ok"], true);
	}

	#[tokio::test]
	async fn unmatched_path_without_frontend_is_not_found() {
		let app = test_app(None);
		let resp = app
			.oneshot(HttpRequest::builder().uri("/nowhere").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);
	}
}

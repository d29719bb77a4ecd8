//! Gateway Fan-out Engine (spec §4.2). Turns one downstream MCP request into
//! 0..N upstream requests across the caller's subscribed backends and merges
//! the results back under the original downstream id.

mod merge;

pub use merge::{Contribution, merge_initialize, merge_list, parse_prefixed_name};

use crate::config::Config;
use crate::error::GatewayError;
use crate::message::Message;
use crate::session::Session;
use crate::upstream::{UpstreamClient, UpstreamSession};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Default fan-out deadline (spec §5 Timeouts): bounded by the downstream
/// caller's own deadline when one is supplied.
pub const DEFAULT_FANOUT_DEADLINE: Duration = Duration::from_secs(10);
pub const UPSTREAM_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);

/// One downstream session's view of its subscribed backends: lazily opened,
/// cached upstream sessions keyed by backend slug (spec §4.2 "Per-session
/// bookkeeping").
pub struct Relay {
	pub user_id: String,
	pub downstream_session_id: Arc<str>,
	downstream: Arc<Session>,
	config: Arc<dyn Config>,
	upstream_client: Arc<UpstreamClient>,
	upstreams: RwLock<HashMap<String, Arc<UpstreamSession>>>,
}

impl Relay {
	pub fn new(
		user_id: String,
		downstream: Arc<Session>,
		config: Arc<dyn Config>,
		upstream_client: Arc<UpstreamClient>,
	) -> Self {
		Self {
			user_id,
			downstream_session_id: downstream.id.clone(),
			downstream,
			config,
			upstream_client,
			upstreams: RwLock::new(HashMap::new()),
		}
	}

	pub fn subscribed_slugs(&self) -> Vec<String> {
		self.config.subscriptions(&self.user_id)
	}

	/// Lazily opens (and caches) the upstream session for `slug`, performing
	/// the `initialize` handshake on first use, and spawns the task that
	/// re-emits this backend's out-of-band notifications downstream (spec
	/// §4.2 method policy table: "notifications from upstream ... re-emit
	/// downstream, URI re-prefixed").
	async fn upstream_for(&self, slug: &str) -> Result<Arc<UpstreamSession>, GatewayError> {
		if let Some(s) = self.upstreams.read().expect("upstreams read lock").get(slug) {
			return Ok(s.clone());
		}
		let backend = self
			.config
			.backend_by_slug(slug)
			.ok_or_else(|| GatewayError::BackendNotFound(slug.to_string()))?;
		let mut headers = self.config.server_headers(slug);
		headers.extend(self.config.subscription_headers(&self.user_id, slug));
		let session = self
			.upstream_client
			.open(backend, headers, UPSTREAM_HANDSHAKE_DEADLINE)
			.await?;
		self
			.upstreams
			.write()
			.expect("upstreams write lock")
			.insert(slug.to_string(), session.clone());
		spawn_notification_relay(slug.to_string(), session.clone(), self.downstream.clone());
		Ok(session)
	}

	/// Opens (best-effort) every subscribed backend's upstream session in the
	/// background. A backend that fails to open simply contributes nothing
	/// to fan-outs until it's needed for a single-target call (spec §4.2).
	pub async fn warm_all(&self) {
		let slugs = self.subscribed_slugs();
		let futs = slugs.into_iter().map(|slug| {
			let this_slug = slug.clone();
			async move {
				if let Err(e) = self.upstream_for(&slug).await {
					warn!(slug = %this_slug, error = %e, "lazy upstream open failed, will retry on demand");
				}
			}
		});
		join_all(futs).await;
	}

	/// Fans `method` out to every subscribed backend in parallel, bounded by
	/// `deadline`; slow backends don't block fast ones, and at the deadline
	/// any still-pending upstreams are dropped from the merge entirely
	/// (spec §4.2 Backpressure & timeouts).
	pub async fn fanout_list(
		&self,
		method: &str,
		params: serde_json::Value,
		deadline: Duration,
	) -> Vec<Contribution> {
		let slugs = self.subscribed_slugs();
		let futs = slugs.into_iter().map(|slug| {
			let method = method.to_string();
			let params = params.clone();
			async move {
				let result = match self.upstream_for(&slug).await {
					Ok(session) => session
						.send_request(method, params, deadline)
						.await
						.map(|m| match m {
							Message::Response { result: Some(v), .. } => v,
							_ => serde_json::Value::Null,
						}),
					Err(e) => Err(e),
				};
				Contribution { slug, result }
			}
		});

		// Each per-backend future is already bounded by `deadline` (the lazy
		// open by its own handshake deadline, the request by `send_request`'s
		// own timeout), so every future here resolves on its own without an
		// outer race: wrapping this join_all in a second `tokio::time::timeout`
		// would risk discarding backends that finished just as it fired,
		// rather than merely omitting ones still pending (spec §4.2
		// Backpressure & timeouts — slow backends are individually dropped,
		// not the whole merge).
		let results = join_all(futs).await;
		if results.iter().any(|c| c.result.is_err()) {
			info!(method, "fan-out completed with at least one backend error contribution");
		}
		results
	}

	/// Routes a call-style method (`tools/call`, `prompts/get`,
	/// `resources/read`, `resources/subscribe`, `resources/unsubscribe`) to
	/// the single backend whose slug prefixes the target name/uri. Errors
	/// propagate unchanged, unlike list-style partial failure (spec §4.2).
	pub async fn route_single(
		&self,
		method: &str,
		slug: &str,
		unprefixed_params: serde_json::Value,
		deadline: Duration,
	) -> Result<serde_json::Value, GatewayError> {
		let session = self.upstream_for(slug).await?;
		match session.send_request(method, unprefixed_params, deadline).await? {
			Message::Response { result: Some(v), .. } => Ok(v),
			Message::Response { error: Some(e), .. } => {
				Err(GatewayError::UpstreamError(slug.to_string(), e))
			},
			_ => Ok(serde_json::Value::Null),
		}
	}

	/// Closes every upstream session this relay opened, e.g. on downstream
	/// session close (spec §5 Cancellation: "all fan-out children are
	/// canceled").
	pub async fn close(&self) {
		let sessions: Vec<_> = self
			.upstreams
			.write()
			.expect("upstreams write lock")
			.drain()
			.map(|(_, v)| v)
			.collect();
		for s in sessions {
			s.close().await;
		}
	}

	pub fn open_backend_count(&self) -> usize {
		self.upstreams.read().expect("upstreams read lock").len()
	}
}

/// Subscribes to one upstream's notification channel and forwards every
/// notification to the downstream session, re-prefixing a `uri` field in
/// `params` (if present) with the backend's slug so the downstream side can
/// route a later `resources/read` back to the right backend (spec §4.2
/// method policy table).
fn spawn_notification_relay(slug: String, upstream: Arc<UpstreamSession>, downstream: Arc<Session>) {
	let mut rx = upstream.notifications.subscribe();
	tokio::spawn(async move {
		loop {
			match rx.recv().await {
				Ok(Message::Notification { method, mut params }) => {
					if let Some(uri) = params.get("uri").and_then(|v| v.as_str()) {
						let prefixed = format!("{slug}_{uri}");
						if let Some(obj) = params.as_object_mut() {
							obj.insert("uri".to_string(), serde_json::Value::String(prefixed));
						}
					}
					downstream.emit(Message::Notification { method, params }).await;
				},
				Ok(_) => {},
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	});
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;

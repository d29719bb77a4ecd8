//! Wires one inbound raw frame through parsing, auth, the `NotInitialized`
//! gate, and method routing, producing the outbound frame (if any) a
//! transport should write back (spec §4.1 `processInput`).

use crate::auth::check as check_auth;
use crate::config::{AuthType, Config};
use crate::error::GatewayError;
use crate::gateway::Relay;
use crate::message::{Id, Message};
use crate::router::route;
use crate::session::dispatch;
use crate::session::{InputProcessor, Session, SessionStatus};
use std::sync::Arc;

/// Runs one raw inbound frame to completion. Returns `Some(frame)` when a
/// reply must be written back (request handling, or an error response for a
/// malformed frame); `None` for notifications and successfully-resolved
/// responses, which produce no outbound traffic of their own.
pub async fn process_input(
	session: &Arc<Session>,
	processor: &InputProcessor,
	relay: &Arc<Relay>,
	config: &dyn Config,
	raw: &[u8],
) -> Option<Message> {
	let message = match Message::parse(raw) {
		Ok(m) => m,
		Err(_) => return Some(dispatch::InputProcessor::malformed_response()),
	};

	match message {
		Message::Response { id, result, error } => {
			session.resolve_pending(&id, Message::Response { id: id.clone(), result, error });
			None
		},
		Message::Notification { method, params } => {
			let _ = handle_call(session, processor, relay, config, None, &method, params).await;
			None
		},
		Message::Request { id, method, params } => {
			match handle_call(session, processor, relay, config, Some(&id), &method, params).await {
				Ok(result) => Some(Message::response_ok(id, result)),
				Err(e) => Some(Message::response_err(id, e.to_rpc_error())),
			}
		},
	}
}

async fn handle_call(
	session: &Arc<Session>,
	processor: &InputProcessor,
	relay: &Arc<Relay>,
	config: &dyn Config,
	_id: Option<&Id>,
	method: &str,
	params: serde_json::Value,
) -> Result<serde_json::Value, GatewayError> {
	let user_id = session.user_id.read().expect("user id read lock").clone();
	check_auth(config.auth_type(), user_id.as_deref(), method)?;

	if session.status() != SessionStatus::Ready && method != "initialize" && method != "ping" {
		return Err(GatewayError::NotInitialized);
	}

	let protocol_version = session
		.protocol_version
		.read()
		.expect("protocol version read lock")
		.clone()
		.unwrap_or_default();

	let result = route(processor, relay, config, &protocol_version, method, params).await?;

	if method == "initialize" {
		if let Some(v) = result.get("protocolVersion").and_then(|v| v.as_str()) {
			*session.protocol_version.write().expect("protocol version write lock") = Some(v.to_string());
		}
		session.set_status(SessionStatus::Ready);
	}

	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{Backend, Config, TlsConfig};
	use crate::session::PeerRole;
	use std::collections::HashMap;
	use tokio::sync::mpsc;

	#[derive(Debug)]
	struct OpenConfig;

	impl Config for OpenConfig {
		fn listen_addr(&self) -> String {
			"127.0.0.1:0".into()
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
			None
		}
	}

	fn test_harness() -> (Arc<Session>, InputProcessor, Arc<Relay>, OpenConfig) {
		let (tx, _rx) = mpsc::channel(8);
		let session = Session::new(PeerRole::ClientOf, tx);
		let mut registry = crate::session::capability::CapabilityRegistry::default();
		registry.register(crate::session::Capability::new(Arc::new(crate::session::capability::PingCapability)));
		let processor = InputProcessor::new(registry);
		let config: Arc<dyn Config> = Arc::new(OpenConfig);
		let relay = Arc::new(Relay::new(
			"anon".to_string(),
			session.clone(),
			config,
			Arc::new(crate::upstream::UpstreamClient::new()),
		));
		(session, processor, relay, OpenConfig)
	}

	#[tokio::test]
	async fn rejects_non_initialize_before_ready() {
		let (session, processor, relay, config) = test_harness();
		let raw = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
		let reply = process_input(&session, &processor, &relay, &config, raw).await.unwrap();
		match reply {
			Message::Response { error: Some(e), .. } => assert_eq!(e.code, crate::message::code::NOT_INITIALIZED),
			other => panic!("expected NotInitialized error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn ping_bypasses_not_initialized_gate() {
		let (session, processor, relay, config) = test_harness();
		let raw = br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#;
		let reply = process_input(&session, &processor, &relay, &config, raw).await.unwrap();
		assert!(matches!(reply, Message::Response { result: Some(_), .. }));
	}

	#[tokio::test]
	async fn initialize_promotes_session_to_ready() {
		let (session, processor, relay, config) = test_harness();
		let raw = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#;
		let _ = process_input(&session, &processor, &relay, &config, raw).await;
		assert_eq!(session.status(), SessionStatus::Ready);
	}

	#[tokio::test]
	async fn malformed_frame_gets_id_null_invalid_request() {
		let (session, processor, relay, config) = test_harness();
		let raw = br#"{"jsonrpc":"2.0"}"#;
		let reply = process_input(&session, &processor, &relay, &config, raw).await.unwrap();
		match reply {
			Message::Response { id, error: Some(e), .. } => {
				assert_eq!(id, Id::Null);
				assert_eq!(e.code, crate::message::code::INVALID_REQUEST);
			},
			other => panic!("expected malformed response, got {other:?}"),
		}
	}
}

use super::*;
use crate::config::{AuthType, Backend, Config, TlsConfig};
use crate::session::{PeerRole, Session};
use std::collections::HashMap;

#[derive(Debug)]
struct MockConfig {
	backends: HashMap<String, Backend>,
	subs: Vec<String>,
}

impl Config for MockConfig {
	fn listen_addr(&self) -> String {
		"127.0.0.1:0".to_string()
	}
	fn auth_type(&self) -> AuthType {
		AuthType::None
	}
	fn user_by_key_hash(&self, _hash: &str) -> Option<String> {
		Some("alice".to_string())
	}
	fn user_params(&self, _user_id: &str) -> HashMap<String, String> {
		HashMap::new()
	}
	fn subscriptions(&self, _user_id: &str) -> Vec<String> {
		self.subs.clone()
	}
	fn backend_by_slug(&self, slug: &str) -> Option<Backend> {
		self.backends.get(slug).cloned()
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

fn mock_relay(subs: Vec<&str>) -> Relay {
	let backends = subs
		.iter()
		.map(|s| {
			(
				s.to_string(),
				Backend {
					slug: s.to_string(),
					url: format!("http://{s}.invalid/mcp"),
					bearer: None,
					headers: HashMap::new(),
					subscription_headers: HashMap::new(),
					transport: crate::config::UpstreamTransport::Streamable,
				},
			)
		})
		.collect();
	let config: Arc<dyn Config> = Arc::new(MockConfig {
		backends,
		subs: subs.into_iter().map(String::from).collect(),
	});
	let (tx, _rx) = tokio::sync::mpsc::channel(8);
	let session = Session::new(PeerRole::ClientOf, tx);
	Relay::new(
		"alice".to_string(),
		session,
		config,
		Arc::new(UpstreamClient::new()),
	)
}

#[test]
fn subscribed_slugs_reflects_config() {
	let relay = mock_relay(vec!["a", "b"]);
	assert_eq!(relay.subscribed_slugs(), vec!["a", "b"]);
}

#[tokio::test]
async fn fanout_over_no_subscriptions_is_immediately_empty() {
	let relay = mock_relay(vec![]);
	let contributions = relay
		.fanout_list("tools/list", serde_json::Value::Null, Duration::from_millis(50))
		.await;
	assert!(contributions.is_empty());
}

#[tokio::test]
async fn fanout_to_unreachable_backend_yields_error_contribution_not_panic() {
	let relay = mock_relay(vec!["dead"]);
	let contributions = relay
		.fanout_list("tools/list", serde_json::Value::Null, Duration::from_millis(200))
		.await;
	assert_eq!(contributions.len(), 1);
	assert_eq!(contributions[0].slug, "dead");
	assert!(contributions[0].result.is_err());
}

#[tokio::test]
async fn route_single_to_unknown_slug_errors_backend_not_found() {
	let relay = mock_relay(vec!["a"]);
	let err = relay
		.route_single("tools/call", "missing", serde_json::Value::Null, Duration::from_millis(50))
		.await
		.unwrap_err();
	assert!(matches!(err, GatewayError::BackendNotFound(_)));
}

#[tokio::test]
async fn close_drains_open_backend_count_to_zero() {
	let relay = mock_relay(vec![]);
	relay.close().await;
	assert_eq!(relay.open_backend_count(), 0);
}

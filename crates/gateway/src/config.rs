//! The narrow `Config` interface the core consumes (spec §6). The
//! management portal — user/server/subscription CRUD, its ORM, its web UI —
//! is an external collaborator; this core only ever reads through this
//! trait. `StaticConfig` is the one concrete, file-backed implementation
//! shipped here so the gateway can run standalone.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
	/// Every request (except `ping`) must resolve to a known user.
	#[default]
	UsersOnly,
	/// Only methods marked as requiring auth are checked.
	MarkedMethods,
	/// No authentication at all.
	None,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub enum UpstreamTransport {
	#[serde(rename = "sse")]
	Sse,
	#[serde(rename = "streamable")]
	Streamable,
}

impl Default for UpstreamTransport {
	fn default() -> Self {
		UpstreamTransport::Streamable
	}
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Backend {
	pub slug: String,
	pub url: String,
	#[serde(default)]
	pub bearer: Option<String>,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default)]
	pub subscription_headers: HashMap<String, HashMap<String, String>>,
	#[serde(default)]
	pub transport: UpstreamTransport,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, Default)]
pub struct TlsConfig {
	#[serde(default)]
	pub mode: TlsMode,
	#[serde(default)]
	pub cert_path: Option<String>,
	#[serde(default)]
	pub key_path: Option<String>,
	#[serde(default)]
	pub acme_domains: Vec<String>,
	#[serde(default)]
	pub acme_email: Option<String>,
	#[serde(default)]
	pub acme_cache_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
	#[default]
	Disabled,
	Manual,
	Acme,
}

/// The interface the core consumes; `spec.md` §6.
pub trait Config: Send + Sync + std::fmt::Debug {
	fn listen_addr(&self) -> String;
	fn auth_type(&self) -> AuthType;
	/// Looks up a user by the SHA-256 hex hash of their API key.
	fn user_by_key_hash(&self, hash: &str) -> Option<String>;
	fn user_params(&self, user_id: &str) -> HashMap<String, String>;
	fn subscriptions(&self, user_id: &str) -> Vec<String>;
	fn backend_by_slug(&self, slug: &str) -> Option<Backend>;
	fn server_headers(&self, slug: &str) -> HashMap<String, String>;
	fn subscription_headers(&self, user_id: &str, slug: &str) -> HashMap<String, String>;
	fn tls(&self) -> TlsConfig;
	fn frontend_url(&self) -> Option<String>;

	/// Cheap reachability check for `GET /status` ("liveness + config backend
	/// ok/error", spec §4.3). The default is `Ok`; a `Config` backed by a
	/// remote store (the portal's, out of scope here) would probe it.
	fn health(&self) -> Result<(), String> {
		Ok(())
	}
}

pub fn hash_key(plaintext: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(plaintext.as_bytes());
	hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
	key_hash: String,
	id: String,
	#[serde(default)]
	params: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStaticConfig {
	listen: String,
	#[serde(default)]
	auth_type: AuthType,
	#[serde(default)]
	users: Vec<RawUser>,
	#[serde(default)]
	subscriptions: HashMap<String, Vec<String>>,
	#[serde(default)]
	backends: HashMap<String, Backend>,
	#[serde(default)]
	tls: TlsConfig,
	#[serde(default)]
	frontend_url: Option<String>,
}

/// A `serde_yaml`-backed snapshot of the whole config surface, loaded once at
/// startup. Reloadable via [`StaticConfig::reload`] (e.g. on SIGHUP).
#[derive(Debug)]
pub struct StaticConfig {
	inner: RwLock<RawStaticConfig>,
}

impl StaticConfig {
	pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
		let raw: RawStaticConfig = serde_yaml::from_str(contents)?;
		Ok(Self {
			inner: RwLock::new(raw),
		})
	}

	pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
		let contents = std::fs::read_to_string(path)?;
		Self::from_yaml(&contents)
	}

	pub fn reload(&self, contents: &str) -> anyhow::Result<()> {
		let raw: RawStaticConfig = serde_yaml::from_str(contents)?;
		*self.inner.write().expect("config write lock") = raw;
		Ok(())
	}
}

impl Config for StaticConfig {
	fn listen_addr(&self) -> String {
		self.inner.read().expect("config read lock").listen.clone()
	}

	fn auth_type(&self) -> AuthType {
		self.inner.read().expect("config read lock").auth_type
	}

	fn user_by_key_hash(&self, hash: &str) -> Option<String> {
		self
			.inner
			.read()
			.expect("config read lock")
			.users
			.iter()
			.find(|u| u.key_hash == hash)
			.map(|u| u.id.clone())
	}

	fn user_params(&self, user_id: &str) -> HashMap<String, String> {
		self
			.inner
			.read()
			.expect("config read lock")
			.users
			.iter()
			.find(|u| u.id == user_id)
			.map(|u| u.params.clone())
			.unwrap_or_default()
	}

	fn subscriptions(&self, user_id: &str) -> Vec<String> {
		self
			.inner
			.read()
			.expect("config read lock")
			.subscriptions
			.get(user_id)
			.cloned()
			.unwrap_or_default()
	}

	fn backend_by_slug(&self, slug: &str) -> Option<Backend> {
		self
			.inner
			.read()
			.expect("config read lock")
			.backends
			.get(slug)
			.cloned()
	}

	fn server_headers(&self, slug: &str) -> HashMap<String, String> {
		self
			.backend_by_slug(slug)
			.map(|b| b.headers)
			.unwrap_or_default()
	}

	fn subscription_headers(&self, user_id: &str, slug: &str) -> HashMap<String, String> {
		self
			.backend_by_slug(slug)
			.and_then(|b| b.subscription_headers.get(user_id).cloned())
			.unwrap_or_default()
	}

	fn tls(&self) -> TlsConfig {
		self.inner.read().expect("config read lock").tls.clone()
	}

	fn health(&self) -> Result<(), String> {
		let raw = self.inner.read().expect("config read lock");
		if raw.listen.is_empty() {
			return Err("listen address is empty".to_string());
		}
		Ok(())
	}

	fn frontend_url(&self) -> Option<String> {
		self
			.inner
			.read()
			.expect("config read lock")
			.frontend_url
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const YAML: &str = r#"
listen: "0.0.0.0:8080"
authType: usersOnly
users:
  - keyHash: "abc123"
    id: "alice"
    params: {}
subscriptions:
  alice: ["a", "b"]
backends:
  a:
    slug: "a"
    url: "http://a.internal"
  b:
    slug: "b"
    url: "http://b.internal"
    bearer: "tok"
"#;

	#[test]
	fn loads_and_resolves_user() {
		let cfg = StaticConfig::from_yaml(YAML).unwrap();
		assert_eq!(cfg.user_by_key_hash("abc123"), Some("alice".to_string()));
		assert_eq!(cfg.subscriptions("alice"), vec!["a", "b"]);
		assert!(cfg.backend_by_slug("a").is_some());
		assert!(cfg.backend_by_slug("missing").is_none());
	}

	#[test]
	fn health_ok_for_loaded_config() {
		let cfg = StaticConfig::from_yaml(YAML).unwrap();
		assert!(cfg.health().is_ok());
	}

	#[test]
	fn health_errors_on_empty_listen_addr() {
		let cfg = StaticConfig::from_yaml("listen: \"\"\n").unwrap();
		assert!(cfg.health().is_err());
	}

	#[test]
	fn hashing_is_stable_sha256() {
		assert_eq!(
			hash_key("hello"),
			"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
		);
	}
}

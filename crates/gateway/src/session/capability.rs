//! Capability registry: a `method -> handler` bundle, value-like and
//! registered with the `InputProcessor` at startup. Matches spec §9 "dynamic
//! method dispatch ... avoid class inheritance."

use crate::error::GatewayError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type HandlerResult = Result<Value, GatewayError>;

#[async_trait]
pub trait LocalCapability: Send + Sync {
	/// The method names this capability handles.
	fn methods(&self) -> Vec<&'static str>;
	async fn handle(&self, method: &str, params: Value) -> HandlerResult;
}

/// A named bundle of local handlers registered with the `InputProcessor`.
/// "Local" here means served by this process directly (never fanned out):
/// `initialize`, `ping`, `roots/list`.
#[derive(Clone)]
pub struct Capability {
	inner: Arc<dyn LocalCapability>,
}

impl Capability {
	pub fn new(inner: Arc<dyn LocalCapability>) -> Self {
		Self { inner }
	}

	pub fn methods(&self) -> Vec<&'static str> {
		self.inner.methods()
	}

	pub async fn handle(&self, method: &str, params: Value) -> HandlerResult {
		self.inner.handle(method, params).await
	}
}

/// `ping` — always answered locally, even before `Ready` (spec §4.1).
pub struct PingCapability;

#[async_trait]
impl LocalCapability for PingCapability {
	fn methods(&self) -> Vec<&'static str> {
		vec!["ping"]
	}

	async fn handle(&self, _method: &str, _params: Value) -> HandlerResult {
		Ok(serde_json::json!({}))
	}
}

/// `roots/list` — returns an empty root set; the gateway itself has no
/// filesystem roots to expose, this exists so clients that probe for it get
/// a well-formed empty answer rather than MethodNotFound.
pub struct RootsCapability;

#[async_trait]
impl LocalCapability for RootsCapability {
	fn methods(&self) -> Vec<&'static str> {
		vec!["roots/list"]
	}

	async fn handle(&self, _method: &str, _params: Value) -> HandlerResult {
		Ok(serde_json::json!({ "roots": [] }))
	}
}

#[derive(Default, Clone)]
pub struct CapabilityRegistry {
	handlers: HashMap<&'static str, Capability>,
}

impl CapabilityRegistry {
	pub fn register(&mut self, cap: Capability) {
		for m in cap.methods() {
			self.handlers.insert(m, cap.clone());
		}
	}

	pub fn get(&self, method: &str) -> Option<&Capability> {
		self.handlers.get(method)
	}
}

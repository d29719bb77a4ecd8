//! A2A Task Engine (spec §4.5): task state machine, streaming artifact/status
//! updates, cancellation propagation, resubscription, and an in-memory task
//! store with history trimming.

pub mod agent;
pub mod handlers;
pub mod task;

pub use handlers::agent_card;

use crate::error::GatewayError;
use agent::{Agent, DemoAgent};
use serde_json::Value;
use std::sync::Arc;
use task::{CancelToken, InMemoryTaskStore, Task, TaskEvent, TaskId, TaskUpdate};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// History ring bound per task (spec §3 "history length never exceeds
/// configured bound").
const DEFAULT_HISTORY_BOUND: usize = 100;

/// Static fields the agent card is served from; spec §6 Agent Card lists
/// these alongside the `url`, which is computed per-request from the
/// gateway's own external address rather than stored here.
#[derive(Debug, Clone)]
pub struct AgentCardInfo {
	pub name: String,
	pub description: Option<String>,
	pub version: String,
	pub provider_organization: Option<String>,
	pub provider_url: Option<String>,
	pub documentation_url: Option<String>,
	pub default_input_modes: Vec<String>,
	pub default_output_modes: Vec<String>,
	pub skills: Vec<Value>,
}

impl Default for AgentCardInfo {
	fn default() -> Self {
		Self {
			name: "aip-gateway".to_string(),
			description: Some("AI-protocol gateway: MCP/A2A fan-out front door".to_string()),
			version: env!("CARGO_PKG_VERSION").to_string(),
			provider_organization: None,
			provider_url: None,
			documentation_url: None,
			default_input_modes: vec!["text".to_string()],
			default_output_modes: vec!["text".to_string()],
			skills: Vec::new(),
		}
	}
}

/// Process-wide A2A state: the task store, the agent handler tasks are
/// driven by, and the static agent-card fields.
pub struct A2aState {
	store: Arc<InMemoryTaskStore>,
	agent: Arc<dyn Agent>,
	pub card_info: AgentCardInfo,
}

impl A2aState {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			store: Arc::new(InMemoryTaskStore::new(DEFAULT_HISTORY_BOUND)),
			agent: Arc::new(DemoAgent),
			card_info: AgentCardInfo::default(),
		})
	}

	pub fn with_agent(agent: Arc<dyn Agent>) -> Arc<Self> {
		Arc::new(Self {
			store: Arc::new(InMemoryTaskStore::new(DEFAULT_HISTORY_BOUND)),
			agent,
			card_info: AgentCardInfo::default(),
		})
	}

	fn extract_id(params: &Value) -> Result<String, GatewayError> {
		params
			.get("id")
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| GatewayError::InvalidParams("missing `id`".to_string()))
	}

	fn history_length(params: &Value) -> Option<usize> {
		params.get("historyLength").and_then(|v| v.as_u64()).map(|v| v as usize)
	}

	/// `tasks/send`: create-or-continue (spec §4.5).
	pub async fn send(self: &Arc<Self>, params: Value) -> Result<Task, GatewayError> {
		if let Some(id) = params.get("id").and_then(|v| v.as_str()) {
			let message = params.get("message").cloned().unwrap_or(Value::Null);
			return self
				.store
				.continue_task(id, message)
				.ok_or_else(|| GatewayError::TaskNotFound(id.to_string()));
		}
		let session_id = params.get("sessionId").and_then(|v| v.as_str()).map(str::to_string);
		let message = params.get("message").cloned().unwrap_or(Value::Null);
		let (id, cancel) = self.store.create(session_id, message.clone());
		self.spawn_agent_run(id.clone(), cancel, message);
		Ok(self.store.get(&id).expect("just created"))
	}

	/// `tasks/get`, trimmed per `historyLength` (spec §4.5, §8).
	pub fn get(&self, params: &Value) -> Result<Task, GatewayError> {
		let id = Self::extract_id(params)?;
		let task = self
			.store
			.get(&id)
			.ok_or_else(|| GatewayError::TaskNotFound(id.clone()))?;
		Ok(task.trimmed(Self::history_length(params)))
	}

	/// `tasks/cancel`: idempotent on terminal tasks (spec §4.5, §8).
	pub fn cancel(&self, params: &Value) -> Result<Task, GatewayError> {
		let id = Self::extract_id(params)?;
		let (task, was_terminal) = self
			.store
			.cancel(&id)
			.ok_or_else(|| GatewayError::TaskNotFound(id.clone()))?;
		if was_terminal {
			return Err(GatewayError::TaskAlreadyTerminal(id));
		}
		Ok(task)
	}

	/// `tasks/sendSubscribe`: creates (or continues) a task and subscribes to
	/// its update stream before the agent run is spawned, so no event is
	/// missed (spec §4.5).
	pub async fn send_subscribe(self: &Arc<Self>, params: Value) -> Result<(Task, broadcast::Receiver<TaskEvent>), GatewayError> {
		if let Some(id) = params.get("id").and_then(|v| v.as_str()).map(str::to_string) {
			let rx = self
				.store
				.subscribe(&id)
				.ok_or_else(|| GatewayError::TaskNotFound(id.clone()))?;
			let message = params.get("message").cloned().unwrap_or(Value::Null);
			let task = self
				.store
				.continue_task(&id, message)
				.ok_or_else(|| GatewayError::TaskNotFound(id.clone()))?;
			return Ok((task, rx));
		}
		let session_id = params.get("sessionId").and_then(|v| v.as_str()).map(str::to_string);
		let message = params.get("message").cloned().unwrap_or(Value::Null);
		let (id, cancel) = self.store.create(session_id, message.clone());
		let rx = self.store.subscribe(&id).expect("just created");
		self.spawn_agent_run(id.clone(), cancel, message);
		Ok((self.store.get(&id).expect("just created"), rx))
	}

	/// `tasks/resubscribe`: rejoins an in-flight stream, or — for an already
	/// terminal task — returns the snapshot with no live stream to attach
	/// (spec §4.5).
	pub fn resubscribe(&self, params: &Value) -> Result<(Task, Option<broadcast::Receiver<TaskEvent>>), GatewayError> {
		let id = Self::extract_id(params)?;
		let task = self
			.store
			.get(&id)
			.ok_or_else(|| GatewayError::TaskNotFound(id.clone()))?;
		if task.status.is_terminal() {
			return Ok((task, None));
		}
		let rx = self.store.subscribe(&id);
		Ok((task, rx))
	}

	/// Runs the agent handler to completion in the background, forwarding its
	/// updates into the store/broadcast as they arrive, and finalizing the
	/// task if the handler returns without reaching a terminal state itself
	/// (spec §4.5 "the engine serializes updates onto persisted task state").
	fn spawn_agent_run(self: &Arc<Self>, task_id: TaskId, cancel: CancelToken, initial_message: Value) {
		let this = self.clone();
		tokio::spawn(async move {
			this.store.apply_update(
				&task_id,
				TaskUpdate::Status { status: task::TaskStatus::Working, message: None, is_final: false },
			);

			let (tx, mut rx) = mpsc::channel(32);
			let forward_store = this.store.clone();
			let forward_task_id = task_id.clone();
			let forwarder = tokio::spawn(async move {
				while let Some(update) = rx.recv().await {
					forward_store.apply_update(&forward_task_id, update);
				}
			});

			let result = this.agent.run(cancel, task_id.clone(), initial_message, tx).await;
			let _ = forwarder.await;

			if let Some(task) = this.store.get(&task_id) {
				if !task.status.is_terminal() {
					let status = if result.is_ok() { task::TaskStatus::Completed } else { task::TaskStatus::Failed };
					let message = result.err().map(|e| serde_json::json!({ "error": e.to_string() }));
					this.store.apply_update(&task_id, TaskUpdate::Status { status, message, is_final: true });
				}
			} else {
				warn!(task_id = %task_id, "agent run finished for a task no longer in the store");
			}
		});
	}
}

//! A2A Task Engine state machine and store (spec §4.5, §3 "Task"). Tasks are
//! kept in-process only; durable storage is explicitly out of scope
//! (spec §1 Non-goals), so the one `TaskStore` implementation here is an
//! in-memory map plus a per-task broadcast channel for SSE subscribers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::warn;

pub type TaskId = String;

/// spec §4.5 state machine. `is_terminal` gates every mutating operation:
/// "once terminal, no further status or artifact updates are accepted."
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
	Submitted,
	Working,
	InputRequired,
	Completed,
	Failed,
	Canceled,
}

impl TaskStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled)
	}
}

/// spec §3 "Task" artifact: `index` is a stable slot, `append` extends the
/// parts already stored there, `lastChunk` marks it final.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Artifact {
	pub index: usize,
	pub parts: Vec<Value>,
	pub last_chunk: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Task {
	pub id: TaskId,
	pub session_id: String,
	pub status: TaskStatus,
	pub history: VecDeque<Value>,
	pub artifacts: Vec<Artifact>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Task {
	/// Snapshot with `history` trimmed to its tail `length` entries, per spec
	/// §8 boundary cases (`historyLength=0` empty, `>stored` full history).
	pub fn trimmed(&self, history_length: Option<usize>) -> Task {
		let mut t = self.clone();
		if let Some(len) = history_length {
			let drop = t.history.len().saturating_sub(len);
			for _ in 0..drop {
				t.history.pop_front();
			}
		}
		t
	}

	pub fn to_value(&self) -> Value {
		serde_json::json!({
			"id": self.id,
			"sessionId": self.session_id,
			"status": self.status,
			"history": self.history,
			"artifacts": self.artifacts.iter().map(|a| serde_json::json!({
				"index": a.index,
				"parts": a.parts,
				"lastChunk": a.last_chunk,
			})).collect::<Vec<_>>(),
			"createdAt": self.created_at,
			"updatedAt": self.updated_at,
		})
	}
}

/// One increment of task state, emitted by an [`crate::a2a::agent::Agent`]
/// handler and applied through [`TaskStore::apply_update`].
#[derive(Debug, Clone)]
pub enum TaskUpdate {
	Status {
		status: TaskStatus,
		message: Option<Value>,
		is_final: bool,
	},
	Artifact {
		index: usize,
		append: bool,
		last_chunk: bool,
		parts: Vec<Value>,
	},
}

/// What a streaming subscriber (`tasks/sendSubscribe`/`tasks/resubscribe`)
/// receives, one per applied [`TaskUpdate`] (spec §4.5 "streams
/// `task_status_update` and `task_artifact_update` events").
#[derive(Debug, Clone)]
pub enum TaskEvent {
	Status { status: TaskStatus, message: Option<Value>, is_final: bool },
	Artifact { index: usize, parts: Vec<Value>, last_chunk: bool },
}

/// A cooperative-cancellation handle handed to agent handlers (spec §4.5
/// "Agent handler contract ... must observe ctx cancellation").
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
	pub fn is_cancelled(&self) -> bool {
		*self.0.borrow()
	}

	pub async fn cancelled(&mut self) {
		if self.is_cancelled() {
			return;
		}
		let _ = self.0.changed().await;
	}
}

struct Entry {
	task: Task,
	events: broadcast::Sender<TaskEvent>,
	cancel_tx: watch::Sender<bool>,
}

/// spec §1 "a narrow ... `TaskStore` interface": the in-process
/// implementation this core ships so it can run standalone. Durable storage
/// is an external collaborator's concern.
pub struct InMemoryTaskStore {
	tasks: RwLock<HashMap<TaskId, Entry>>,
	history_bound: usize,
}

impl InMemoryTaskStore {
	pub fn new(history_bound: usize) -> Self {
		Self {
			tasks: RwLock::new(HashMap::new()),
			history_bound,
		}
	}

	/// Creates a brand-new task in `Submitted` state and registers its
	/// broadcast/cancel plumbing before any agent run is spawned, so a
	/// `tasks/sendSubscribe` caller can subscribe without missing the first
	/// event (spec §4.5, §5 "SSE subscriber lists: copy-on-read").
	pub fn create(&self, session_id: Option<String>, initial_message: Value) -> (TaskId, CancelToken) {
		let id = uuid::Uuid::new_v4().to_string();
		let now = Utc::now();
		let mut history = VecDeque::new();
		history.push_back(initial_message);
		let task = Task {
			id: id.clone(),
			session_id: session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
			status: TaskStatus::Submitted,
			history,
			artifacts: Vec::new(),
			created_at: now,
			updated_at: now,
		};
		let (events, _rx) = broadcast::channel(128);
		let (cancel_tx, cancel_rx) = watch::channel(false);
		self
			.tasks
			.write()
			.expect("task store write lock")
			.insert(id.clone(), Entry { task, events, cancel_tx });
		(id, CancelToken(cancel_rx))
	}

	pub fn get(&self, id: &str) -> Option<Task> {
		self.tasks.read().expect("task store read lock").get(id).map(|e| e.task.clone())
	}

	pub fn cancel_token(&self, id: &str) -> Option<CancelToken> {
		self
			.tasks
			.read()
			.expect("task store read lock")
			.get(id)
			.map(|e| CancelToken(e.cancel_tx.subscribe()))
	}

	pub fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<TaskEvent>> {
		self.tasks.read().expect("task store read lock").get(id).map(|e| e.events.subscribe())
	}

	/// Applies one update to the stored task, broadcasting it to any live
	/// subscribers. Updates arriving after a terminal transition are dropped
	/// with a warning (spec §4.5 invariant) and the unchanged snapshot is
	/// returned.
	pub fn apply_update(&self, id: &str, update: TaskUpdate) -> Option<Task> {
		let mut tasks = self.tasks.write().expect("task store write lock");
		let entry = tasks.get_mut(id)?;
		if entry.task.status.is_terminal() {
			warn!(task_id = id, "dropping update received after terminal transition");
			return Some(entry.task.clone());
		}

		let event = match &update {
			TaskUpdate::Status { status, message, is_final } => {
				entry.task.status = *status;
				if let Some(m) = message {
					entry.task.history.push_back(m.clone());
					while entry.task.history.len() > self.history_bound {
						entry.task.history.pop_front();
					}
				}
				TaskEvent::Status { status: *status, message: message.clone(), is_final: *is_final }
			},
			TaskUpdate::Artifact { index, append, last_chunk, parts } => {
				match entry.task.artifacts.iter_mut().find(|a| a.index == *index) {
					Some(existing) if *append => {
						existing.parts.extend(parts.clone());
						existing.last_chunk = *last_chunk;
					},
					Some(existing) => {
						existing.parts = parts.clone();
						existing.last_chunk = *last_chunk;
					},
					None => entry.task.artifacts.push(Artifact {
						index: *index,
						parts: parts.clone(),
						last_chunk: *last_chunk,
					}),
				}
				TaskEvent::Artifact { index: *index, parts: parts.clone(), last_chunk: *last_chunk }
			},
		};
		entry.task.updated_at = Utc::now();
		let _ = entry.events.send(event);
		Some(entry.task.clone())
	}

	/// `tasks/cancel`: idempotent on a terminal task — returns the unchanged
	/// snapshot and `true` the task was *already* terminal, so the caller can
	/// surface the right error (spec §8 "idempotent ... yields error code").
	pub fn cancel(&self, id: &str) -> Option<(Task, bool)> {
		let mut tasks = self.tasks.write().expect("task store write lock");
		let entry = tasks.get_mut(id)?;
		if entry.task.status.is_terminal() {
			return Some((entry.task.clone(), true));
		}
		entry.task.status = TaskStatus::Canceled;
		entry.task.updated_at = Utc::now();
		let _ = entry.cancel_tx.send(true);
		let _ = entry.events.send(TaskEvent::Status { status: TaskStatus::Canceled, message: None, is_final: true });
		Some((entry.task.clone(), false))
	}

	/// `tasks/send` continuation: accepts a follow-up message for an
	/// existing, non-terminal task. A task in `InputRequired` transitions
	/// back to `Working`; any other non-terminal status just appends the
	/// message to history (spec §4.5 `tasks/send`).
	pub fn continue_task(&self, id: &str, message: Value) -> Option<Task> {
		let mut tasks = self.tasks.write().expect("task store write lock");
		let entry = tasks.get_mut(id)?;
		if entry.task.status.is_terminal() {
			return Some(entry.task.clone());
		}
		entry.task.history.push_back(message);
		while entry.task.history.len() > self.history_bound {
			entry.task.history.pop_front();
		}
		if entry.task.status == TaskStatus::InputRequired {
			entry.task.status = TaskStatus::Working;
			let _ = entry.events.send(TaskEvent::Status { status: TaskStatus::Working, message: None, is_final: false });
		}
		entry.task.updated_at = Utc::now();
		Some(entry.task.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> InMemoryTaskStore {
		InMemoryTaskStore::new(10)
	}

	#[test]
	fn cancel_on_terminal_task_is_idempotent() {
		let store = store();
		let (id, _cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		store.apply_update(&id, TaskUpdate::Status { status: TaskStatus::Completed, message: None, is_final: true });
		let (task, was_terminal) = store.cancel(&id).unwrap();
		assert!(was_terminal);
		assert_eq!(task.status, TaskStatus::Completed);
	}

	#[test]
	fn cancel_transitions_non_terminal_task() {
		let store = store();
		let (id, mut cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		let (task, was_terminal) = store.cancel(&id).unwrap();
		assert!(!was_terminal);
		assert_eq!(task.status, TaskStatus::Canceled);
		assert!(cancel.is_cancelled());
	}

	#[test]
	fn updates_after_terminal_are_dropped() {
		let store = store();
		let (id, _cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		store.apply_update(&id, TaskUpdate::Status { status: TaskStatus::Completed, message: None, is_final: true });
		let task = store
			.apply_update(&id, TaskUpdate::Status { status: TaskStatus::Working, message: None, is_final: false })
			.unwrap();
		assert_eq!(task.status, TaskStatus::Completed);
	}

	#[test]
	fn artifact_append_extends_parts_at_stable_index() {
		let store = store();
		let (id, _cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		store.apply_update(&id, TaskUpdate::Status { status: TaskStatus::Working, message: None, is_final: false });
		store.apply_update(
			&id,
			TaskUpdate::Artifact { index: 0, append: false, last_chunk: false, parts: vec![serde_json::json!("a")] },
		);
		let task = store
			.apply_update(
				&id,
				TaskUpdate::Artifact { index: 0, append: true, last_chunk: true, parts: vec![serde_json::json!("b")] },
			)
			.unwrap();
		assert_eq!(task.artifacts.len(), 1);
		assert_eq!(task.artifacts[0].parts, vec![serde_json::json!("a"), serde_json::json!("b")]);
		assert!(task.artifacts[0].last_chunk);
	}

	#[test]
	fn history_length_zero_trims_to_empty() {
		let store = store();
		let (id, _cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		let task = store.get(&id).unwrap();
		assert_eq!(task.trimmed(Some(0)).history.len(), 0);
		assert_eq!(task.trimmed(Some(100)).history.len(), 1);
	}

	#[test]
	fn continue_task_from_input_required_returns_to_working() {
		let store = store();
		let (id, _cancel) = store.create(None, serde_json::json!({"text": "hi"}));
		store.apply_update(&id, TaskUpdate::Status { status: TaskStatus::InputRequired, message: None, is_final: false });
		let task = store.continue_task(&id, serde_json::json!({"text": "more"})).unwrap();
		assert_eq!(task.status, TaskStatus::Working);
		assert_eq!(task.history.len(), 2);
	}

	#[test]
	fn history_bound_is_never_exceeded() {
		let store = InMemoryTaskStore::new(2);
		let (id, _cancel) = store.create(None, serde_json::json!("m0"));
		for i in 1..5 {
			store.continue_task(&id, serde_json::json!(format!("m{i}")));
		}
		let task = store.get(&id).unwrap();
		assert_eq!(task.history.len(), 2);
	}
}

//! Agent handler contract (spec §4.5): `(ctx, task, updates<-chan) -> error`.
//! An agent yields status/artifact updates and must observe cancellation.
//!
//! `DemoAgent` is the example agent spec §1 carves out of scope ("the
//! example agent's own command-parsing demo logic"); it implements only the
//! trivial behaviors scenarios S4/S5 exercise — streaming N text chunks, or
//! waiting N seconds before completing — and contains no real business logic.

use super::task::{CancelToken, TaskId, TaskUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

#[async_trait]
pub trait Agent: Send + Sync {
	async fn run(
		&self,
		cancel: CancelToken,
		task_id: TaskId,
		initial_message: Value,
		updates: mpsc::Sender<TaskUpdate>,
	) -> anyhow::Result<()>;
}

/// Pulls the first plain-text part out of an opaque message payload, trying
/// the A2A `{"parts":[{"type":"text","text":...}]}` shape first and falling
/// back to a bare string.
fn extract_text(message: &Value) -> String {
	if let Some(parts) = message.get("parts").and_then(|p| p.as_array()) {
		let joined: String = parts
			.iter()
			.filter_map(|p| p.get("text").and_then(|t| t.as_str()))
			.collect::<Vec<_>>()
			.join(" ");
		if !joined.is_empty() {
			return joined;
		}
	}
	message.as_str().map(str::to_string).unwrap_or_default()
}

fn parse_stream_chunks(text: &str) -> Option<u32> {
	let words: Vec<&str> = text.split_whitespace().collect();
	if words.first() == Some(&"stream") && words.get(2) == Some(&"chunks") {
		words.get(1)?.parse().ok()
	} else {
		None
	}
}

fn parse_wait_seconds(text: &str) -> Option<u64> {
	let words: Vec<&str> = text.split_whitespace().collect();
	if words.first() == Some(&"wait") && words.get(2) == Some(&"seconds") {
		words.get(1)?.parse().ok()
	} else {
		None
	}
}

pub struct DemoAgent;

#[async_trait]
impl Agent for DemoAgent {
	async fn run(
		&self,
		mut cancel: CancelToken,
		_task_id: TaskId,
		initial_message: Value,
		updates: mpsc::Sender<TaskUpdate>,
	) -> anyhow::Result<()> {
		let text = extract_text(&initial_message);

		if let Some(chunks) = parse_stream_chunks(&text) {
			for i in 0..chunks {
				if cancel.is_cancelled() {
					return Err(anyhow::anyhow!("canceled"));
				}
				let part = serde_json::json!({ "type": "text", "text": format!("chunk {}", i + 1) });
				let update = TaskUpdate::Artifact {
					index: 0,
					append: i > 0,
					last_chunk: i + 1 == chunks,
					parts: vec![part],
				};
				if updates.send(update).await.is_err() {
					return Ok(()); // no one listening anymore; nothing left to do
				}
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_millis(50)) => {},
					_ = cancel.cancelled() => return Err(anyhow::anyhow!("canceled")),
				}
			}
			return Ok(());
		}

		if let Some(secs) = parse_wait_seconds(&text) {
			tokio::select! {
				_ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(()),
				_ = cancel.cancelled() => Err(anyhow::anyhow!("canceled")),
			}
		} else {
			let _ = updates
				.send(TaskUpdate::Artifact {
					index: 0,
					append: false,
					last_chunk: true,
					parts: vec![serde_json::json!({ "type": "text", "text": format!("echo: {text}") })],
				})
				.await;
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_text_from_parts_shape() {
		let msg = serde_json::json!({"parts": [{"type": "text", "text": "stream 3 chunks"}]});
		assert_eq!(extract_text(&msg), "stream 3 chunks");
	}

	#[test]
	fn extracts_text_from_bare_string() {
		let msg = serde_json::json!("wait 2 seconds");
		assert_eq!(extract_text(&msg), "wait 2 seconds");
	}

	#[test]
	fn parses_stream_chunks_instruction() {
		assert_eq!(parse_stream_chunks("stream 3 chunks"), Some(3));
		assert_eq!(parse_stream_chunks("do something else"), None);
	}

	#[test]
	fn parses_wait_seconds_instruction() {
		assert_eq!(parse_wait_seconds("wait 10 seconds"), Some(10));
		assert_eq!(parse_wait_seconds("stream 3 chunks"), None);
	}
}

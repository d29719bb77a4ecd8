//! HTTP surface for A2A (spec §4.3, §6): `POST /a2a` carries JSON-RPC task
//! operations, upgrading to SSE for the two subscribe-style methods;
//! `GET /.well-known/agent.json` serves the agent card.

use super::task::{Task, TaskEvent};
use crate::error::GatewayError;
use crate::message::{Id, Message, RpcError, code};
use crate::transport::GatewayState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Json, Response, Sse};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

pub async fn handle(State(state): State<Arc<GatewayState>>, headers: HeaderMap, body: Bytes) -> Response {
	let _ = &headers;
	let message = match Message::parse(&body) {
		Ok(m) => m,
		Err(_) => {
			return json_response(Message::response_err(
				Id::Null,
				RpcError::new(code::INVALID_REQUEST, "malformed frame: missing id and method"),
			));
		},
	};

	let Message::Request { id, method, params } = message else {
		return json_response(Message::response_err(
			Id::Null,
			RpcError::new(code::INVALID_REQUEST, "a2a endpoint only accepts requests"),
		));
	};

	match method.as_str() {
		"tasks/send" => match state.a2a.send(params).await {
			Ok(task) => json_response(Message::response_ok(id, task.to_value())),
			Err(e) => json_response(Message::response_err(id, e.to_rpc_error())),
		},
		"tasks/get" => match state.a2a.get(&params) {
			Ok(task) => json_response(Message::response_ok(id, task.to_value())),
			Err(e) => json_response(Message::response_err(id, e.to_rpc_error())),
		},
		"tasks/cancel" => match state.a2a.cancel(&params) {
			Ok(task) => json_response(Message::response_ok(id, task.to_value())),
			Err(e) => json_response(Message::response_err(id, e.to_rpc_error())),
		},
		"tasks/sendSubscribe" => match state.a2a.send_subscribe(params).await {
			Ok((task, rx)) => sse_response(id, task, Some(rx)),
			Err(e) => json_response(Message::response_err(id, e.to_rpc_error())),
		},
		"tasks/resubscribe" => match state.a2a.resubscribe(&params) {
			Ok((task, rx)) => sse_response(id, task, rx),
			Err(e) => json_response(Message::response_err(id, e.to_rpc_error())),
		},
		other => json_response(Message::response_err(id, GatewayError::MethodNotFound(other.to_string()).to_rpc_error())),
	}
}

fn json_response(message: Message) -> Response {
	Json(message.to_value()).into_response()
}

/// Builds the SSE response for `tasks/sendSubscribe`/`tasks/resubscribe`: one
/// event per task update, each wrapped as a JSON-RPC response sharing the
/// inbound request's id (spec §4.5). An already-terminal task (no live
/// receiver) gets a single synthetic final event reconstructed from its
/// snapshot, then the stream ends.
fn sse_response(id: Id, task: Task, rx: Option<tokio::sync::broadcast::Receiver<TaskEvent>>) -> Response {
	match rx {
		Some(rx) => {
			let live = task_event_stream(rx, id);
			Sse::new(live).into_response()
		},
		None => {
			let final_event = to_sse_event(
				&id,
				TaskEvent::Status { status: task.status, message: None, is_final: true },
			);
			Sse::new(stream::once(async move { Ok::<_, Infallible>(final_event) })).into_response()
		},
	}
}

fn task_event_stream(
	rx: tokio::sync::broadcast::Receiver<TaskEvent>,
	id: Id,
) -> impl Stream<Item = Result<Event, Infallible>> {
	let stream = tokio_stream::wrappers::BroadcastStream::new(rx);
	stream::unfold((stream, id, false), |(mut stream, id, done)| async move {
		if done {
			return None;
		}
		loop {
			match stream.next().await {
				Some(Ok(event)) => {
					let is_final = matches!(&event, TaskEvent::Status { is_final: true, .. });
					let axum_event = to_sse_event(&id, event);
					return Some((Ok(axum_event), (stream, id, is_final)));
				},
				Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
					warn!(skipped = n, "a2a subscriber lagged, dropping oldest buffered events");
					continue;
				},
				None => return None,
			}
		}
	})
}

fn to_sse_event(id: &Id, event: TaskEvent) -> Event {
	match event {
		TaskEvent::Status { status, message, is_final } => {
			let result = serde_json::json!({ "status": status, "message": message, "final": is_final });
			Event::default()
				.event("task_status_update")
				.json_data(Message::response_ok(id.clone(), result).to_value())
				.expect("serializable")
		},
		TaskEvent::Artifact { index, parts, last_chunk } => {
			let result = serde_json::json!({ "artifact": { "index": index, "parts": parts, "lastChunk": last_chunk } });
			Event::default()
				.event("task_artifact_update")
				.json_data(Message::response_ok(id.clone(), result).to_value())
				.expect("serializable")
		},
	}
}

/// `GET /.well-known/agent.json` (spec §6 Agent Card). `url` is computed from
/// the request's `Host` header, falling back to the configured listen
/// address, rather than stored statically.
pub async fn agent_card(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Json<serde_json::Value> {
	let host = headers
		.get(axum::http::header::HOST)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
		.unwrap_or_else(|| state.config.listen_addr());
	let info = &state.a2a.card_info;
	Json(serde_json::json!({
		"name": info.name,
		"description": info.description,
		"url": format!("http://{host}/a2a"),
		"provider": info.provider_organization.as_ref().map(|org| serde_json::json!({
			"organization": org,
			"url": info.provider_url,
		})),
		"version": info.version,
		"documentationUrl": info.documentation_url,
		"capabilities": { "streaming": true, "pushNotifications": false },
		"defaultInputModes": info.default_input_modes,
		"defaultOutputModes": info.default_output_modes,
		"skills": info.skills,
	}))
}

//! Legacy SSE+POST transport (spec §4.3): a `GET /sse` stream carries every
//! server-originated frame; `POST /message?sessionId=…` carries client
//! frames, always answered `202 Accepted` since the real reply travels back
//! over the SSE stream.

use super::{GatewayState, SessionChannel};
use crate::session::process_input;
use crate::sse::SseEvent;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct SessionIdQuery {
	#[serde(rename = "sessionId")]
	session_id: String,
}

#[derive(serde::Deserialize)]
pub struct SseQuery {
	#[serde(rename = "sessionId")]
	session_id: Option<String>,
}

/// `GET /sse`: opens a fresh session (sending the `endpoint` event the client
/// needs to find `POST /message`), or, given `?sessionId=` and a
/// `Last-Event-ID` header, reattaches to an existing session and replays
/// buffered events strictly after that id (spec §4.3 SSE+POST reconnection).
pub async fn handle_get(
	State(state): State<Arc<GatewayState>>,
	Query(SseQuery { session_id }): Query<SseQuery>,
	headers: HeaderMap,
) -> Response {
	let last_event_id = headers
		.get("last-event-id")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<u64>().ok());

	let existing = session_id
		.as_deref()
		.and_then(|id| state.sessions.get(id).zip(state.channel_for(id)));

	let (session, channel, is_new) = match existing {
		Some((session, channel)) => (session, channel, false),
		None => {
			if session_id.is_some() {
				return (StatusCode::NOT_FOUND, "unknown session").into_response();
			}
			let user_id = GatewayState::bearer_from(&headers, None).and_then(|b| crate::auth::resolve_user(state.config.as_ref(), Some(&b)));
			let session = state.create_session(user_id);
			let Some(channel) = state.channel_for(&session.id) else {
				return (StatusCode::INTERNAL_SERVER_ERROR, "session channel missing").into_response();
			};
			(session, channel, true)
		},
	};

	let Some(live) = live_event_stream(channel, last_event_id) else {
		return (StatusCode::GONE, "session invalidated").into_response();
	};

	if !is_new {
		return Sse::new(live).into_response();
	}
	let endpoint = Event::default().event("endpoint").data(format!("/message?sessionId={}", session.id));
	let endpoint_stream = stream::once(async move { Ok::<_, Infallible>(endpoint) });
	Sse::new(endpoint_stream.chain(live)).into_response()
}

pub async fn handle_post(
	State(state): State<Arc<GatewayState>>,
	Query(SessionIdQuery { session_id }): Query<SessionIdQuery>,
	body: axum::body::Bytes,
) -> Response {
	let Some(session) = state.sessions.get(&session_id) else {
		return (StatusCode::NOT_FOUND, "unknown session").into_response();
	};
	let Some(channel) = state.channel_for(&session_id) else {
		return (StatusCode::NOT_FOUND, "unknown session").into_response();
	};

	let reply = process_input(&session, &state.input_processor, &channel.relay, state.config.as_ref(), &body).await;
	if let Some(frame) = reply {
		session.emit(frame).await;
	}
	StatusCode::ACCEPTED.into_response()
}

/// Builds the standalone server-push response used by both transports: the
/// streamable-HTTP `GET /mcp` stream and (via [`handle_get`] above, chained
/// after the `endpoint` event) the legacy `/sse` stream.
pub(super) async fn stream_response(channel: Arc<SessionChannel>, last_event_id: Option<u64>) -> Response {
	match live_event_stream(channel, last_event_id) {
		Some(s) => Sse::new(s).into_response(),
		None => (StatusCode::GONE, "session invalidated").into_response(),
	}
}

/// Replays buffered events after `last_event_id` (if given), then forwards
/// the channel's live output, re-stamping each frame with a fresh monotonic
/// id as it's pushed through the replay buffer. Returns `None` if the
/// caller's cursor has already fallen out of the ring (spec §4.3 "overflow
/// ⇒ session invalidated"), or if a consumer has already attached.
fn live_event_stream(
	channel: Arc<SessionChannel>,
	last_event_id: Option<u64>,
) -> Option<impl futures::Stream<Item = Result<Event, Infallible>>> {
	let replay = if let Some(id) = last_event_id {
		let buf = channel.buffer.try_lock().ok()?;
		buf.replay_since(id)?
	} else {
		Vec::new()
	};

	let mut guard = channel.output_rx.try_lock().ok()?;
	let rx = guard.take()?;
	drop(guard);

	let replayed = stream::iter(replay.into_iter().map(to_axum_event).collect::<Vec<_>>());
	let keepalive = tokio::time::interval_at(
		tokio::time::Instant::now() + super::SSE_KEEPALIVE_INTERVAL,
		super::SSE_KEEPALIVE_INTERVAL,
	);
	let live = stream::unfold((rx, keepalive, channel), |(mut rx, mut keepalive, channel)| async move {
		loop {
			tokio::select! {
				msg = rx.recv() => {
					return match msg {
						Some(m) => {
							let event = SseEvent { id: None, event: Some("message".to_string()), data: String::from_utf8_lossy(&m.to_bytes()).into_owned() };
							let stamped = channel.buffer.lock().await.push(event);
							Some((to_axum_event(stamped), (rx, keepalive, channel)))
						},
						None => None,
					};
				},
				_ = keepalive.tick() => {
					return Some((Event::default().comment("keep-alive"), (rx, keepalive, channel)));
				},
			}
		}
	});

	Some(replayed.chain(live).map(Ok))
}

fn to_axum_event(e: SseEvent) -> Event {
	let mut event = Event::default().event(e.event.unwrap_or_else(|| "message".to_string())).data(e.data);
	if let Some(id) = e.id {
		event = event.id(id.to_string());
	}
	event
}


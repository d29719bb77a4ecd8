//! 2025 streamable HTTP: single `/mcp` endpoint, JSON or SSE-upgraded
//! response, session id carried in the `mcp-session-id` header (spec §4.3).

use super::GatewayState;
use crate::session::process_input;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

const SESSION_HEADER: &str = "mcp-session-id";

fn session_id_header(headers: &HeaderMap) -> Option<String> {
	headers
		.get(SESSION_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
}

fn is_initialize(body: &[u8]) -> bool {
	matches!(
		crate::message::Message::parse(body),
		Ok(crate::message::Message::Request { method, .. }) if method == "initialize"
	)
}

pub async fn handle_post(
	State(state): State<Arc<GatewayState>>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let existing_id = session_id_header(&headers);
	let session = match &existing_id {
		Some(id) => state.sessions.get(id),
		None => None,
	};

	let (session, is_new) = match session {
		Some(s) => (s, false),
		None => {
			if existing_id.is_some() {
				return (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response();
			}
			if !is_initialize(&body) {
				return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
			}
			let user_id = GatewayState::bearer_from(&headers, None).and_then(|b| crate::auth::resolve_user(state.config.as_ref(), Some(&b)));
			(state.create_session(user_id), true)
		},
	};

	let Some(channel) = state.channel_for(&session.id) else {
		return (StatusCode::INTERNAL_SERVER_ERROR, "session channel missing").into_response();
	};

	let reply = process_input(&session, &state.input_processor, &channel.relay, state.config.as_ref(), &body).await;

	let mut response = match reply {
		Some(frame) => {
			let body = frame.to_bytes();
			let mut resp = (StatusCode::OK, body).into_response();
			resp.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
			resp
		},
		None => StatusCode::ACCEPTED.into_response(),
	};

	if is_new {
		if let Ok(v) = HeaderValue::from_str(&session.id) {
			response.headers_mut().insert(SESSION_HEADER, v);
		}
	}
	response
}

pub async fn handle_get(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
	let Some(session_id) = session_id_header(&headers) else {
		return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
	};
	if state.sessions.get(&session_id).is_none() {
		return (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response();
	}
	let Some(channel) = state.channel_for(&session_id) else {
		return (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response();
	};

	let last_event_id = headers
		.get("last-event-id")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<u64>().ok());

	super::legacy::stream_response(channel, last_event_id).await
}

pub async fn handle_delete(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
	let Some(session_id) = session_id_header(&headers) else {
		return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
	};
	state.close_session(&session_id).await;
	StatusCode::ACCEPTED.into_response()
}

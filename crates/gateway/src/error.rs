//! Error taxonomy per spec §7: Protocol / Auth / Routing / Upstream /
//! Lifecycle / Internal. Every subsystem error funnels into `GatewayError`,
//! which knows how to render itself as a JSON-RPC error object or an HTTP
//! status, matching how the teacher funnels `mcp::Error` into `ProxyError`.

use crate::message::{RpcError, code};
use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	// Protocol
	#[error("failed to parse frame: {0}")]
	ParseError(String),
	#[error("invalid request: {0}")]
	InvalidRequest(String),
	#[error("invalid params: {0}")]
	InvalidParams(String),
	#[error("method not found: {0}")]
	MethodNotFound(String),
	#[error("session not initialized")]
	NotInitialized,

	// Auth
	#[error("unauthorized")]
	Unauthorized,
	#[error("forbidden")]
	Forbidden,

	// Routing
	#[error("unknown backend: {0}")]
	BackendNotFound(String),
	#[error("ambiguous target: {0}")]
	AmbiguousTarget(String),
	#[error("caller has no subscriptions")]
	NoSubscription,

	// Upstream
	#[error("upstream {0} timed out")]
	UpstreamTimeout(String),
	#[error("upstream {0} unreachable: {1}")]
	UpstreamUnreachable(String, String),
	#[error("upstream {0} handshake failed: {1}")]
	UpstreamHandshakeFailed(String, String),
	#[error("upstream {0} returned: {1}")]
	UpstreamError(String, RpcError),

	// Lifecycle
	#[error("session closed")]
	SessionClosed,
	#[error("cancelled")]
	Cancelled,

	// A2A task engine
	#[error("task not found: {0}")]
	TaskNotFound(String),
	#[error("task {0} is already in a terminal state")]
	TaskAlreadyTerminal(String),

	// Internal
	#[error("internal error: {0}")]
	Internal(String),
}

impl GatewayError {
	pub fn to_rpc_error(&self) -> RpcError {
		match self {
			GatewayError::ParseError(m) => RpcError::new(code::PARSE_ERROR, m),
			GatewayError::InvalidRequest(m) => RpcError::new(code::INVALID_REQUEST, m),
			GatewayError::InvalidParams(m) => RpcError::new(code::INVALID_PARAMS, m),
			GatewayError::MethodNotFound(m) => {
				RpcError::new(code::METHOD_NOT_FOUND, format!("method not found: {m}"))
			},
			GatewayError::NotInitialized => {
				RpcError::new(code::NOT_INITIALIZED, "session is not initialized")
			},
			GatewayError::Unauthorized => RpcError::new(code::UNAUTHORIZED, "unauthorized"),
			GatewayError::Forbidden => RpcError::new(code::FORBIDDEN, "forbidden"),
			GatewayError::BackendNotFound(s) => {
				RpcError::new(code::BACKEND_NOT_FOUND, format!("unknown backend: {s}"))
			},
			GatewayError::AmbiguousTarget(s) => {
				RpcError::new(code::AMBIGUOUS_TARGET, format!("ambiguous target: {s}"))
			},
			GatewayError::NoSubscription => {
				RpcError::new(code::NO_SUBSCRIPTION, "caller has no subscriptions")
			},
			GatewayError::UpstreamTimeout(s) => {
				RpcError::new(code::UPSTREAM_TIMEOUT, format!("upstream {s} timed out"))
			},
			GatewayError::UpstreamUnreachable(s, m) => RpcError::new(
				code::UPSTREAM_UNREACHABLE,
				format!("upstream {s} unreachable: {m}"),
			),
			GatewayError::UpstreamHandshakeFailed(s, m) => RpcError::new(
				code::UPSTREAM_HANDSHAKE_FAILED,
				format!("upstream {s} handshake failed: {m}"),
			),
			GatewayError::UpstreamError(_, e) => e.clone(),
			GatewayError::SessionClosed => RpcError::new(code::SESSION_CLOSED, "session closed"),
			GatewayError::Cancelled => RpcError::new(code::CANCELLED, "cancelled"),
			GatewayError::TaskNotFound(s) => RpcError::new(code::TASK_NOT_FOUND, format!("task not found: {s}")),
			GatewayError::TaskAlreadyTerminal(s) => RpcError::new(
				code::TASK_ALREADY_TERMINAL,
				format!("task {s} is already in a terminal state"),
			),
			GatewayError::Internal(m) => RpcError::new(code::INTERNAL_ERROR, m),
		}
	}

	/// HTTP status for transport-level surfacing (the JSON-RPC body still
	/// carries the structured error above).
	pub fn http_status(&self) -> StatusCode {
		match self {
			GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
			GatewayError::Forbidden => StatusCode::FORBIDDEN,
			GatewayError::BackendNotFound(_) | GatewayError::NoSubscription => StatusCode::NOT_FOUND,
			GatewayError::ParseError(_) | GatewayError::InvalidRequest(_) | GatewayError::InvalidParams(_) => {
				StatusCode::BAD_REQUEST
			},
			GatewayError::NotInitialized => StatusCode::PRECONDITION_REQUIRED,
			_ => StatusCode::OK, // JSON-RPC convention: transport 200, error in body
		}
	}
}

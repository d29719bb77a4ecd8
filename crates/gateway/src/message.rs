//! JSON-RPC 2.0 envelope. IDs are string or integer; params/result are opaque
//! JSON the gateway forwards without interpreting beyond a handful of string
//! fields (slug prefixes) inspected by the fan-out engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
	Number(i64),
	String(String),
	Null,
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Id::Number(n) => write!(f, "{n}"),
			Id::String(s) => write!(f, "{s}"),
			Id::Null => write!(f, "null"),
		}
	}
}

/// Standard JSON-RPC error codes plus the domain codes this gateway defines (>= -32000).
pub mod code {
	pub const PARSE_ERROR: i64 = -32700;
	pub const INVALID_REQUEST: i64 = -32600;
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const INVALID_PARAMS: i64 = -32602;
	pub const INTERNAL_ERROR: i64 = -32603;

	pub const NOT_INITIALIZED: i64 = -32001;
	pub const UNAUTHORIZED: i64 = -32002;
	pub const FORBIDDEN: i64 = -32003;
	pub const BACKEND_NOT_FOUND: i64 = -32004;
	pub const AMBIGUOUS_TARGET: i64 = -32005;
	pub const NO_SUBSCRIPTION: i64 = -32006;
	pub const UPSTREAM_TIMEOUT: i64 = -32007;
	pub const UPSTREAM_UNREACHABLE: i64 = -32008;
	pub const UPSTREAM_HANDSHAKE_FAILED: i64 = -32009;
	pub const SESSION_CLOSED: i64 = -32010;
	pub const CANCELLED: i64 = -32011;
	pub const TASK_NOT_FOUND: i64 = -32012;
	pub const TASK_ALREADY_TERMINAL: i64 = -32013;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl RpcError {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}
}

#[derive(Debug, Clone)]
pub enum Message {
	Request {
		id: Id,
		method: String,
		params: Value,
	},
	Response {
		id: Id,
		result: Option<Value>,
		error: Option<RpcError>,
	},
	Notification {
		method: String,
		params: Value,
	},
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("invalid JSON: {0}")]
	Json(#[from] serde_json::Error),
	#[error("malformed frame: missing both id and method")]
	Malformed,
}

impl Message {
	pub fn request(id: Id, method: impl Into<String>, params: Value) -> Self {
		Message::Request {
			id,
			method: method.into(),
			params,
		}
	}

	pub fn notification(method: impl Into<String>, params: Value) -> Self {
		Message::Notification {
			method: method.into(),
			params,
		}
	}

	pub fn response_ok(id: Id, result: Value) -> Self {
		Message::Response {
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn response_err(id: Id, error: RpcError) -> Self {
		Message::Response {
			id,
			result: None,
			error: Some(error),
		}
	}

	/// Parses a raw frame and classifies it by the presence of `id`/`method`,
	/// per spec §4.1 correlation rules. A frame with no `id` and no `method`
	/// is malformed and the caller is expected to reply with
	/// InvalidRequest/id=null.
	pub fn parse(raw: &[u8]) -> Result<Message, ParseError> {
		let v: Value = serde_json::from_slice(raw)?;
		Self::from_value(v)
	}

	pub fn from_value(mut v: Value) -> Result<Message, ParseError> {
		let obj = v.as_object_mut().ok_or(ParseError::Malformed)?;
		let id = obj.remove("id").map(serde_json::from_value::<Id>).transpose()?;
		let method = obj
			.remove("method")
			.and_then(|m| m.as_str().map(str::to_string));

		match (id, method) {
			(Some(id), Some(method)) => Ok(Message::Request {
				id,
				method,
				params: obj.remove("params").unwrap_or(Value::Null),
			}),
			(None, Some(method)) => Ok(Message::Notification {
				method,
				params: obj.remove("params").unwrap_or(Value::Null),
			}),
			(Some(id), None) => {
				let error = obj
					.remove("error")
					.map(serde_json::from_value::<RpcError>)
					.transpose()?;
				let result = obj.remove("result");
				Ok(Message::Response { id, result, error })
			},
			(None, None) => Err(ParseError::Malformed),
		}
	}

	pub fn to_value(&self) -> Value {
		match self {
			Message::Request { id, method, params } => serde_json::json!({
				"jsonrpc": "2.0",
				"id": id,
				"method": method,
				"params": params,
			}),
			Message::Notification { method, params } => serde_json::json!({
				"jsonrpc": "2.0",
				"method": method,
				"params": params,
			}),
			Message::Response { id, result, error } => {
				let mut obj = serde_json::json!({
					"jsonrpc": "2.0",
					"id": id,
				});
				let map = obj.as_object_mut().expect("object");
				if let Some(err) = error {
					map.insert("error".to_string(), serde_json::to_value(err).unwrap_or(Value::Null));
				} else {
					map.insert("result".to_string(), result.clone().unwrap_or(Value::Null));
				}
				obj
			},
		}
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		serde_json::to_vec(&self.to_value()).expect("serializable")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_request() {
		let raw = br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#;
		match Message::parse(raw).unwrap() {
			Message::Request { id, method, .. } => {
				assert_eq!(id, Id::Number(1));
				assert_eq!(method, "ping");
			},
			other => panic!("expected request, got {other:?}"),
		}
	}

	#[test]
	fn classifies_notification() {
		let raw = br#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{}}"#;
		assert!(matches!(
			Message::parse(raw).unwrap(),
			Message::Notification { .. }
		));
	}

	#[test]
	fn classifies_response() {
		let raw = br#"{"jsonrpc":"2.0","id":"abc","result":{"ok":true}}"#;
		match Message::parse(raw).unwrap() {
			Message::Response { id, result, error } => {
				assert_eq!(id, Id::String("abc".into()));
				assert!(error.is_none());
				assert_eq!(result.unwrap()["ok"], Value::Bool(true));
			},
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn rejects_malformed_frame() {
		let raw = br#"{"jsonrpc":"2.0"}"#;
		assert!(matches!(Message::parse(raw), Err(ParseError::Malformed)));
	}

	#[test]
	fn round_trips_error_response() {
		let msg = Message::response_err(Id::Number(5), RpcError::new(code::METHOD_NOT_FOUND, "nope"));
		let v = msg.to_value();
		assert_eq!(v["error"]["code"], code::METHOD_NOT_FOUND);
		let reparsed = Message::from_value(v).unwrap();
		assert!(matches!(reparsed, Message::Response { error: Some(_), .. }));
	}
}

//! Method routing (spec §4.2 method policy table): classifies each inbound
//! method as local (served by the `InputProcessor`'s capability registry),
//! list-style fan-out, or single-target routing, and builds the merged or
//! forwarded result.

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{Contribution, DEFAULT_FANOUT_DEADLINE, Relay, merge_initialize, merge_list, parse_prefixed_name};
use crate::session::InputProcessor;
use serde_json::Value;
use std::sync::Arc;

/// `(method, items field, name/uri field)` for list-style calls (spec §4.2).
const LIST_METHODS: &[(&str, &str, &str)] = &[
	("tools/list", "tools", "name"),
	("prompts/list", "prompts", "name"),
	("resources/list", "resources", "uri"),
	("resources/templates/list", "resourceTemplates", "uriTemplate"),
];

/// `(method, name/uri field)` for single-target calls (spec §4.2).
const CALL_METHODS: &[(&str, &str)] = &[
	("tools/call", "name"),
	("prompts/get", "name"),
	("resources/read", "uri"),
	("resources/subscribe", "uri"),
	("resources/unsubscribe", "uri"),
];

fn list_policy(method: &str) -> Option<(&'static str, &'static str)> {
	LIST_METHODS
		.iter()
		.find(|(m, ..)| *m == method)
		.map(|(_, items, name)| (*items, *name))
}

fn call_policy(method: &str) -> Option<&'static str> {
	CALL_METHODS.iter().find(|(m, _)| *m == method).map(|(_, f)| *f)
}

/// Routes one already-authenticated, already-initialized inbound call.
/// `initialize` and local capabilities (`ping`, `roots/list`) are handled
/// directly by `processor`; everything else fans out through `relay`.
pub async fn route(
	processor: &InputProcessor,
	relay: &Arc<Relay>,
	config: &dyn Config,
	protocol_version: &str,
	method: &str,
	params: Value,
) -> Result<Value, GatewayError> {
	if method == "initialize" {
		let negotiated = negotiate_protocol_version(&params);
		// Spec §4.2 initialize row: triggers lazy upstream opens in the
		// background; the handshake result isn't awaited by the caller.
		let warm = relay.clone();
		tokio::spawn(async move { warm.warm_all().await });
		return Ok(merge_initialize(&negotiated, "aip-gateway", env!("CARGO_PKG_VERSION")));
	}

	if let Some((items_field, name_field)) = list_policy(method) {
		if relay.subscribed_slugs().is_empty() {
			return Ok(merge_list(Vec::new(), items_field, name_field));
		}
		let contributions: Vec<Contribution> = relay
			.fanout_list(method, params, DEFAULT_FANOUT_DEADLINE)
			.await;
		return Ok(merge_list(contributions, items_field, name_field));
	}

	if let Some(name_field) = call_policy(method) {
		let name = params
			.get(name_field)
			.and_then(|v| v.as_str())
			.ok_or_else(|| GatewayError::InvalidParams(format!("missing `{name_field}`")))?;
		let subs = relay.subscribed_slugs();
		let (slug, rest) = parse_prefixed_name(name, &subs)?;
		let mut unprefixed = params.clone();
		if let Some(obj) = unprefixed.as_object_mut() {
			obj.insert(name_field.to_string(), Value::String(rest.to_string()));
		}
		return relay
			.route_single(method, slug, unprefixed, DEFAULT_FANOUT_DEADLINE)
			.await;
	}

	let _ = config; // reserved: per-method config-driven policy may grow here
	processor.dispatch(method, params).await
}

/// Picks the protocol version to declare back to the caller: the caller's
/// requested version if understood, else the gateway's own default.
fn negotiate_protocol_version(params: &Value) -> String {
	const SUPPORTED: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
	let requested = params.get("protocolVersion").and_then(|v| v.as_str());
	match requested {
		Some(v) if SUPPORTED.contains(&v) => v.to_string(),
		_ => SUPPORTED[0].to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negotiates_requested_supported_version() {
		let params = serde_json::json!({"protocolVersion": "2025-03-26"});
		assert_eq!(negotiate_protocol_version(&params), "2025-03-26");
	}

	#[test]
	fn falls_back_to_default_for_unknown_version() {
		let params = serde_json::json!({"protocolVersion": "1999-01-01"});
		assert_eq!(negotiate_protocol_version(&params), "2025-06-18");
	}

	#[test]
	fn list_policy_recognizes_all_list_methods() {
		assert!(list_policy("tools/list").is_some());
		assert!(list_policy("resources/templates/list").is_some());
		assert!(list_policy("tools/call").is_none());
	}

	#[test]
	fn call_policy_recognizes_all_call_methods() {
		assert!(call_policy("tools/call").is_some());
		assert!(call_policy("resources/subscribe").is_some());
		assert!(call_policy("tools/list").is_none());
	}
}
